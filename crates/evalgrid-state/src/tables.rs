//! redb table definitions for the job store.

use redb::TableDefinition;

/// Live runner jobs keyed by work unit id.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("runner_jobs");
