//! JobStore: redb-backed persistence for runner jobs.
//!
//! Supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::JOBS;
use crate::types::RunnerJob;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe runner job store backed by redb.
#[derive(Clone)]
pub struct JobStore {
    db: Arc<Database>,
}

impl JobStore {
    /// Open (or create) a persistent job store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "job store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory job store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory job store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace the job for a unit.
    ///
    /// A unit has at most one live attempt, so a new attempt's record
    /// overwrites the previous one.
    pub fn put_job(&self, job: &RunnerJob) -> StateResult<()> {
        let value = serde_json::to_vec(job).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(job.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(unit = %job.unit_id, handle = %job.handle, attempt = job.attempt, "runner job stored");
        Ok(())
    }

    /// Get the live job for a unit id.
    pub fn get_job(&self, unit_id: &str) -> StateResult<Option<RunnerJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(unit_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let job: RunnerJob =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List all live jobs, ordered by unit id.
    pub fn list_jobs(&self) -> StateResult<Vec<RunnerJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: RunnerJob =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(job);
        }
        Ok(results)
    }

    /// Record a poll of the job's handle. Missing jobs are ignored.
    pub fn touch_job(&self, unit_id: &str, polled_at: u64) -> StateResult<()> {
        if let Some(mut job) = self.get_job(unit_id)? {
            job.last_poll_at = polled_at;
            self.put_job(&job)?;
        }
        Ok(())
    }

    /// Delete a unit's job. Returns true if it existed.
    pub fn delete_job(&self, unit_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            existed = table.remove(unit_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(unit = %unit_id, existed, "runner job deleted");
        Ok(existed)
    }
}
