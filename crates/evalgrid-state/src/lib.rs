//! evalgrid-state: durable runner-job records for evalgrid.
//!
//! Backed by [redb](https://docs.rs/redb). The runner records one
//! [`RunnerJob`] per live unit attempt so that a restarted process can
//! reattach to backend handles instead of resubmitting work.
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns and keyed
//! by work unit id. `JobStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across attempt tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::JobStore;
pub use types::RunnerJob;
