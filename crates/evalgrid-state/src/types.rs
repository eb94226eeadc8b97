//! Persisted record types.

use serde::{Deserialize, Serialize};

use evalgrid_core::BackendHandle;

/// Links one work unit attempt to the backend handle it was submitted under.
///
/// Created when the attempt is submitted, touched on every poll, and
/// deleted once the attempt reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerJob {
    pub unit_id: String,
    /// Name of the backend that owns `handle`.
    pub backend: String,
    pub handle: BackendHandle,
    pub attempt: u32,
    pub started_at: u64,
    pub last_poll_at: u64,
}

impl RunnerJob {
    pub fn table_key(&self) -> &str {
        &self.unit_id
    }
}
