//! The backend adapter contract.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use evalgrid_core::{BackendHandle, UnitState, WorkUnit};

use crate::error::{PollError, SubmissionError};

/// Boxed future alias for backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote state of a submitted unit, as reported by its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteStatus {
    /// Accepted but not started (queued, provisioning).
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RemoteStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteStatus::Succeeded | RemoteStatus::Failed | RemoteStatus::Cancelled
        )
    }

    /// The unit state this remote status corresponds to.
    pub fn unit_state(self) -> UnitState {
        match self {
            RemoteStatus::Queued => UnitState::Submitted,
            RemoteStatus::Running => UnitState::Running,
            RemoteStatus::Succeeded => UnitState::Succeeded,
            RemoteStatus::Failed => UnitState::Failed,
            RemoteStatus::Cancelled => UnitState::Cancelled,
        }
    }
}

/// Submits, polls, and cancels work units on one execution environment.
///
/// Handles returned by `submit` are owned by the adapter that issued them
/// and are only ever passed back to that same adapter.
pub trait BackendAdapter: Send + Sync {
    /// Short backend name for logs and job records.
    fn name(&self) -> &'static str;

    /// Start executing `unit`. Returns the handle of the new submission.
    fn submit<'a>(
        &'a self,
        unit: &'a WorkUnit,
    ) -> BackendFuture<'a, Result<BackendHandle, SubmissionError>>;

    /// Query the state of a submission without blocking on it.
    fn poll<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> BackendFuture<'a, Result<RemoteStatus, PollError>>;

    /// Best-effort, idempotent cancellation.
    fn cancel<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, ()>;

    /// Delay between polls of one handle.
    fn poll_interval(&self) -> Duration;
}
