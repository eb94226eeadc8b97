//! Backend error types.

use thiserror::Error;

/// The backend refused or failed to start a unit.
///
/// Counts toward the unit's retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("backend rejected unit: {0}")]
    Rejected(String),

    #[error("failed to prepare task: {0}")]
    Prepare(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

/// A status query failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Backend temporarily unreachable; retry the poll with backoff.
    /// Does not consume the unit's retry budget.
    #[error("transient poll failure: {0}")]
    Transient(String),

    /// The query cannot succeed; the attempt is treated as failed.
    #[error("permanent poll failure: {0}")]
    Permanent(String),

    /// The backend has no record of the handle (stale after a restart).
    #[error("unknown handle: {0}")]
    UnknownHandle(String),
}

impl PollError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PollError::Transient(_))
    }
}

/// Errors from a managed cloud job service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudApiError {
    #[error("job not found: {0}")]
    NotFound(String),

    /// Connection failure, timeout, or server-side (5xx) error.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request (4xx other than 404).
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed response: {0}")]
    Protocol(String),
}
