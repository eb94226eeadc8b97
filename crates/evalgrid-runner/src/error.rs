//! Runner error types.

use thiserror::Error;

use evalgrid_core::{ConfigError, UnitError};

/// Errors that abort a whole run.
///
/// Per-unit failures never surface here; they end up in the
/// [`RunReport`](crate::RunReport).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("job store error: {0}")]
    State(#[from] evalgrid_state::StateError),

    #[error("unit lifecycle error: {0}")]
    Unit(#[from] UnitError),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
