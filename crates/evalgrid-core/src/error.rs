//! Error types shared across evalgrid crates.

use thiserror::Error;

use crate::types::UnitState;

/// Invalid partitioner, backend, or runner configuration.
///
/// Always fatal, and always surfaced before any unit is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("unknown {kind} `{name}`")]
    Unknown { kind: &'static str, name: String },

    #[error("duplicate work unit id: {0}")]
    DuplicateUnit(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while building or transitioning a [`WorkUnit`](crate::WorkUnit).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("work unit has no assignments")]
    NoAssignments,

    #[error("empty range [{start}, {end}) for {model}/{dataset}")]
    EmptyRange {
        model: String,
        dataset: String,
        start: u64,
        end: u64,
    },

    #[error("empty model or dataset reference")]
    EmptyReference,

    #[error("estimated cost must be positive")]
    NonPositiveCost,

    #[error("unit id `{recorded}` does not match its assignments (expected `{derived}`)")]
    IdMismatch { recorded: String, derived: String },

    #[error("illegal transition for unit {id}: {from:?} -> {to:?}")]
    IllegalTransition {
        id: String,
        from: UnitState,
        to: UnitState,
    },
}
