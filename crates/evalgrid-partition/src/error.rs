//! Partitioner error types.

use thiserror::Error;

use evalgrid_core::{ConfigError, UnitError};

pub type PartitionResult<T> = Result<T, PartitionError>;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid work item {model}/{dataset}: {reason}")]
    InvalidItem {
        model: String,
        dataset: String,
        reason: String,
    },

    #[error("duplicate work item {model}/{dataset}")]
    DuplicatePair { model: String, dataset: String },

    #[error("no known size for dataset `{0}`")]
    UnknownDatasetSize(String),

    #[error("size cache error: {0}")]
    SizeCache(String),

    #[error("invalid work unit: {0}")]
    Unit(#[from] UnitError),
}
