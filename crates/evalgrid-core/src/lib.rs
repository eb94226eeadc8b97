//! evalgrid-core: shared types for the evalgrid workspace.
//!
//! Holds the [`WorkUnit`] model and its lifecycle, the work items fed to the
//! partitioner, and the `evalgrid.toml` configuration types consumed by the
//! partition, backend, and runner crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::EvalGridConfig;
pub use error::{ConfigError, UnitError};
pub use types::*;
