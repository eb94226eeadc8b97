//! evalgrid-backend: execution backends for work units.
//!
//! Every backend implements [`BackendAdapter`]: submit a unit, poll its
//! remote state by handle, cancel it. The runner only ever talks to this
//! trait, so backend choice never leaks into scheduling logic.
//!
//! # Backends
//!
//! ```text
//! BackendAdapter
//!   ├── LocalBackend    runs the task command as a child process;
//!   │                     submit completes the unit, poll is immediate
//!   ├── ClusterBackend  sbatch / squeue / sacct / scancel
//!   └── CloudBackend    two-phase create + start against a job API
//! ```
//!
//! The task body itself is opaque: a [`TaskCommand`] template that receives
//! the unit id and the path of a JSON task file describing the unit.

pub mod adapter;
pub mod cloud;
pub mod cluster;
pub mod command;
pub mod config;
pub mod error;
pub mod http;
pub mod local;

pub use adapter::{BackendAdapter, BackendFuture, RemoteStatus};
pub use cloud::{CloudApi, CloudBackend, CloudEnvironment, CloudJobSpec};
pub use cluster::{ClusterBackend, ClusterConfig, CommandOutput, ProcessCli, SchedulerCli};
pub use command::TaskCommand;
pub use config::build_backend;
pub use error::{CloudApiError, PollError, SubmissionError};
pub use http::HttpCloudApi;
pub use local::{CommandExecutor, LocalBackend, UnitExecutor};
