//! evalgrid-runner: drives work units through a backend.
//!
//! The [`Runner`] is the control loop that:
//! - Admits units FIFO into a fixed number of worker slots
//! - Runs each attempt as its own task (submit, poll, finish)
//! - Re-enqueues failed units while their retry budget lasts
//! - Cancels in-flight attempts and drains the queue on shutdown
//! - Optionally records live attempts in a [`JobStore`](evalgrid_state::JobStore)
//!   so a later process can reattach to them
//!
//! The outcome of a run is a [`RunReport`].

mod attempt;
pub mod config;
pub mod error;
pub mod report;
pub mod runner;

pub use config::RunnerConfig;
pub use error::{RunnerError, RunnerResult};
pub use report::{RunReport, UnitReport};
pub use runner::Runner;
