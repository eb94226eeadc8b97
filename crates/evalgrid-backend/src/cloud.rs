//! Managed cloud backend.
//!
//! Jobs run in containers on a managed compute service. The execution
//! environment (workspace, image, bootstrap script) is validated once at
//! construction and applied to every submission.
//!
//! Submission is two-phase: create the job spec, then start it. If the
//! start fails the created job is stopped and the submission fails as a
//! whole; retrying is left to the runner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use evalgrid_core::{BackendHandle, ConfigError, WorkUnit};

use crate::adapter::{BackendAdapter, BackendFuture, RemoteStatus};
use crate::command::{file_stem, shell_quote, write_task_file, TaskCommand};
use crate::error::{CloudApiError, PollError, SubmissionError};

/// Validated execution environment shared by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEnvironment {
    workspace_id: String,
    image: String,
    bootstrap_script: PathBuf,
}

impl CloudEnvironment {
    /// Validate the environment. The bootstrap script must exist.
    pub fn new(
        workspace_id: impl Into<String>,
        image: impl Into<String>,
        bootstrap_script: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let env = Self {
            workspace_id: workspace_id.into(),
            image: image.into(),
            bootstrap_script: bootstrap_script.into(),
        };
        if env.workspace_id.trim().is_empty() {
            return Err(ConfigError::Missing("backend.workspace_id"));
        }
        if env.image.trim().is_empty() {
            return Err(ConfigError::Missing("backend.image"));
        }
        if !env.bootstrap_script.is_file() {
            return Err(ConfigError::invalid(
                "backend.bootstrap_script",
                format!("{} is not a file", env.bootstrap_script.display()),
            ));
        }
        Ok(env)
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

/// Job definition sent to the service's create call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudJobSpec {
    pub name: String,
    pub workspace_id: String,
    pub image: String,
    /// Shell command run inside the container.
    pub command: String,
    pub worker_count: u32,
    pub env: std::collections::BTreeMap<String, String>,
    /// The unit payload, for services that cannot read the task file.
    pub task: serde_json::Value,
}

/// Remote job service operations.
pub trait CloudApi: Send + Sync {
    /// Create a job; returns the service's job id.
    fn create_job<'a>(
        &'a self,
        spec: &'a CloudJobSpec,
    ) -> BackendFuture<'a, Result<String, CloudApiError>>;

    fn start_job<'a>(&'a self, job_id: &'a str) -> BackendFuture<'a, Result<(), CloudApiError>>;

    /// Raw status string of a job.
    fn job_status<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BackendFuture<'a, Result<String, CloudApiError>>;

    fn stop_job<'a>(&'a self, job_id: &'a str) -> BackendFuture<'a, Result<(), CloudApiError>>;
}

pub struct CloudBackend {
    env: CloudEnvironment,
    api: Arc<dyn CloudApi>,
    work_dir: PathBuf,
    command: TaskCommand,
    worker_count: u32,
    job_name_prefix: String,
    poll_interval: Duration,
}

impl CloudBackend {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(
        env: CloudEnvironment,
        api: Arc<dyn CloudApi>,
        work_dir: impl Into<PathBuf>,
        command: TaskCommand,
    ) -> Self {
        Self {
            env,
            api,
            work_dir: work_dir.into(),
            command,
            worker_count: 1,
            job_name_prefix: "evalgrid".to_string(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_worker_count(mut self, worker_count: u32) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_job_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_name_prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn job_spec(&self, unit: &WorkUnit, task_file: &std::path::Path) -> Result<CloudJobSpec, SubmissionError> {
        let task = serde_json::to_value(unit).map_err(|e| SubmissionError::Prepare(e.to_string()))?;
        Ok(CloudJobSpec {
            name: format!("{}-{}", self.job_name_prefix, file_stem(unit.id())),
            workspace_id: self.env.workspace_id.clone(),
            image: self.env.image.clone(),
            command: format!(
                "bash {} && {}",
                shell_quote(&self.env.bootstrap_script.display().to_string()),
                self.command.shell_line(unit.id(), task_file)
            ),
            worker_count: self.worker_count,
            env: self
                .command
                .env()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            task,
        })
    }
}

impl BackendAdapter for CloudBackend {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn submit<'a>(
        &'a self,
        unit: &'a WorkUnit,
    ) -> BackendFuture<'a, Result<BackendHandle, SubmissionError>> {
        Box::pin(async move {
            let task_file = write_task_file(&self.work_dir, unit).await?;
            let spec = self.job_spec(unit, &task_file)?;

            let job_id = self.api.create_job(&spec).await.map_err(|e| match e {
                CloudApiError::Unavailable(msg) => SubmissionError::Unreachable(msg),
                other => SubmissionError::Rejected(format!("create job: {other}")),
            })?;

            if let Err(e) = self.api.start_job(&job_id).await {
                warn!(unit = %unit.id(), %job_id, error = %e, "job start failed, stopping created job");
                if let Err(stop_err) = self.api.stop_job(&job_id).await {
                    warn!(%job_id, error = %stop_err, "failed to stop half-submitted job");
                }
                return Err(SubmissionError::Rejected(format!("start job {job_id}: {e}")));
            }

            info!(
                unit = %unit.id(),
                %job_id,
                workspace = %self.env.workspace_id,
                "cloud job started"
            );
            Ok(BackendHandle::new(job_id))
        })
    }

    fn poll<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> BackendFuture<'a, Result<RemoteStatus, PollError>> {
        Box::pin(async move {
            let status = self
                .api
                .job_status(handle.as_str())
                .await
                .map_err(|e| match e {
                    CloudApiError::NotFound(id) => PollError::UnknownHandle(id),
                    CloudApiError::Unavailable(msg) => PollError::Transient(msg),
                    other => PollError::Permanent(other.to_string()),
                })?;
            parse_cloud_status(&status)
        })
    }

    fn cancel<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            match self.api.stop_job(handle.as_str()).await {
                Ok(()) => info!(%handle, "cloud job stopped"),
                Err(CloudApiError::NotFound(_)) => {}
                Err(e) => warn!(%handle, error = %e, "failed to stop cloud job"),
            }
        })
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Map a job service status string to a remote status.
pub fn parse_cloud_status(raw: &str) -> Result<RemoteStatus, PollError> {
    let status = match raw.trim().to_ascii_lowercase().as_str() {
        "creating" | "pending" | "queuing" | "bidding" | "envpreparing" | "dequeued" => {
            RemoteStatus::Queued
        }
        "running" | "restarting" | "stopping" => RemoteStatus::Running,
        "succeeded" => RemoteStatus::Succeeded,
        "failed" => RemoteStatus::Failed,
        "stopped" => RemoteStatus::Cancelled,
        other => {
            return Err(PollError::Permanent(format!("unrecognized job status `{other}`")));
        }
    };
    Ok(status)
}
