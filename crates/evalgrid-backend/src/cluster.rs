//! Cluster scheduler backend (Slurm-style batch queue).
//!
//! - `submit` → `sbatch --parsable ... --wrap "<task command>"`
//! - `poll`   → `squeue -h -j <id> -o %T`, falling back to `sacct` once the
//!   job has left the queue
//! - `cancel` → `scancel <id>`
//!
//! Scheduler commands run through a [`SchedulerCli`], so tests (and sites
//! with wrapper scripts) can substitute their own executor.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use evalgrid_core::{BackendHandle, ConfigError, WorkUnit};

use crate::adapter::{BackendAdapter, BackendFuture, RemoteStatus};
use crate::command::{file_stem, log_file_path, write_task_file, TaskCommand};
use crate::error::{PollError, SubmissionError};

/// Captured result of one scheduler command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs scheduler client commands.
pub trait SchedulerCli: Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BackendFuture<'a, std::io::Result<CommandOutput>>;
}

/// Runs scheduler commands as local child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCli;

impl SchedulerCli for ProcessCli {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BackendFuture<'a, std::io::Result<CommandOutput>> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;
            Ok(CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub work_dir: PathBuf,
    pub command: TaskCommand,
    /// Resource partition jobs are queued on.
    pub partition: String,
    /// Passed through as `--qos`.
    pub priority_class: Option<String>,
    /// Passed through as `--quotatype`.
    pub quota_tag: Option<String>,
    /// GPUs requested per unit; zero requests none.
    pub workers_per_unit: u32,
    pub extra_args: Vec<String>,
    pub job_name_prefix: String,
    pub poll_interval: Duration,
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition.trim().is_empty() {
            return Err(ConfigError::invalid("backend.partition", "must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "backend.poll_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

pub struct ClusterBackend {
    config: ClusterConfig,
    cli: Arc<dyn SchedulerCli>,
}

impl ClusterBackend {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(config: ClusterConfig) -> Result<Self, ConfigError> {
        Self::with_cli(config, Arc::new(ProcessCli))
    }

    pub fn with_cli(config: ClusterConfig, cli: Arc<dyn SchedulerCli>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, cli })
    }

    /// `sbatch` arguments for one unit attempt.
    fn sbatch_args(&self, unit: &WorkUnit, task_file: &std::path::Path) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![
            "--parsable".to_string(),
            format!("--job-name={}-{}", c.job_name_prefix, file_stem(unit.id())),
            format!("--partition={}", c.partition),
            format!(
                "--output={}",
                log_file_path(&c.work_dir, unit.id()).display()
            ),
        ];
        if c.workers_per_unit > 0 {
            args.push(format!("--gres=gpu:{}", c.workers_per_unit));
        }
        if let Some(qos) = &c.priority_class {
            args.push(format!("--qos={qos}"));
        }
        if let Some(tag) = &c.quota_tag {
            args.push(format!("--quotatype={tag}"));
        }
        if !c.command.env().is_empty() {
            let mut vars: Vec<_> = c
                .command
                .env()
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            vars.sort();
            args.push(format!("--export=ALL,{}", vars.join(",")));
        }
        args.extend(c.extra_args.iter().cloned());
        args.push(format!(
            "--wrap={}",
            c.command.shell_line(unit.id(), task_file)
        ));
        args
    }

    async fn sacct_state(&self, handle: &BackendHandle) -> Result<RemoteStatus, PollError> {
        let args = vec![
            "-n".to_string(),
            "-X".to_string(),
            "-P".to_string(),
            "-j".to_string(),
            handle.to_string(),
            "-o".to_string(),
            "State".to_string(),
        ];
        let out = self
            .cli
            .run("sacct", &args)
            .await
            .map_err(|e| PollError::Transient(format!("sacct: {e}")))?;
        if !out.success {
            return Err(PollError::Transient(format!("sacct: {}", out.stderr.trim())));
        }
        match out.stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(state) => parse_slurm_state(state),
            None => Err(PollError::UnknownHandle(handle.to_string())),
        }
    }
}

impl BackendAdapter for ClusterBackend {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn submit<'a>(
        &'a self,
        unit: &'a WorkUnit,
    ) -> BackendFuture<'a, Result<BackendHandle, SubmissionError>> {
        Box::pin(async move {
            let task_file = write_task_file(&self.config.work_dir, unit).await?;
            let args = self.sbatch_args(unit, &task_file);
            debug!(unit = %unit.id(), ?args, "running sbatch");

            let out = self
                .cli
                .run("sbatch", &args)
                .await
                .map_err(|e| SubmissionError::Unreachable(format!("sbatch: {e}")))?;
            if !out.success {
                return Err(SubmissionError::Rejected(out.stderr.trim().to_string()));
            }

            // `--parsable` prints `<job_id>` or `<job_id>;<cluster>`.
            let job_id = out
                .stdout
                .lines()
                .next()
                .and_then(|l| l.split(';').next())
                .map(str::trim)
                .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
                .ok_or_else(|| {
                    SubmissionError::Rejected(format!(
                        "unparseable sbatch output: {:?}",
                        out.stdout.trim()
                    ))
                })?;

            let handle = BackendHandle::new(job_id);
            info!(
                unit = %unit.id(),
                %handle,
                partition = %self.config.partition,
                "cluster job submitted"
            );
            Ok(handle)
        })
    }

    fn poll<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> BackendFuture<'a, Result<RemoteStatus, PollError>> {
        Box::pin(async move {
            let args = vec![
                "-h".to_string(),
                "-j".to_string(),
                handle.to_string(),
                "-o".to_string(),
                "%T".to_string(),
            ];
            let out = self
                .cli
                .run("squeue", &args)
                .await
                .map_err(|e| PollError::Transient(format!("squeue: {e}")))?;

            if out.success {
                if let Some(state) = out.stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
                    return parse_slurm_state(state);
                }
            } else if !out.stderr.contains("Invalid job id") {
                return Err(PollError::Transient(format!("squeue: {}", out.stderr.trim())));
            }

            // Finished jobs drop out of the queue; ask accounting.
            self.sacct_state(handle).await
        })
    }

    fn cancel<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let args = vec![handle.to_string()];
            match self.cli.run("scancel", &args).await {
                Ok(out) if out.success => info!(%handle, "cluster job cancelled"),
                Ok(out) => warn!(%handle, stderr = %out.stderr.trim(), "scancel failed"),
                Err(e) => warn!(%handle, error = %e, "scancel failed"),
            }
        })
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }
}

/// Map a Slurm job state name (squeue `%T` / sacct `State`) to a status.
pub fn parse_slurm_state(raw: &str) -> Result<RemoteStatus, PollError> {
    // sacct reports e.g. "CANCELLED by 1234".
    let state = raw.split_whitespace().next().unwrap_or_default();
    let status = match state.trim_end_matches('+') {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED"
        | "RESV_DEL_HOLD" | "SUSPENDED" => RemoteStatus::Queued,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" | "RESIZING" | "STOPPED" => {
            RemoteStatus::Running
        }
        "COMPLETED" => RemoteStatus::Succeeded,
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE"
        | "PREEMPTED" | "SPECIAL_EXIT" | "REVOKED" => RemoteStatus::Failed,
        "CANCELLED" => RemoteStatus::Cancelled,
        other => {
            return Err(PollError::Permanent(format!("unrecognized job state `{other}`")));
        }
    };
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalgrid_core::{Assignment, InferenceMode, ItemRange};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Replays scripted outputs per program and records every call.
    #[derive(Default)]
    struct ScriptedCli {
        replies: Mutex<HashMap<String, VecDeque<std::io::Result<CommandOutput>>>>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ScriptedCli {
        fn reply(&self, program: &str, success: bool, stdout: &str, stderr: &str) {
            self.replies
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(Ok(CommandOutput {
                    success,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                }));
        }

        fn io_error(&self, program: &str) {
            self.replies
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "not installed",
                )));
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SchedulerCli for ScriptedCli {
        fn run<'a>(
            &'a self,
            program: &'a str,
            args: &'a [String],
        ) -> BackendFuture<'a, std::io::Result<CommandOutput>> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get_mut(program)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Ok(CommandOutput::default()));
            Box::pin(async move { reply })
        }
    }

    fn config(work_dir: &std::path::Path) -> ClusterConfig {
        ClusterConfig {
            work_dir: work_dir.to_path_buf(),
            command: TaskCommand::from_argv(&[
                "python".to_string(),
                "run.py".to_string(),
                "{task_file}".to_string(),
            ])
            .unwrap(),
            partition: "llm".to_string(),
            priority_class: Some("high".to_string()),
            quota_tag: Some("reserved".to_string()),
            workers_per_unit: 2,
            extra_args: vec!["--time=04:00:00".to_string()],
            job_name_prefix: "evalgrid".to_string(),
            poll_interval: Duration::from_secs(10),
        }
    }

    fn unit() -> WorkUnit {
        WorkUnit::new(
            vec![Assignment {
                model: "llama".to_string(),
                dataset: "gsm8k".to_string(),
                mode: InferenceMode::Generative,
                range: ItemRange::new(0, 100),
            }],
            2000,
        )
        .unwrap()
    }

    fn backend(dir: &std::path::Path) -> (ClusterBackend, Arc<ScriptedCli>) {
        let cli = Arc::new(ScriptedCli::default());
        let backend = ClusterBackend::with_cli(config(dir), cli.clone()).unwrap();
        (backend, cli)
    }

    #[test]
    fn rejects_empty_partition() {
        let mut c = config(std::path::Path::new("/tmp"));
        c.partition = " ".to_string();
        assert!(ClusterBackend::new(c).is_err());
    }

    #[tokio::test]
    async fn submit_passes_resource_hints_through() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("sbatch", true, "4242;cluster-a\n", "");

        let handle = backend.submit(&unit()).await.unwrap();
        assert_eq!(handle.as_str(), "4242");

        let calls = cli.calls();
        let (program, args) = &calls[0];
        assert_eq!(program, "sbatch");
        assert!(args.contains(&"--parsable".to_string()));
        assert!(args.contains(&"--partition=llm".to_string()));
        assert!(args.contains(&"--qos=high".to_string()));
        assert!(args.contains(&"--quotatype=reserved".to_string()));
        assert!(args.contains(&"--gres=gpu:2".to_string()));
        assert!(args.contains(&"--time=04:00:00".to_string()));
        let wrap = args.last().unwrap();
        assert!(wrap.starts_with("--wrap=python run.py "));
        assert!(wrap.contains("tasks/llama%2Fgsm8k[0..100].json"));
    }

    #[tokio::test]
    async fn submit_rejection_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("sbatch", false, "", "sbatch: error: QOSMaxSubmitJobPerUserLimit\n");

        let err = backend.submit(&unit()).await.unwrap_err();
        assert_eq!(
            err,
            SubmissionError::Rejected("sbatch: error: QOSMaxSubmitJobPerUserLimit".to_string())
        );
    }

    #[tokio::test]
    async fn submit_rejects_garbage_output() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("sbatch", true, "Submitted batch job\n", "");
        assert!(matches!(
            backend.submit(&unit()).await,
            Err(SubmissionError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn poll_reads_queue_state() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("squeue", true, "PENDING\n", "");
        cli.reply("squeue", true, "RUNNING\n", "");

        let h = BackendHandle::new("4242");
        assert_eq!(backend.poll(&h).await.unwrap(), RemoteStatus::Queued);
        assert_eq!(backend.poll(&h).await.unwrap(), RemoteStatus::Running);
    }

    #[tokio::test]
    async fn poll_falls_back_to_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("squeue", false, "", "slurm_load_jobs error: Invalid job id specified\n");
        cli.reply("sacct", true, "COMPLETED\n", "");
        cli.reply("squeue", true, "", "");
        cli.reply("sacct", true, "CANCELLED by 1001\n", "");

        let h = BackendHandle::new("4242");
        assert_eq!(backend.poll(&h).await.unwrap(), RemoteStatus::Succeeded);
        assert_eq!(backend.poll(&h).await.unwrap(), RemoteStatus::Cancelled);
    }

    #[tokio::test]
    async fn poll_unknown_job_is_unknown_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("squeue", false, "", "Invalid job id specified\n");
        cli.reply("sacct", true, "\n", "");

        let err = backend.poll(&BackendHandle::new("1")).await.unwrap_err();
        assert!(matches!(err, PollError::UnknownHandle(_)));
    }

    #[tokio::test]
    async fn controller_outage_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("squeue", false, "", "slurm_load_jobs error: Socket timed out\n");
        cli.io_error("squeue");

        let h = BackendHandle::new("4242");
        assert!(backend.poll(&h).await.unwrap_err().is_transient());
        assert!(backend.poll(&h).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn cancel_runs_scancel_even_when_it_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cli) = backend(dir.path());
        cli.reply("scancel", false, "", "scancel: error: Invalid job id\n");

        let h = BackendHandle::new("4242");
        backend.cancel(&h).await;
        backend.cancel(&h).await;
        let scancels = cli.calls().into_iter().filter(|(p, _)| p == "scancel").count();
        assert_eq!(scancels, 2);
    }

    #[test]
    fn slurm_state_mapping() {
        assert_eq!(parse_slurm_state("PENDING").unwrap(), RemoteStatus::Queued);
        assert_eq!(parse_slurm_state("COMPLETING").unwrap(), RemoteStatus::Running);
        assert_eq!(parse_slurm_state("COMPLETED").unwrap(), RemoteStatus::Succeeded);
        assert_eq!(parse_slurm_state("TIMEOUT").unwrap(), RemoteStatus::Failed);
        assert_eq!(parse_slurm_state("OUT_OF_MEMORY").unwrap(), RemoteStatus::Failed);
        assert_eq!(parse_slurm_state("CANCELLED+").unwrap(), RemoteStatus::Cancelled);
        assert!(matches!(
            parse_slurm_state("MYSTERY"),
            Err(PollError::Permanent(_))
        ));
    }
}
