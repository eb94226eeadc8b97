//! Local backend: runs units on this machine.
//!
//! `submit` starts the unit on its own task and returns at once; `poll`
//! reports whether that task is still going. Concurrency is bounded only by
//! the runner's worker pool.
//!
//! Cancelling aborts the task, which drops the executor future; child
//! processes are spawned with `kill_on_drop`, so they die with it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use evalgrid_core::{BackendHandle, WorkUnit};

use crate::adapter::{BackendAdapter, BackendFuture, RemoteStatus};
use crate::command::{log_file_path, write_task_file, TaskCommand};
use crate::error::{PollError, SubmissionError};

/// Executes one unit in-process and reports its final status.
pub trait UnitExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        unit: &'a WorkUnit,
    ) -> BackendFuture<'a, Result<RemoteStatus, SubmissionError>>;
}

/// Runs the task command as a child process; exit code 0 is success.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    work_dir: PathBuf,
    command: TaskCommand,
}

impl CommandExecutor {
    pub fn new(work_dir: impl Into<PathBuf>, command: TaskCommand) -> Self {
        Self {
            work_dir: work_dir.into(),
            command,
        }
    }
}

impl UnitExecutor for CommandExecutor {
    fn execute<'a>(
        &'a self,
        unit: &'a WorkUnit,
    ) -> BackendFuture<'a, Result<RemoteStatus, SubmissionError>> {
        Box::pin(async move {
            let task_file = write_task_file(&self.work_dir, unit).await?;
            let log_path = log_file_path(&self.work_dir, unit.id());
            let log = std::fs::File::create(&log_path)
                .map_err(|e| SubmissionError::Prepare(format!("{}: {e}", log_path.display())))?;
            let log_err = log
                .try_clone()
                .map_err(|e| SubmissionError::Prepare(e.to_string()))?;

            let mut child = Command::new(self.command.program())
                .args(self.command.render_args(unit.id(), &task_file))
                .envs(self.command.env())
                .env("EVALGRID_UNIT_ID", unit.id())
                .env("EVALGRID_ATTEMPT", unit.attempt().to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::from(log))
                .stderr(Stdio::from(log_err))
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    SubmissionError::Rejected(format!("spawn `{}`: {e}", self.command.program()))
                })?;

            debug!(unit = %unit.id(), pid = ?child.id(), log = %log_path.display(), "task process started");

            let status = child
                .wait()
                .await
                .map_err(|e| SubmissionError::Rejected(format!("wait for task process: {e}")))?;

            if status.success() {
                Ok(RemoteStatus::Succeeded)
            } else {
                warn!(unit = %unit.id(), code = ?status.code(), log = %log_path.display(), "task process failed");
                Ok(RemoteStatus::Failed)
            }
        })
    }
}

type LocalJob = JoinHandle<Result<RemoteStatus, SubmissionError>>;

/// Backend that executes units in-process through a [`UnitExecutor`].
pub struct LocalBackend {
    executor: Arc<dyn UnitExecutor>,
    /// Jobs not yet reported terminal or cancelled.
    jobs: Mutex<HashMap<BackendHandle, LocalJob>>,
    next_id: AtomicU64,
    poll_interval: Duration,
}

impl LocalBackend {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(executor: Arc<dyn UnitExecutor>) -> Self {
        Self {
            executor,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Local backend running `command` as a child process per unit.
    pub fn with_command(work_dir: impl Into<PathBuf>, command: TaskCommand) -> Self {
        Self::new(Arc::new(CommandExecutor::new(work_dir, command)))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        for (_, job) in self.jobs.get_mut().drain() {
            job.abort();
        }
    }
}

impl BackendAdapter for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn submit<'a>(
        &'a self,
        unit: &'a WorkUnit,
    ) -> BackendFuture<'a, Result<BackendHandle, SubmissionError>> {
        Box::pin(async move {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            let handle = BackendHandle::new(format!("local-{n}"));

            let executor = Arc::clone(&self.executor);
            let owned = unit.clone();
            let job_handle = handle.clone();
            let job = tokio::spawn(async move {
                let result = executor.execute(&owned).await;
                match &result {
                    Ok(status) => {
                        info!(unit = %owned.id(), handle = %job_handle, ?status, "local unit finished");
                    }
                    Err(e) => {
                        warn!(unit = %owned.id(), handle = %job_handle, error = %e, "local unit could not run");
                    }
                }
                result
            });

            self.jobs.lock().await.insert(handle.clone(), job);
            debug!(unit = %unit.id(), %handle, "local unit started");
            Ok(handle)
        })
    }

    fn poll<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> BackendFuture<'a, Result<RemoteStatus, PollError>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            let job = match jobs.remove(handle) {
                None => return Err(PollError::UnknownHandle(handle.to_string())),
                Some(job) if !job.is_finished() => {
                    jobs.insert(handle.clone(), job);
                    return Ok(RemoteStatus::Running);
                }
                Some(job) => job,
            };
            drop(jobs);

            // Already finished, so this resolves at once. The entry is gone:
            // a terminal status is reported once.
            let status = match job.await {
                Ok(Ok(status)) => status,
                Ok(Err(_)) => RemoteStatus::Failed,
                Err(e) if e.is_cancelled() => RemoteStatus::Cancelled,
                Err(e) => {
                    warn!(%handle, error = %e, "local unit task panicked");
                    RemoteStatus::Failed
                }
            };
            Ok(status)
        })
    }

    fn cancel<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            match self.jobs.lock().await.remove(handle) {
                Some(job) => {
                    job.abort();
                    info!(%handle, "local unit aborted");
                }
                None => debug!(%handle, "cancel on unknown or finished local unit ignored"),
            }
        })
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalgrid_core::{Assignment, InferenceMode, ItemRange};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn unit(dataset: &str) -> WorkUnit {
        WorkUnit::new(
            vec![Assignment {
                model: "m".to_string(),
                dataset: dataset.to_string(),
                mode: InferenceMode::Generative,
                range: ItemRange::new(0, 10),
            }],
            200,
        )
        .unwrap()
    }

    /// Fails units whose dataset is "bad", errors on "broken", and holds
    /// "gated" units until `gate` is notified. Counts executions and drops.
    struct ScriptedExecutor {
        calls: AtomicUsize,
        dropped: Arc<AtomicUsize>,
        gate: Notify,
    }

    impl ScriptedExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                dropped: Arc::new(AtomicUsize::new(0)),
                gate: Notify::new(),
            })
        }
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl UnitExecutor for ScriptedExecutor {
        fn execute<'a>(
            &'a self,
            unit: &'a WorkUnit,
        ) -> BackendFuture<'a, Result<RemoteStatus, SubmissionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let _guard = DropCounter(Arc::clone(&self.dropped));
                match unit.primary().dataset.as_str() {
                    "bad" => Ok(RemoteStatus::Failed),
                    "broken" => Err(SubmissionError::Rejected("no such program".to_string())),
                    "gated" => {
                        self.gate.notified().await;
                        Ok(RemoteStatus::Succeeded)
                    }
                    _ => Ok(RemoteStatus::Succeeded),
                }
            })
        }
    }

    fn backend(exec: &Arc<ScriptedExecutor>) -> LocalBackend {
        LocalBackend::new(exec.clone()).with_poll_interval(Duration::from_millis(1))
    }

    /// Poll until the unit is no longer running.
    async fn settle(
        backend: &LocalBackend,
        handle: &BackendHandle,
    ) -> Result<RemoteStatus, PollError> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match backend.poll(handle).await {
                    Ok(RemoteStatus::Running) => tokio::time::sleep(Duration::from_millis(1)).await,
                    other => return other,
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn submit_returns_while_the_unit_runs() {
        let exec = ScriptedExecutor::new();
        let backend = backend(&exec);

        let handle = backend.submit(&unit("gated")).await.unwrap();
        assert_eq!(backend.poll(&handle).await.unwrap(), RemoteStatus::Running);

        exec.gate.notify_one();
        assert_eq!(settle(&backend, &handle).await.unwrap(), RemoteStatus::Succeeded);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poll_reports_final_status_once() {
        let exec = ScriptedExecutor::new();
        let backend = backend(&exec);

        let ok = backend.submit(&unit("good")).await.unwrap();
        let bad = backend.submit(&unit("bad")).await.unwrap();
        let broken = backend.submit(&unit("broken")).await.unwrap();

        assert_ne!(ok, bad);
        assert_eq!(settle(&backend, &ok).await.unwrap(), RemoteStatus::Succeeded);
        assert_eq!(settle(&backend, &bad).await.unwrap(), RemoteStatus::Failed);
        assert_eq!(settle(&backend, &broken).await.unwrap(), RemoteStatus::Failed);

        let err = backend.poll(&ok).await.unwrap_err();
        assert!(matches!(err, PollError::UnknownHandle(_)));
        assert!(backend.jobs.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_handle_is_reported() {
        let backend = backend(&ScriptedExecutor::new());
        let err = backend.poll(&BackendHandle::new("local-99")).await.unwrap_err();
        assert!(matches!(err, PollError::UnknownHandle(_)));
    }

    #[tokio::test]
    async fn cancel_aborts_the_running_unit() {
        let exec = ScriptedExecutor::new();
        let backend = backend(&exec);
        let handle = backend.submit(&unit("gated")).await.unwrap();
        while exec.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(backend.poll(&handle).await.unwrap(), RemoteStatus::Running);

        backend.cancel(&handle).await;
        backend.cancel(&handle).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while exec.dropped.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert!(backend.jobs.lock().await.is_empty());
        assert!(matches!(
            backend.poll(&handle).await.unwrap_err(),
            PollError::UnknownHandle(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_executor_maps_exit_codes() {
        let argv = |script: &str| vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let u = unit("good");

        let ok_dir = tempfile::tempdir().unwrap();
        let ok = CommandExecutor::new(
            ok_dir.path(),
            TaskCommand::from_argv(&argv("echo \"$EVALGRID_UNIT_ID\"")).unwrap(),
        );
        assert_eq!(ok.execute(&u).await.unwrap(), RemoteStatus::Succeeded);
        let log = std::fs::read_to_string(log_file_path(ok_dir.path(), u.id())).unwrap();
        assert_eq!(log.trim(), u.id());

        let fail_dir = tempfile::tempdir().unwrap();
        let failing = CommandExecutor::new(
            fail_dir.path(),
            TaskCommand::from_argv(&argv("exit 3")).unwrap(),
        );
        assert_eq!(failing.execute(&u).await.unwrap(), RemoteStatus::Failed);
    }

    #[tokio::test]
    async fn missing_program_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::new(
            dir.path(),
            TaskCommand::from_argv(&["/nonexistent/evalgrid-task".to_string()]).unwrap(),
        );
        let err = exec.execute(&unit("good")).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(_)));
    }
}
