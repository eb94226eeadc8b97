//! One attempt of one unit: submit, poll to a terminal state, clean up.
//!
//! Each attempt runs as its own task and owns its unit until it returns.
//! It ends in exactly one of Succeeded, Failed, or Cancelled; the control
//! loop decides what happens next.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use evalgrid_backend::{BackendAdapter, PollError};
use evalgrid_core::{epoch_secs, UnitState, WorkUnit};
use evalgrid_state::{JobStore, RunnerJob};

/// Shared by every attempt of a run.
pub(crate) struct AttemptContext {
    pub backend: Arc<dyn BackendAdapter>,
    pub store: Option<JobStore>,
    pub unit_timeout: Option<Duration>,
    pub max_poll_backoff: Duration,
}

/// What an attempt hands back to the control loop.
pub(crate) struct AttemptOutcome {
    /// The unit, in a terminal state for this attempt.
    pub unit: WorkUnit,
    pub error: Option<String>,
}

enum Interrupt {
    Finished(UnitState, Option<String>),
    Cancelled,
    TimedOut(Duration),
}

/// Smallest delay between transient-failure polls.
const MIN_POLL_BACKOFF: Duration = Duration::from_millis(1);

impl AttemptContext {
    pub async fn run(
        self: Arc<Self>,
        mut unit: WorkUnit,
        mut cancel: watch::Receiver<bool>,
    ) -> AttemptOutcome {
        let deadline = self.unit_timeout.map(|t| (Instant::now() + t, t));

        // Submission is never interrupted: a half-finished submit could leave
        // a remote job behind without a handle to cancel it by.
        let submitted = if unit.state() == UnitState::Pending {
            self.submit(&mut unit).await
        } else {
            debug!(unit = %unit.id(), state = %unit.state(), "reattaching to submitted unit");
            Ok(())
        };

        let interrupt = match submitted {
            Err(error) => Interrupt::Finished(UnitState::Failed, Some(error)),
            Ok(()) => {
                let work = self.watch(&mut unit);
                tokio::pin!(work);
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => Interrupt::Cancelled,
                    timeout = expired(deadline) => Interrupt::TimedOut(timeout),
                    (state, error) = &mut work => Interrupt::Finished(state, error),
                }
            }
        };

        let (state, error) = match interrupt {
            Interrupt::Finished(state, error) => (state, error),
            Interrupt::Cancelled => {
                self.cancel_remote(&unit).await;
                (UnitState::Cancelled, None)
            }
            Interrupt::TimedOut(timeout) => {
                warn!(unit = %unit.id(), attempt = unit.attempt(), ?timeout, "attempt timed out");
                self.cancel_remote(&unit).await;
                (
                    UnitState::Failed,
                    Some(format!("timed out after {timeout:?}")),
                )
            }
        };

        if let Err(e) = unit.finish(state) {
            warn!(unit = %unit.id(), error = %e, "could not record attempt outcome");
        }
        self.forget(&unit);

        match state {
            UnitState::Succeeded => info!(unit = %unit.id(), attempt = unit.attempt(), "attempt succeeded"),
            UnitState::Cancelled => info!(unit = %unit.id(), attempt = unit.attempt(), "attempt cancelled"),
            _ => warn!(
                unit = %unit.id(),
                attempt = unit.attempt(),
                error = error.as_deref().unwrap_or("unknown"),
                "attempt failed"
            ),
        }
        AttemptOutcome { unit, error }
    }

    /// Submit a pending unit and record its handle.
    async fn submit(&self, unit: &mut WorkUnit) -> Result<(), String> {
        let handle = self.backend.submit(unit).await.map_err(|e| e.to_string())?;
        info!(
            unit = %unit.id(),
            attempt = unit.attempt(),
            %handle,
            backend = self.backend.name(),
            "unit submitted"
        );
        unit.mark_submitted(handle).map_err(|e| e.to_string())?;
        self.remember(unit);
        Ok(())
    }

    /// Poll a submitted unit until the backend reports a terminal status.
    /// Returns the unit's terminal state for this attempt.
    async fn watch(&self, unit: &mut WorkUnit) -> (UnitState, Option<String>) {
        let Some(handle) = unit.backend_handle().cloned() else {
            return (
                UnitState::Failed,
                Some(format!("unit in state {} has no backend handle", unit.state())),
            );
        };

        let interval = self.backend.poll_interval();
        let base_backoff = interval.max(MIN_POLL_BACKOFF);
        let mut backoff = base_backoff;

        loop {
            match self.backend.poll(&handle).await {
                Ok(status) => {
                    backoff = base_backoff;
                    self.touch(unit);
                    match status.unit_state() {
                        UnitState::Running => {
                            if unit.state() == UnitState::Submitted {
                                debug!(unit = %unit.id(), %handle, "unit running");
                            }
                            if let Err(e) = unit.mark_running() {
                                return (UnitState::Failed, Some(e.to_string()));
                            }
                        }
                        UnitState::Succeeded => return (UnitState::Succeeded, None),
                        UnitState::Failed => {
                            return (
                                UnitState::Failed,
                                Some(format!("backend reported failure for {handle}")),
                            );
                        }
                        UnitState::Cancelled => {
                            return (
                                UnitState::Cancelled,
                                Some(format!("backend cancelled {handle}")),
                            );
                        }
                        UnitState::Pending | UnitState::Submitted => {}
                    }
                    tokio::time::sleep(interval).await;
                }
                Err(PollError::Transient(msg)) => {
                    debug!(unit = %unit.id(), %handle, error = %msg, ?backoff, "transient poll failure, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_poll_backoff);
                }
                Err(e) => return (UnitState::Failed, Some(e.to_string())),
            }
        }
    }

    async fn cancel_remote(&self, unit: &WorkUnit) {
        if let Some(handle) = unit.backend_handle() {
            debug!(unit = %unit.id(), %handle, "cancelling remote attempt");
            self.backend.cancel(handle).await;
        }
    }

    fn remember(&self, unit: &WorkUnit) {
        let (Some(store), Some(handle)) = (&self.store, unit.backend_handle()) else {
            return;
        };
        let now = epoch_secs();
        let job = RunnerJob {
            unit_id: unit.id().to_string(),
            backend: self.backend.name().to_string(),
            handle: handle.clone(),
            attempt: unit.attempt(),
            started_at: now,
            last_poll_at: now,
        };
        if let Err(e) = store.put_job(&job) {
            warn!(unit = %unit.id(), error = %e, "failed to record runner job");
        }
    }

    fn touch(&self, unit: &WorkUnit) {
        if let Some(store) = &self.store {
            if let Err(e) = store.touch_job(unit.id(), epoch_secs()) {
                debug!(unit = %unit.id(), error = %e, "failed to update runner job");
            }
        }
    }

    fn forget(&self, unit: &WorkUnit) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete_job(unit.id()) {
                warn!(unit = %unit.id(), error = %e, "failed to delete runner job");
            }
        }
    }
}

/// Resolves once the run has been asked to stop.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling: never resolves.
            std::future::pending::<()>().await;
        }
    }
}

async fn expired(deadline: Option<(Instant, Duration)>) -> Duration {
    match deadline {
        Some((at, timeout)) => {
            tokio::time::sleep_until(at).await;
            timeout
        }
        None => std::future::pending().await,
    }
}
