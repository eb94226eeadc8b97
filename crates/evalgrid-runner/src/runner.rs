//! Runner: the control loop that drives units through a backend.
//!
//! The loop is the single owner of the worker slots: it admits units from
//! the Pending queue while slots are free, and frees a slot only when the
//! attempt's task has returned. Completions are handled in whatever order
//! they arrive.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use evalgrid_backend::BackendAdapter;
use evalgrid_core::{ConfigError, UnitState, WorkUnit};
use evalgrid_state::JobStore;

use crate::attempt::{cancelled, AttemptContext, AttemptOutcome};
use crate::config::RunnerConfig;
use crate::error::RunnerResult;
use crate::report::RunReport;

pub struct Runner {
    backend: Arc<dyn BackendAdapter>,
    config: RunnerConfig,
    store: Option<JobStore>,
}

impl Runner {
    /// Create a runner. Fails if the configuration is invalid.
    pub fn new(backend: Arc<dyn BackendAdapter>, config: RunnerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            store: None,
        })
    }

    /// Record live attempts in `store` so they survive a restart.
    pub fn with_store(mut self, store: JobStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach stored handles to units that are still Pending.
    ///
    /// Only jobs recorded by a backend with the same name are reattached.
    /// Returns the number of units that now carry a handle.
    pub fn reattach(&self, units: &mut [WorkUnit]) -> RunnerResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut jobs: HashMap<String, _> = store
            .list_jobs()?
            .into_iter()
            .map(|job| (job.unit_id.clone(), job))
            .collect();

        let mut reattached = 0;
        for unit in units.iter_mut() {
            if unit.state() != UnitState::Pending {
                continue;
            }
            let Some(job) = jobs.remove(unit.id()) else {
                continue;
            };
            if job.backend != self.backend.name() {
                warn!(
                    unit = %unit.id(),
                    recorded = %job.backend,
                    current = self.backend.name(),
                    "stored job belongs to another backend, ignoring"
                );
                continue;
            }
            // The retry bound may have been lowered since the job was recorded.
            let attempt = job.attempt.min(self.config.max_retries);
            if attempt < job.attempt {
                warn!(
                    unit = %unit.id(),
                    recorded = job.attempt,
                    max_retries = self.config.max_retries,
                    "stored attempt exceeds the retry bound, clamping"
                );
            }
            unit.resume(job.handle.clone(), attempt)?;
            info!(unit = %unit.id(), handle = %job.handle, attempt, "reattached unit");
            reattached += 1;
        }
        Ok(reattached)
    }

    /// Drive `units` to terminal states.
    ///
    /// Units arriving Submitted or Running with a handle are polled rather
    /// than resubmitted. Setting `shutdown` to true cancels in-flight
    /// attempts and reports every unit not yet finished as Cancelled.
    pub async fn run(
        &self,
        units: Vec<WorkUnit>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunnerResult<RunReport> {
        {
            let mut seen = HashSet::new();
            for unit in &units {
                if !seen.insert(unit.id()) {
                    return Err(ConfigError::DuplicateUnit(unit.id().to_string()).into());
                }
            }
        }

        let started = Instant::now();
        let order: HashMap<String, usize> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.id().to_string(), i))
            .collect();

        let mut report = RunReport::new(self.backend.name());
        let mut queue = VecDeque::with_capacity(units.len());
        for unit in units {
            if unit.state().is_terminal() {
                debug!(unit = %unit.id(), state = %unit.state(), "unit already finished");
                report.record(&unit, None);
            } else {
                queue.push_back(unit);
            }
        }

        info!(
            units = queue.len(),
            max_workers = self.config.max_workers,
            max_retries = self.config.max_retries,
            backend = self.backend.name(),
            "run started"
        );

        let ctx = Arc::new(AttemptContext {
            backend: self.backend.clone(),
            store: self.store.clone(),
            unit_timeout: self.config.unit_timeout,
            max_poll_backoff: self.config.max_poll_backoff,
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks: JoinSet<AttemptOutcome> = JoinSet::new();
        // Latest known copy of each unit with an attempt in flight.
        let mut in_flight: HashMap<String, WorkUnit> = HashMap::new();
        let mut last_errors: HashMap<String, String> = HashMap::new();
        let mut stopping = *shutdown.borrow_and_update();

        loop {
            while !stopping && tasks.len() < self.config.max_workers {
                let Some(unit) = queue.pop_front() else {
                    break;
                };
                debug!(unit = %unit.id(), attempt = unit.attempt(), in_flight = tasks.len() + 1, "admitting unit");
                in_flight.insert(unit.id().to_string(), unit.clone());
                tasks.spawn(ctx.clone().run(unit, cancel_rx.clone()));
            }
            report.peak_in_flight = report.peak_in_flight.max(tasks.len());

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        let AttemptOutcome { mut unit, error } = outcome;
                        in_flight.remove(unit.id());
                        if let Some(error) = error {
                            last_errors.insert(unit.id().to_string(), error);
                        }

                        let retried = unit.state() == UnitState::Failed
                            && !stopping
                            && unit.retry(self.config.max_retries)?;
                        if retried {
                            info!(
                                unit = %unit.id(),
                                attempt = unit.attempt(),
                                max_retries = self.config.max_retries,
                                "retrying unit"
                            );
                            queue.push_back(unit);
                        } else {
                            if unit.state() == UnitState::Failed && !stopping {
                                warn!(unit = %unit.id(), attempts = unit.attempt() + 1, "retry budget exhausted");
                            }
                            let error = last_errors.remove(unit.id());
                            report.record(&unit, error);
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "attempt task aborted");
                    }
                    None => {}
                },
                _ = cancelled(&mut shutdown), if !stopping => {
                    info!(
                        in_flight = tasks.len(),
                        pending = queue.len(),
                        "shutdown requested, cancelling run"
                    );
                    stopping = true;
                    let _ = cancel_tx.send(true);
                }
            }
        }

        // Attempt tasks that died without reporting lose their last state.
        for (id, mut unit) in in_flight {
            if unit.finish(UnitState::Failed).is_err() {
                warn!(unit = %id, state = %unit.state(), "lost attempt left in non-failable state");
            }
            report.record(&unit, Some("attempt task aborted".to_string()));
        }

        for mut unit in queue {
            // Reattached units never admitted still own a remote job.
            if let Some(handle) = unit.backend_handle() {
                self.backend.cancel(handle).await;
                if let Some(store) = &self.store {
                    if let Err(e) = store.delete_job(unit.id()) {
                        warn!(unit = %unit.id(), error = %e, "failed to delete runner job");
                    }
                }
            }
            unit.finish(UnitState::Cancelled)?;
            let error = last_errors.remove(unit.id());
            report.record(&unit, error);
        }

        report
            .units
            .sort_by_key(|u| order.get(&u.id).copied().unwrap_or(usize::MAX));
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            succeeded = report.count(UnitState::Succeeded),
            failed = report.count(UnitState::Failed),
            cancelled = report.count(UnitState::Cancelled),
            peak_in_flight = report.peak_in_flight,
            elapsed_ms = report.elapsed_ms,
            "run finished"
        );
        Ok(report)
    }
}
