//! Scripted in-memory backend for runner tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use evalgrid_backend::{BackendAdapter, BackendFuture, PollError, RemoteStatus, SubmissionError};
use evalgrid_core::{Assignment, BackendHandle, InferenceMode, ItemRange, WorkUnit};

/// Result of one poll.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Status(RemoteStatus),
    Transient,
    Permanent,
}

/// How one attempt of a unit behaves.
#[derive(Debug, Clone)]
pub struct Plan {
    pub reject_submit: bool,
    /// Poll results in order; the last one repeats.
    pub polls: Vec<Step>,
}

impl Plan {
    pub fn succeed() -> Self {
        Self::polls(vec![Step::Status(RemoteStatus::Succeeded)])
    }

    pub fn fail() -> Self {
        Self::polls(vec![Step::Status(RemoteStatus::Failed)])
    }

    pub fn run_forever() -> Self {
        Self::polls(vec![Step::Status(RemoteStatus::Running)])
    }

    pub fn reject() -> Self {
        Self {
            reject_submit: true,
            polls: Vec::new(),
        }
    }

    pub fn polls(polls: Vec<Step>) -> Self {
        Self {
            reject_submit: false,
            polls,
        }
    }
}

struct Live {
    steps: VecDeque<Step>,
    /// Still counted in `in_flight`.
    counted: bool,
}

pub struct MockBackend {
    default_plan: Plan,
    /// Per-unit plans, consumed one per attempt.
    plans: Mutex<HashMap<String, VecDeque<Plan>>>,
    live: Mutex<HashMap<BackendHandle, Live>>,
    next_id: AtomicU64,
    interval: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    pub submitted: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<BackendHandle>>,
}

impl MockBackend {
    pub fn new(default_plan: Plan) -> Self {
        Self {
            default_plan,
            plans: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            interval: Duration::from_millis(2),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Queue per-attempt plans for one unit.
    pub fn script(&self, unit_id: &str, plans: Vec<Plan>) {
        self.plans
            .lock()
            .unwrap()
            .insert(unit_id.to_string(), plans.into());
    }

    /// Make the backend know a handle issued by an earlier process.
    pub fn adopt(&self, handle: &str, polls: Vec<Step>) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(
            BackendHandle::new(handle),
            Live {
                steps: polls.into(),
                counted: true,
            },
        );
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn submissions_of(&self, unit_id: &str) -> usize {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == unit_id)
            .count()
    }

    fn release(&self, live: &mut Live) {
        if live.counted {
            live.counted = false;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl BackendAdapter for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn submit<'a>(
        &'a self,
        unit: &'a WorkUnit,
    ) -> BackendFuture<'a, Result<BackendHandle, SubmissionError>> {
        Box::pin(async move {
            self.submitted.lock().unwrap().push(unit.id().to_string());
            let plan = self
                .plans
                .lock()
                .unwrap()
                .get_mut(unit.id())
                .and_then(|plans| plans.pop_front())
                .unwrap_or_else(|| self.default_plan.clone());
            if plan.reject_submit {
                return Err(SubmissionError::Rejected("scripted rejection".to_string()));
            }

            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let handle = BackendHandle::new(format!("mock-{n}"));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.live.lock().unwrap().insert(
                handle.clone(),
                Live {
                    steps: plan.polls.into(),
                    counted: true,
                },
            );
            Ok(handle)
        })
    }

    fn poll<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> BackendFuture<'a, Result<RemoteStatus, PollError>> {
        Box::pin(async move {
            let mut live = self.live.lock().unwrap();
            let Some(entry) = live.get_mut(handle) else {
                return Err(PollError::UnknownHandle(handle.to_string()));
            };
            let step = if entry.steps.len() > 1 {
                entry.steps.pop_front()
            } else {
                entry.steps.front().copied()
            }
            .unwrap_or(Step::Status(RemoteStatus::Succeeded));

            match step {
                Step::Status(status) => {
                    if status.is_terminal() {
                        self.release(entry);
                    }
                    Ok(status)
                }
                Step::Transient => Err(PollError::Transient("scripted outage".to_string())),
                Step::Permanent => {
                    self.release(entry);
                    Err(PollError::Permanent("scripted permanent error".to_string()))
                }
            }
        })
    }

    fn cancel<'a>(&'a self, handle: &'a BackendHandle) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.cancelled.lock().unwrap().push(handle.clone());
            if let Some(entry) = self.live.lock().unwrap().get_mut(handle) {
                self.release(entry);
            }
        })
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }
}

pub fn unit(dataset: &str) -> WorkUnit {
    WorkUnit::new(
        vec![Assignment {
            model: "llama-7b".to_string(),
            dataset: dataset.to_string(),
            mode: InferenceMode::Generative,
            range: ItemRange::new(0, 10),
        }],
        200,
    )
    .unwrap()
}

pub fn units(n: usize) -> Vec<WorkUnit> {
    (0..n).map(|i| unit(&format!("ds{i:02}"))).collect()
}
