//! Work unit model and the input items it is built from.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::UnitError;

/// How a dataset is evaluated. Drives the per-item cost estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Free-form generation; cost scales with a fixed task coefficient.
    Generative,
    /// Scoring against a fixed label set; cost scales with `labels`.
    Discriminative { labels: u32 },
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceMode::Generative => f.write_str("gen"),
            InferenceMode::Discriminative { labels } => write!(f, "disc({labels})"),
        }
    }
}

/// One (model, dataset) evaluation request, before partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub model: String,
    pub dataset: String,
    pub mode: InferenceMode,
    /// Number of items (prompts) in the dataset.
    pub item_count: u64,
}

impl WorkItem {
    pub fn new(
        model: impl Into<String>,
        dataset: impl Into<String>,
        mode: InferenceMode,
        item_count: u64,
    ) -> Self {
        Self {
            model: model.into(),
            dataset: dataset.into(),
            mode,
            item_count,
        }
    }

    /// Full range covering every item of the dataset.
    pub fn full_range(&self) -> ItemRange {
        ItemRange::new(0, self.item_count)
    }
}

/// Half-open item-index interval `[start, end)` within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRange {
    pub start: u64,
    pub end: u64,
}

impl ItemRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for ItemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

/// A slice of one dataset, evaluated against one model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub model: String,
    pub dataset: String,
    pub mode: InferenceMode,
    pub range: ItemRange,
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.model, self.dataset, self.range)
    }
}

/// Lifecycle state of a work unit within its current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Succeeded | UnitState::Failed | UnitState::Cancelled
        )
    }

    /// Whether an attempt holding a live backend handle is in this state.
    pub fn is_active(self) -> bool {
        matches!(self, UnitState::Submitted | UnitState::Running)
    }

    fn can_transition_to(self, next: UnitState) -> bool {
        use UnitState::*;
        match (self, next) {
            // A rejected submission fails the attempt without a handle.
            (Pending, Submitted | Failed | Cancelled) => true,
            (Submitted, Running | Succeeded | Failed | Cancelled) => true,
            (Running, Running | Succeeded | Failed | Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::Submitted => "submitted",
            UnitState::Running => "running",
            UnitState::Succeeded => "succeeded",
            UnitState::Failed => "failed",
            UnitState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque backend submission identifier (remote job id, local run id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(String);

impl BackendHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One schedulable, independently retryable slice of evaluation work.
///
/// Equality, hashing, and ordering consider only `id`: ranges of different
/// datasets are not comparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "UnitRecord")]
pub struct WorkUnit {
    id: String,
    assignments: Vec<Assignment>,
    /// Partitioning-time estimate; not carried past dispatch.
    #[serde(skip)]
    estimated_cost: u64,
    state: UnitState,
    attempt: u32,
    backend_handle: Option<BackendHandle>,
}

impl WorkUnit {
    /// Build a validated, `Pending` unit.
    ///
    /// The id is derived from the first assignment, so identical partitioner
    /// input always yields identical ids. `%`, `/` and `[` inside model and
    /// dataset references are percent-encoded to keep ids unambiguous.
    pub fn new(assignments: Vec<Assignment>, estimated_cost: u64) -> Result<Self, UnitError> {
        let first = assignments.first().ok_or(UnitError::NoAssignments)?;
        for a in &assignments {
            if a.model.is_empty() || a.dataset.is_empty() {
                return Err(UnitError::EmptyReference);
            }
            if a.range.is_empty() {
                return Err(UnitError::EmptyRange {
                    model: a.model.clone(),
                    dataset: a.dataset.clone(),
                    start: a.range.start,
                    end: a.range.end,
                });
            }
        }
        if estimated_cost == 0 {
            return Err(UnitError::NonPositiveCost);
        }

        let first = format!(
            "{}/{}{}",
            escape_ref(&first.model),
            escape_ref(&first.dataset),
            first.range
        );
        let id = match assignments.len() {
            1 => first,
            n => format!("{first}+{}", n - 1),
        };

        Ok(Self {
            id,
            assignments,
            estimated_cost,
            state: UnitState::Pending,
            attempt: 0,
            backend_handle: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// The first (and for unmerged units, only) assignment.
    pub fn primary(&self) -> &Assignment {
        &self.assignments[0]
    }

    pub fn is_merged(&self) -> bool {
        self.assignments.len() > 1
    }

    pub fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn backend_handle(&self) -> Option<&BackendHandle> {
        self.backend_handle.as_ref()
    }

    /// Total number of dataset items covered by this unit.
    pub fn item_count(&self) -> u64 {
        self.assignments.iter().map(|a| a.range.len()).sum()
    }

    fn transition(&mut self, next: UnitState) -> Result<(), UnitError> {
        if !self.state.can_transition_to(next) {
            return Err(UnitError::IllegalTransition {
                id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Pending → Submitted, taking ownership of a fresh backend handle.
    pub fn mark_submitted(&mut self, handle: BackendHandle) -> Result<(), UnitError> {
        self.transition(UnitState::Submitted)?;
        self.backend_handle = Some(handle);
        Ok(())
    }

    /// Pending → Submitted for an attempt started by an earlier process.
    ///
    /// Restores the attempt counter recorded alongside the handle.
    pub fn resume(&mut self, handle: BackendHandle, attempt: u32) -> Result<(), UnitError> {
        self.mark_submitted(handle)?;
        self.attempt = attempt;
        Ok(())
    }

    /// Submitted → Running. Repeated calls while running are no-ops.
    pub fn mark_running(&mut self) -> Result<(), UnitError> {
        self.transition(UnitState::Running)
    }

    /// Move the current attempt to a terminal state.
    pub fn finish(&mut self, state: UnitState) -> Result<(), UnitError> {
        if !state.is_terminal() {
            return Err(UnitError::IllegalTransition {
                id: self.id.clone(),
                from: self.state,
                to: state,
            });
        }
        self.transition(state)
    }

    /// Reset a failed unit for a new attempt if the retry budget allows.
    ///
    /// Returns `Ok(false)` and leaves the unit `Failed` once `attempt` has
    /// reached `max_retries`. The previous handle is always discarded.
    pub fn retry(&mut self, max_retries: u32) -> Result<bool, UnitError> {
        if self.state != UnitState::Failed {
            return Err(UnitError::IllegalTransition {
                id: self.id.clone(),
                from: self.state,
                to: UnitState::Pending,
            });
        }
        self.backend_handle = None;
        if self.attempt >= max_retries {
            return Ok(false);
        }
        self.attempt += 1;
        self.state = UnitState::Pending;
        Ok(true)
    }
}

fn escape_ref(reference: &str) -> String {
    let mut out = String::with_capacity(reference.len());
    for c in reference.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '[' => out.push_str("%5B"),
            c => out.push(c),
        }
    }
    out
}

/// Serialized form of a [`WorkUnit`], validated on the way in.
#[derive(Deserialize)]
struct UnitRecord {
    id: String,
    assignments: Vec<Assignment>,
    state: UnitState,
    attempt: u32,
    backend_handle: Option<BackendHandle>,
}

impl TryFrom<UnitRecord> for WorkUnit {
    type Error = UnitError;

    fn try_from(record: UnitRecord) -> Result<Self, Self::Error> {
        let mut unit = WorkUnit::new(record.assignments, 1)?;
        if unit.id != record.id {
            return Err(UnitError::IdMismatch {
                recorded: record.id,
                derived: unit.id,
            });
        }
        unit.estimated_cost = 0;
        unit.state = record.state;
        unit.attempt = record.attempt;
        unit.backend_handle = record.backend_handle;
        Ok(unit)
    }
}

impl PartialEq for WorkUnit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WorkUnit {}

impl Hash for WorkUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for WorkUnit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkUnit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
