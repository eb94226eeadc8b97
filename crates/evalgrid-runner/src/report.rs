//! Final per-unit outcome of a run.

use std::fmt;

use serde::{Deserialize, Serialize};

use evalgrid_core::{Assignment, UnitState, WorkUnit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub id: String,
    pub state: UnitState,
    /// Index of the last attempt made (0 for the first).
    pub attempt: u32,
    pub assignments: Vec<Assignment>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub backend: String,
    /// Units in admission order.
    pub units: Vec<UnitReport>,
    /// Highest number of attempts in flight at once.
    pub peak_in_flight: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub(crate) fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            units: Vec::new(),
            peak_in_flight: 0,
            elapsed_ms: 0,
        }
    }

    pub(crate) fn record(&mut self, unit: &WorkUnit, last_error: Option<String>) {
        self.units.push(UnitReport {
            id: unit.id().to_string(),
            state: unit.state(),
            attempt: unit.attempt(),
            assignments: unit.assignments().to_vec(),
            last_error,
        });
    }

    pub fn get(&self, id: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Units that ended Failed.
    pub fn failed(&self) -> Vec<&UnitReport> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Failed)
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.units.iter().all(|u| u.state == UnitState::Succeeded)
    }

    pub fn count(&self, state: UnitState) -> usize {
        self.units.iter().filter(|u| u.state == state).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<48} {:<10} {:>7}  ERROR", "UNIT", "STATE", "ATTEMPT")?;
        for unit in &self.units {
            writeln!(
                f,
                "{:<48} {:<10} {:>7}  {}",
                unit.id,
                unit.state.as_str(),
                unit.attempt,
                unit.last_error.as_deref().unwrap_or("-")
            )?;
        }
        write!(
            f,
            "\n{} units on {}: {} succeeded, {} failed, {} cancelled (peak in flight {}, {:.1}s)",
            self.units.len(),
            self.backend,
            self.count(UnitState::Succeeded),
            self.count(UnitState::Failed),
            self.count(UnitState::Cancelled),
            self.peak_in_flight,
            self.elapsed_ms as f64 / 1000.0
        )
    }
}
