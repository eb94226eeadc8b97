//! Cost estimation for dataset slices.
//!
//! The estimate is a relative score, not a time prediction: it only has to
//! rank slices consistently so the size partitioner can balance units.

use evalgrid_core::InferenceMode;

/// Estimates the relative execution cost of evaluating dataset items.
pub trait CostPolicy: Send + Sync {
    /// Cost of evaluating a single item under `mode`.
    fn item_cost(&self, mode: &InferenceMode) -> u64;

    /// Cost of evaluating `item_count` items under `mode`.
    fn estimate(&self, item_count: u64, mode: &InferenceMode) -> u64 {
        item_count.saturating_mul(self.item_cost(mode))
    }
}

/// Generative items cost a fixed coefficient; discriminative items cost one
/// unit per candidate label (each label is scored separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardCostPolicy {
    pub gen_task_coef: u64,
}

impl StandardCostPolicy {
    pub const DEFAULT_GEN_TASK_COEF: u64 = 20;

    pub fn new(gen_task_coef: u64) -> Self {
        Self { gen_task_coef }
    }
}

impl Default for StandardCostPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_GEN_TASK_COEF)
    }
}

impl CostPolicy for StandardCostPolicy {
    fn item_cost(&self, mode: &InferenceMode) -> u64 {
        match mode {
            InferenceMode::Generative => self.gen_task_coef,
            InferenceMode::Discriminative { labels } => u64::from(*labels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generative_uses_coefficient() {
        let policy = StandardCostPolicy::default();
        assert_eq!(policy.item_cost(&InferenceMode::Generative), 20);
        assert_eq!(policy.estimate(2500, &InferenceMode::Generative), 50_000);
    }

    #[test]
    fn discriminative_scales_with_labels() {
        let policy = StandardCostPolicy::new(50);
        let mode = InferenceMode::Discriminative { labels: 4 };
        assert_eq!(policy.item_cost(&mode), 4);
        assert_eq!(policy.estimate(100, &mode), 400);
    }

    #[test]
    fn estimate_saturates() {
        let policy = StandardCostPolicy::new(u64::MAX);
        assert_eq!(policy.estimate(2, &InferenceMode::Generative), u64::MAX);
    }
}
