//! Naive partitioner: one unit per (model, dataset) pair.

use tracing::debug;

use evalgrid_core::{Assignment, WorkItem, WorkUnit};

use crate::cost::CostPolicy;
use crate::error::PartitionResult;
use crate::{sorted_items, Partitioner};

#[derive(Debug, Clone, Copy, Default)]
pub struct NaivePartitioner;

impl NaivePartitioner {
    pub fn new() -> Self {
        Self
    }
}

impl Partitioner for NaivePartitioner {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn partition(
        &self,
        items: &[WorkItem],
        policy: &dyn CostPolicy,
    ) -> PartitionResult<Vec<WorkUnit>> {
        let mut units = Vec::with_capacity(items.len());
        for item in sorted_items(items, policy)? {
            let cost = policy.estimate(item.item_count, &item.mode);
            let unit = WorkUnit::new(
                vec![Assignment {
                    model: item.model.clone(),
                    dataset: item.dataset.clone(),
                    mode: item.mode,
                    range: item.full_range(),
                }],
                cost,
            )?;
            debug!(unit = %unit, cost, "naive unit");
            units.push(unit);
        }
        Ok(units)
    }
}
