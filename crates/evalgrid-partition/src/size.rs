//! Size partitioner: cost-aware split, merge, and bin-packing.
//!
//! For each (model, dataset) pair, in (model, dataset) order:
//! 1. Datasets whose total cost exceeds `max_unit_size` are cut into
//!    contiguous ranges by greedy prefix accumulation. A single item that is
//!    already over the bound becomes a one-item unit.
//! 2. Datasets at or under the bound are packed into an open bin with the
//!    preceding small datasets of the same model, as long as the bin stays
//!    within the bound. A full bin is closed and becomes one merged unit.
//!
//! Units are finally ordered by their first assignment's
//! (model, dataset, range start).

use tracing::{debug, info};

use evalgrid_core::{Assignment, ConfigError, ItemRange, WorkItem, WorkUnit};

use crate::cost::CostPolicy;
use crate::error::PartitionResult;
use crate::{sorted_items, Partitioner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePartitionerConfig {
    /// Upper bound on a unit's estimated cost.
    pub max_unit_size: u64,
}

#[derive(Debug, Clone)]
pub struct SizePartitioner {
    max_unit_size: u64,
}

impl SizePartitioner {
    pub fn new(config: SizePartitionerConfig) -> Result<Self, ConfigError> {
        if config.max_unit_size == 0 {
            return Err(ConfigError::invalid(
                "partitioner.max_unit_size",
                "must be greater than zero",
            ));
        }
        Ok(Self {
            max_unit_size: config.max_unit_size,
        })
    }

    /// Cut `[0, item_count)` into contiguous ranges of at most
    /// `max_unit_size` cost each.
    fn split_ranges(&self, item_count: u64, item_cost: u64) -> Vec<ItemRange> {
        // Uniform per-item cost, so greedy accumulation cuts every
        // `floor(max / item_cost)` items; at least one item per range.
        let per_range = (self.max_unit_size / item_cost).max(1);
        let mut ranges = Vec::with_capacity(item_count.div_ceil(per_range) as usize);
        let mut start = 0;
        while start < item_count {
            let end = start.saturating_add(per_range).min(item_count);
            ranges.push(ItemRange::new(start, end));
            start = end;
        }
        ranges
    }
}

/// Small datasets of one model waiting to be merged into a unit.
#[derive(Default)]
struct Bin {
    assignments: Vec<Assignment>,
    cost: u64,
}

impl Bin {
    fn model(&self) -> Option<&str> {
        self.assignments.first().map(|a| a.model.as_str())
    }

    fn close(&mut self, units: &mut Vec<WorkUnit>) -> PartitionResult<()> {
        if self.assignments.is_empty() {
            return Ok(());
        }
        let assignments = std::mem::take(&mut self.assignments);
        let cost = std::mem::take(&mut self.cost);
        let unit = WorkUnit::new(assignments, cost)?;
        debug!(unit = %unit, cost, datasets = unit.assignments().len(), "closed bin");
        units.push(unit);
        Ok(())
    }
}

impl Partitioner for SizePartitioner {
    fn name(&self) -> &'static str {
        "size"
    }

    fn partition(
        &self,
        items: &[WorkItem],
        policy: &dyn CostPolicy,
    ) -> PartitionResult<Vec<WorkUnit>> {
        let mut units = Vec::new();
        let mut bin = Bin::default();

        for item in sorted_items(items, policy)? {
            let item_cost = policy.item_cost(&item.mode);
            let total = policy.estimate(item.item_count, &item.mode);

            if total > self.max_unit_size {
                let ranges = self.split_ranges(item.item_count, item_cost);
                debug!(
                    model = %item.model,
                    dataset = %item.dataset,
                    total,
                    parts = ranges.len(),
                    "splitting dataset"
                );
                for range in ranges {
                    let cost = policy.estimate(range.len(), &item.mode);
                    units.push(WorkUnit::new(
                        vec![Assignment {
                            model: item.model.clone(),
                            dataset: item.dataset.clone(),
                            mode: item.mode,
                            range,
                        }],
                        cost,
                    )?);
                }
                continue;
            }

            let fits = bin.model().is_none_or(|m| m == item.model)
                && bin
                    .cost
                    .checked_add(total)
                    .is_some_and(|cost| cost <= self.max_unit_size);
            if !fits {
                bin.close(&mut units)?;
            }
            bin.assignments.push(Assignment {
                model: item.model.clone(),
                dataset: item.dataset.clone(),
                mode: item.mode,
                range: item.full_range(),
            });
            bin.cost += total;
        }
        bin.close(&mut units)?;

        units.sort_by(|a, b| {
            let (a, b) = (a.primary(), b.primary());
            (&a.model, &a.dataset, a.range.start).cmp(&(&b.model, &b.dataset, b.range.start))
        });

        info!(
            items = items.len(),
            units = units.len(),
            max_unit_size = self.max_unit_size,
            "partitioned work"
        );
        Ok(units)
    }
}
