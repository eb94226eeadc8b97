//! evalgrid-partition: turns a work list into schedulable work units.
//!
//! The partitioner is a pure function of its input: identical work items and
//! configuration always yield the identical, identically-ordered list of
//! [`WorkUnit`](evalgrid_core::WorkUnit)s, which keeps task ids stable for
//! log correlation and resumption.
//!
//! # Components
//!
//! - **`cost`**: [`CostPolicy`] estimates the cost of a dataset slice
//! - **`naive`**: one unit per (model, dataset) pair
//! - **`size`**: split large datasets, bin-pack small ones under a cost bound
//! - **`size_cache`**: dataset item counts for work entries that omit them
//! - **`config`**: build a partitioner from the `[partitioner]` section

pub mod config;
pub mod cost;
pub mod error;
pub mod naive;
pub mod size;
pub mod size_cache;

pub use config::{build_partitioner, resolve_items};
pub use cost::{CostPolicy, StandardCostPolicy};
pub use error::{PartitionError, PartitionResult};
pub use naive::NaivePartitioner;
pub use size::{SizePartitioner, SizePartitionerConfig};
pub use size_cache::SizeCache;

use std::collections::HashSet;

use evalgrid_core::{WorkItem, WorkUnit};

/// Converts work items into work units under a cost policy.
pub trait Partitioner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Partition `items` into units, in stable emission order.
    fn partition(
        &self,
        items: &[WorkItem],
        policy: &dyn CostPolicy,
    ) -> PartitionResult<Vec<WorkUnit>>;
}

/// Validate items and return them sorted by (model, dataset).
///
/// Rejects empty references, empty datasets, zero-cost modes, and duplicate
/// pairs; any of those would break exact range coverage.
pub(crate) fn sorted_items<'a>(
    items: &'a [WorkItem],
    policy: &dyn CostPolicy,
) -> PartitionResult<Vec<&'a WorkItem>> {
    let mut seen = HashSet::new();
    for item in items {
        let invalid = |reason: &str| PartitionError::InvalidItem {
            model: item.model.clone(),
            dataset: item.dataset.clone(),
            reason: reason.to_string(),
        };
        if item.model.is_empty() || item.dataset.is_empty() {
            return Err(invalid("empty model or dataset reference"));
        }
        if item.item_count == 0 {
            return Err(invalid("dataset has no items"));
        }
        if policy.item_cost(&item.mode) == 0 {
            return Err(invalid("inference mode has zero per-item cost"));
        }
        if !seen.insert((item.model.as_str(), item.dataset.as_str())) {
            return Err(PartitionError::DuplicatePair {
                model: item.model.clone(),
                dataset: item.dataset.clone(),
            });
        }
    }

    let mut sorted: Vec<&WorkItem> = items.iter().collect();
    sorted.sort_by(|a, b| (&a.model, &a.dataset).cmp(&(&b.model, &b.dataset)));
    Ok(sorted)
}
