//! Build partitioners and work items from `evalgrid.toml` sections.

use evalgrid_core::config::{PartitionStrategy, PartitionerSection, WorkEntry};
use evalgrid_core::{ConfigError, WorkItem};

use crate::cost::StandardCostPolicy;
use crate::error::{PartitionError, PartitionResult};
use crate::naive::NaivePartitioner;
use crate::size::{SizePartitioner, SizePartitionerConfig};
use crate::size_cache::SizeCache;
use crate::Partitioner;

/// Validate the `[partitioner]` section into a partitioner and its policy.
pub fn build_partitioner(
    section: &PartitionerSection,
) -> Result<(Box<dyn Partitioner>, StandardCostPolicy), ConfigError> {
    if section.gen_task_coef == 0 {
        return Err(ConfigError::invalid(
            "partitioner.gen_task_coef",
            "must be greater than zero",
        ));
    }
    let policy = StandardCostPolicy::new(section.gen_task_coef);

    let partitioner: Box<dyn Partitioner> = match section.strategy {
        PartitionStrategy::Naive => Box::new(NaivePartitioner::new()),
        PartitionStrategy::Size => {
            let max_unit_size = section
                .max_unit_size
                .ok_or(ConfigError::Missing("partitioner.max_unit_size"))?;
            Box::new(SizePartitioner::new(SizePartitionerConfig { max_unit_size })?)
        }
    };
    Ok((partitioner, policy))
}

/// Turn `[[work]]` entries into work items, filling missing sizes from `cache`.
pub fn resolve_items(entries: &[WorkEntry], cache: &SizeCache) -> PartitionResult<Vec<WorkItem>> {
    entries
        .iter()
        .map(|entry| {
            let item_count = match entry.items {
                Some(n) => n,
                None => cache
                    .get(&entry.dataset)
                    .ok_or_else(|| PartitionError::UnknownDatasetSize(entry.dataset.clone()))?,
            };
            Ok(WorkItem::new(
                entry.model.clone(),
                entry.dataset.clone(),
                entry.mode,
                item_count,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalgrid_core::InferenceMode;

    fn section(strategy: PartitionStrategy, max: Option<u64>) -> PartitionerSection {
        PartitionerSection {
            strategy,
            max_unit_size: max,
            gen_task_coef: 20,
            size_cache: None,
        }
    }

    #[test]
    fn builds_naive() {
        let (p, policy) = build_partitioner(&section(PartitionStrategy::Naive, None)).unwrap();
        assert_eq!(p.name(), "naive");
        assert_eq!(policy.gen_task_coef, 20);
    }

    #[test]
    fn size_requires_max_unit_size() {
        let err = build_partitioner(&section(PartitionStrategy::Size, None)).err().unwrap();
        assert_eq!(err, ConfigError::Missing("partitioner.max_unit_size"));

        let err = build_partitioner(&section(PartitionStrategy::Size, Some(0))).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let (p, _) = build_partitioner(&section(PartitionStrategy::Size, Some(2000))).unwrap();
        assert_eq!(p.name(), "size");
    }

    #[test]
    fn rejects_zero_gen_coefficient() {
        let mut s = section(PartitionStrategy::Naive, None);
        s.gen_task_coef = 0;
        assert!(build_partitioner(&s).is_err());
    }

    #[test]
    fn resolves_sizes_from_cache() {
        let mut cache = SizeCache::new();
        cache.insert("gsm8k", 1319);
        let entries = vec![
            WorkEntry {
                model: "m".to_string(),
                dataset: "gsm8k".to_string(),
                mode: InferenceMode::Generative,
                items: None,
            },
            WorkEntry {
                model: "m".to_string(),
                dataset: "arc".to_string(),
                mode: InferenceMode::Discriminative { labels: 4 },
                items: Some(50),
            },
        ];
        let items = resolve_items(&entries, &cache).unwrap();
        assert_eq!(items[0].item_count, 1319);
        assert_eq!(items[1].item_count, 50);
    }

    #[test]
    fn unknown_size_is_an_error() {
        let entries = vec![WorkEntry {
            model: "m".to_string(),
            dataset: "mystery".to_string(),
            mode: InferenceMode::Generative,
            items: None,
        }];
        let err = resolve_items(&entries, &SizeCache::new()).unwrap_err();
        assert!(matches!(err, PartitionError::UnknownDatasetSize(d) if d == "mystery"));
    }
}
