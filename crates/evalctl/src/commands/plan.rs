use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use evalgrid_core::{Assignment, EvalGridConfig, WorkUnit};
use evalgrid_partition::{build_partitioner, resolve_items, SizeCache};

use crate::OutputFormat;

#[derive(Serialize)]
struct PlannedUnit<'a> {
    id: &'a str,
    estimated_cost: u64,
    items: u64,
    assignments: &'a [Assignment],
}

/// Partition the work list of `config`.
///
/// A relative `size_cache` path is resolved against the config file's
/// directory.
pub fn plan_units(config: &EvalGridConfig, config_path: &Path) -> anyhow::Result<Vec<WorkUnit>> {
    let (partitioner, policy) = build_partitioner(&config.partitioner)?;

    let cache = match &config.partitioner.size_cache {
        Some(path) => {
            let path = config_path
                .parent()
                .map(|dir| dir.join(path))
                .unwrap_or_else(|| path.clone());
            SizeCache::load(&path)
                .with_context(|| format!("loading size cache {}", path.display()))?
        }
        None => SizeCache::new(),
    };

    let items = resolve_items(&config.work, &cache)?;
    let units = partitioner.partition(&items, &policy)?;
    info!(
        partitioner = partitioner.name(),
        items = items.len(),
        units = units.len(),
        "work planned"
    );
    Ok(units)
}

pub fn plan(config_path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let config = EvalGridConfig::from_file(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let units = plan_units(&config, config_path)?;

    match format {
        OutputFormat::Json => {
            let planned: Vec<_> = units
                .iter()
                .map(|u| PlannedUnit {
                    id: u.id(),
                    estimated_cost: u.estimated_cost(),
                    items: u.item_count(),
                    assignments: u.assignments(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&planned)?);
        }
        OutputFormat::Text => {
            println!("{:<48} {:>8} {:>10}  DATASETS", "UNIT", "ITEMS", "COST");
            for unit in &units {
                println!(
                    "{:<48} {:>8} {:>10}  {}",
                    unit.id(),
                    unit.item_count(),
                    unit.estimated_cost(),
                    unit.assignments().len()
                );
            }
            let total: u64 = units.iter().map(|u| u.estimated_cost()).sum();
            println!("\n{} units, total estimated cost {total}", units.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_with_size_cache_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sizes.json"), r#"{"gsm8k": 2500}"#).unwrap();
        let config_path = dir.path().join("evalgrid.toml");
        std::fs::write(
            &config_path,
            r#"
[[work]]
model = "llama-7b"
dataset = "gsm8k"

[[work]]
model = "llama-7b"
dataset = "tiny_a"
items = 10

[[work]]
model = "llama-7b"
dataset = "tiny_b"
items = 15

[partitioner]
type = "size"
max_unit_size = 2000
size_cache = "sizes.json"

[backend]
type = "local"
command = ["true"]
"#,
        )
        .unwrap();

        let config = EvalGridConfig::from_file(&config_path).unwrap();
        let units = plan_units(&config, &config_path).unwrap();

        // 25 slices of gsm8k plus one merged unit for the two tiny datasets.
        assert_eq!(units.len(), 26);
        assert_eq!(units.iter().filter(|u| u.is_merged()).count(), 1);
        assert_eq!(units.iter().map(|u| u.item_count()).sum::<u64>(), 2525);
    }

    #[test]
    fn missing_size_is_an_error() {
        let config = EvalGridConfig::from_toml_str(
            r#"
[[work]]
model = "m"
dataset = "unknown"

[backend]
type = "local"
command = ["true"]
"#,
        )
        .unwrap();
        let err = plan_units(&config, Path::new("evalgrid.toml")).unwrap_err();
        assert!(err.to_string().contains("unknown"));
    }
}
