//! evalgrid.toml configuration parser.
//!
//! These are plain data types; each consuming crate validates its own
//! section into a typed component config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::InferenceMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalGridConfig {
    #[serde(default)]
    pub work: Vec<WorkEntry>,
    #[serde(default)]
    pub partitioner: PartitionerSection,
    #[serde(default)]
    pub runner: RunnerSection,
    pub backend: BackendSection,
}

/// One `[[work]]` entry: a model evaluated on a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkEntry {
    pub model: String,
    pub dataset: String,
    #[serde(default = "default_mode")]
    pub mode: InferenceMode,
    /// Dataset size. Looked up in the size cache when omitted.
    pub items: Option<u64>,
}

fn default_mode() -> InferenceMode {
    InferenceMode::Generative
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    Naive,
    Size,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionerSection {
    #[serde(rename = "type")]
    pub strategy: PartitionStrategy,
    /// Upper bound on a unit's estimated cost (`size` strategy only).
    pub max_unit_size: Option<u64>,
    #[serde(default = "default_gen_task_coef")]
    pub gen_task_coef: u64,
    /// JSON file mapping dataset id to item count.
    pub size_cache: Option<PathBuf>,
}

fn default_gen_task_coef() -> u64 {
    20
}

impl Default for PartitionerSection {
    fn default() -> Self {
        Self {
            strategy: PartitionStrategy::Naive,
            max_unit_size: None,
            gen_task_coef: default_gen_task_coef(),
            size_cache: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-unit wall-clock timeout, e.g. `"2h"`.
    pub unit_timeout: Option<String>,
}

fn default_max_workers() -> usize {
    16
}

fn default_max_retries() -> u32 {
    2
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            unit_timeout: None,
        }
    }
}

impl RunnerSection {
    pub fn unit_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.unit_timeout
            .as_deref()
            .map(|s| {
                parse_duration(s)
                    .ok_or_else(|| ConfigError::invalid("runner.unit_timeout", format!("bad duration `{s}`")))
            })
            .transpose()
    }
}

/// `[backend]` section, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendSection {
    Local(LocalSection),
    Cluster(ClusterSection),
    Cloud(CloudSection),
}

impl BackendSection {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendSection::Local(_) => "local",
            BackendSection::Cluster(_) => "cluster",
            BackendSection::Cloud(_) => "cloud",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSection {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Task body command; `{unit_id}` and `{task_file}` are substituted.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// How often a running child process is checked, e.g. "100ms".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    pub command: Vec<String>,
    /// Resource partition the jobs are queued on.
    pub partition: String,
    /// Scheduler priority class (QoS), passed through unmodified.
    pub priority_class: Option<String>,
    /// Site-specific quota tag, passed through unmodified.
    pub quota_tag: Option<String>,
    #[serde(default = "default_workers_per_unit")]
    pub workers_per_unit: u32,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_job_name_prefix")]
    pub job_name_prefix: String,
    pub poll_interval: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSection {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    pub command: Vec<String>,
    /// `host:port` of the job service.
    pub endpoint: String,
    pub workspace_id: String,
    pub image: String,
    pub bootstrap_script: PathBuf,
    #[serde(default = "default_workers_per_unit")]
    pub workers_per_unit: u32,
    #[serde(default = "default_job_name_prefix")]
    pub job_name_prefix: String,
    pub poll_interval: Option<String>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("outputs/evalgrid")
}

fn default_workers_per_unit() -> u32 {
    1
}

fn default_job_name_prefix() -> String {
    "evalgrid".to_string()
}

impl EvalGridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EvalGridConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "500ms", "5s", "2m", "2h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
