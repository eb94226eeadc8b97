pub mod jobs;
pub mod plan;
pub mod run;

use std::path::{Path, PathBuf};

/// Runner job database inside a state directory.
pub fn job_store_path(state_dir: &Path) -> PathBuf {
    state_dir.join("jobs.redb")
}
