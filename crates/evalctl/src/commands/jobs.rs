use std::path::Path;

use anyhow::Context;

use evalgrid_state::JobStore;

use super::job_store_path;
use crate::OutputFormat;

pub fn jobs(state_dir: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let path = job_store_path(state_dir);
    if !path.exists() {
        anyhow::bail!("no job store at {}", path.display());
    }
    let store = JobStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let jobs = store.list_jobs()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Text => {
            if jobs.is_empty() {
                println!("no live jobs");
                return Ok(());
            }
            println!(
                "{:<48} {:<8} {:<20} {:>7} {:>12}",
                "UNIT", "BACKEND", "HANDLE", "ATTEMPT", "LAST POLL"
            );
            for job in &jobs {
                println!(
                    "{:<48} {:<8} {:<20} {:>7} {:>12}",
                    job.unit_id,
                    job.backend,
                    job.handle.as_str(),
                    job.attempt,
                    job.last_poll_at
                );
            }
        }
    }
    Ok(())
}
