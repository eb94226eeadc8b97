use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use evalgrid_backend::build_backend;
use evalgrid_core::EvalGridConfig;
use evalgrid_runner::{Runner, RunnerConfig};
use evalgrid_state::JobStore;

use super::job_store_path;
use super::plan::plan_units;
use crate::OutputFormat;

pub struct RunArgs {
    pub config: PathBuf,
    pub state_dir: PathBuf,
    pub resume: bool,
    pub report: Option<PathBuf>,
    pub format: OutputFormat,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = EvalGridConfig::from_file(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;

    // Every configuration error surfaces here, before anything is submitted.
    let mut units = plan_units(&config, &args.config)?;
    let backend = build_backend(&config.backend)?;
    let runner_config = RunnerConfig::from_section(&config.runner)?;

    std::fs::create_dir_all(&args.state_dir)
        .with_context(|| format!("creating {}", args.state_dir.display()))?;
    let store = JobStore::open(&job_store_path(&args.state_dir))?;
    let runner = Runner::new(backend, runner_config)?.with_store(store);

    if args.resume {
        let reattached = runner.reattach(&mut units)?;
        if reattached > 0 {
            info!(reattached, "resuming units from a previous run");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received, cancelling run");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "failed to install Ctrl-C handler"),
        }
    });

    let report = runner.run(units, shutdown_rx).await?;

    if let Some(path) = &args.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    match args.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => println!("{report}"),
    }

    if !report.all_succeeded() {
        anyhow::bail!(
            "{} of {} units did not succeed",
            report.units.len() - report.count(evalgrid_core::UnitState::Succeeded),
            report.units.len()
        );
    }
    Ok(())
}
