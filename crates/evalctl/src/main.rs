use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "evalctl",
    about = "evalgrid: shard model evaluations and run them on a backend",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition the configured work list and print the resulting units.
    Plan {
        /// Path to evalgrid.toml
        #[arg(short, long, default_value = "evalgrid.toml")]
        config: PathBuf,
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Partition the work list and run every unit on the configured backend.
    ///
    /// Live attempts are recorded under the state directory; a later run
    /// with the same configuration reattaches to them instead of
    /// resubmitting. Ctrl-C cancels in-flight units.
    Run {
        #[arg(short, long, default_value = "evalgrid.toml")]
        config: PathBuf,
        /// Directory holding the runner job store.
        #[arg(long, default_value = ".evalgrid")]
        state_dir: PathBuf,
        /// Ignore jobs recorded by a previous run.
        #[arg(long)]
        no_resume: bool,
        /// Also write the JSON report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List live jobs recorded in the state directory.
    Jobs {
        #[arg(long, default_value = ".evalgrid")]
        state_dir: PathBuf,
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,evalgrid=debug"));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match cli.command {
        Commands::Plan { config, format } => commands::plan::plan(&config, format),
        Commands::Run {
            config,
            state_dir,
            no_resume,
            report,
            format,
        } => {
            commands::run::run(commands::run::RunArgs {
                config,
                state_dir,
                resume: !no_resume,
                report,
                format,
            })
            .await
        }
        Commands::Jobs { state_dir, format } => commands::jobs::jobs(&state_dir, format),
    }
}
