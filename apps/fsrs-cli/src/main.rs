//! `fsrs-cli`: reads a JSON array of review logs from stdin, prints fitted
//! FSRS parameters (or defaults, for a short history) to stdout as JSON.

use std::io::{self, Read, Write};

use clap::Parser;
use fsrs_core::scheduler::DEFAULT_PARAMETERS;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fit FSRS scheduler parameters to a review history read from stdin.
#[derive(Debug, Parser)]
#[command(name = "fsrs-cli", version, about)]
struct Cli {
    /// Minimum number of review logs required before attempting to fit
    /// parameters; shorter histories get the default parameters back.
    #[arg(long, default_value_t = 10)]
    min_logs: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let logs: Vec<fsrs_core::ReviewLog> = serde_json::from_str(&input)?;

    let parameters = if logs.len() < cli.min_logs {
        tracing::info!(count = logs.len(), min_logs = cli.min_logs, "history too short, using defaults");
        DEFAULT_PARAMETERS
    } else {
        fsrs_core::optimizer::compute_optimal_parameters(&logs)
    };

    let output = serde_json::to_string(&parameters)?;
    writeln!(io::stdout(), "{output}")?;
    Ok(())
}
