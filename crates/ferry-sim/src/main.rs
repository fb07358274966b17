//! Ferry simulation runner.
//!
//! Runs one scenario (TOML file, or the built-in default) and prints the
//! report as JSON on stdout. Logs go to stderr; `RUST_LOG` controls them.

use std::path::PathBuf;

use clap::Parser;
use ferry_sim::{run_scenario, ScenarioConfig};
use tracing_subscriber::EnvFilter;

/// Run a ferry-transport echo scenario over a simulated impaired network.
#[derive(Parser, Debug)]
#[command(name = "ferry-sim", about = "Deterministic ferry-transport simulation")]
struct Cli {
    /// Scenario file (TOML). Defaults apply when omitted.
    scenario: Option<PathBuf>,

    /// Override the scenario seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the payload size in bytes.
    #[arg(long)]
    payload_bytes: Option<usize>,

    /// Run this many consecutive seeds starting at the scenario seed.
    #[arg(long, default_value_t = 1)]
    runs: u64,

    /// Print single-line JSON.
    #[arg(long, default_value_t = false)]
    compact: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.scenario {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(bytes) = cli.payload_bytes {
        config.payload_bytes = bytes;
    }

    let mut failures = 0;
    for offset in 0..cli.runs.max(1) {
        let mut run = config.clone();
        run.seed = config.seed.wrapping_add(offset);
        let report = run_scenario(run)?;
        let json = if cli.compact {
            serde_json::to_string(&report)?
        } else {
            serde_json::to_string_pretty(&report)?
        };
        println!("{json}");
        if !report.succeeded() {
            failures += 1;
        }
    }

    anyhow::ensure!(failures == 0, "{failures} scenario run(s) did not complete");
    Ok(())
}
