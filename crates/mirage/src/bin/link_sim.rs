//! # Link Simulation
//!
//! Runs a scenario file and prints the report.
//!
//! ```bash
//! # Built-in defaults
//! link_sim
//!
//! # A scenario file, with transport-level logging
//! RUST_LOG=mirage_networking=debug link_sim crates/mirage/data/link_sim.toml
//! ```

use std::process::ExitCode;

use mirage::{run_scenario, ScenarioConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match ScenarioConfig::from_toml_file(&path) {
            Ok(config) => {
                info!(%path, "Loaded scenario");
                config
            }
            Err(e) => {
                error!(%path, "{e}");
                return ExitCode::FAILURE;
            }
        },
        None => ScenarioConfig::default(),
    };

    let report = match run_scenario(config) {
        Ok(report) => report,
        Err(e) => {
            error!("Scenario failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("{report}");
    if report.reliable_delivered() && report.reliable_in_order {
        ExitCode::SUCCESS
    } else {
        error!("Reliable channel lost or reordered messages");
        ExitCode::FAILURE
    }
}
