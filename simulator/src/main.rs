mod args;
mod driver;
mod logging;
mod oracle;
mod workload;

use clap::Parser;
use tracing::Level;

use crate::args::{Args, SimConfig};
use crate::driver::run;
use crate::logging::LogWriter;

fn main() {
    let args = Args::parse();
    let config = SimConfig::from_args(args);
    let writer = LogWriter::for_run(&config).unwrap_or_else(|err| {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    // Scripted driver panics are expected; keep them in the log instead of on stderr.
    std::panic::set_hook(Box::new(|info| {
        tracing::debug!(panic = %info, "panic caught");
    }));

    let config_json = serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!("config: {}", config_json);

    match run(&config) {
        Ok(report) => {
            let report_json =
                serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string());
            if report.violations.is_empty() {
                tracing::info!("simulation passed: {}", report_json);
            } else {
                tracing::error!(seed = config.seed, "simulation found violations: {}", report_json);
                std::process::exit(2);
            }
        }
        Err(err) => {
            tracing::error!(seed = config.seed, error = %err, "simulation aborted");
            std::process::exit(1);
        }
    }
}
