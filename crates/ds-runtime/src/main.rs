//! `ds-sign`: document signing from the command line.

use std::process::ExitCode;

use clap::Parser;
use ds_runtime::cli::{self, Cli};
use ds_telemetry::{init_logging, TelemetryConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if let Some(level) = cli.log_level() {
        telemetry = telemetry.with_log_level(level);
    }
    if let Err(e) = init_logging(&telemetry) {
        eprintln!("ds-sign: {e}");
        return ExitCode::from(2);
    }

    match cli::run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("ds-sign: {e:#}");
            ExitCode::from(2)
        }
    }
}
