//! Flurry CLI: runs the function host.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use flurry::{CliArgs, HostConfig, init_tracing, run_host};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(args.log_format);

    let paths = args.config_paths();
    if paths.is_empty() {
        eprintln!("Error: no config files or directories specified");
        return ExitCode::FAILURE;
    }

    info!("Loading config from {} source(s)", paths.len());

    let config = match HostConfig::from_paths(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Starting flurry host with {} function(s)",
        config.enabled_functions().count()
    );
    for (key, function) in config.enabled_functions() {
        info!("  Function: {} ({:?})", key, function.trigger);
    }

    match run_host(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Host failed: {e}");
            ExitCode::FAILURE
        }
    }
}
