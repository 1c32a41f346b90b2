//! # Session-Relay CLI
//!
//! Binary entry point: parses arguments, initializes logging, and
//! dispatches to the command implementations in the library crate.

use clap::Parser;
use relay_cli::{init_logging, run, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level, cli.json_logs) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(3);
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
