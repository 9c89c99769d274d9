//! gear-rebuild - resumable rebuild of gear packages
//!
//! Entry point for the gear-rebuild command-line application.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gear_rebuild::cli::output::display_error;
use gear_rebuild::cli::Cli;

/// Level used when `RUST_LOG` is not set
fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli.run().await {
        display_error(&e);
        std::process::exit(1);
    }
}
