//! Quarry CLI binary.

use anyhow::Result;
use quarry::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays clean.
    // Example: RUST_LOG=quarry=debug quarry graph .
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quarry=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!("Starting quarry CLI");

    let cli = Cli::parse_args();
    cli.execute().await?;

    tracing::debug!("Quarry CLI completed successfully");
    Ok(())
}
