use anyhow::Result;
use clap::Parser;
use tracing::info;

use pybundle::cli::Cli;
use pybundle::Engine;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides the --log-level flag when set.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting pybundle v{}", env!("CARGO_PKG_VERSION"));

    let engine = Engine::new(cli.config.as_deref())?;
    cli.execute(engine)
}
