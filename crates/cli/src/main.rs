//! `tile-balancer` entry point.

use anyhow::Context;
use balancer::Balancer;
use clap::Parser;
use cli::{telemetry, CliConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();
    telemetry::init(&cli.log_level);

    let balancer = Balancer::new(cli.balancer_config()).context("failed to create balancer")?;
    balancer.listen().await.context("failed to start balancer")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");
    balancer.close().await.context("failed to shut down cleanly")?;
    Ok(())
}
