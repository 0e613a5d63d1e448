#![warn(missing_docs)]
//! ClaudeFS Docker volume plugin daemon

use anyhow::Result;
use clap::Parser;
use claudefs_volume::cli::Cli;
use claudefs_volume::server::shutdown_signal;
use claudefs_volume::{CommandExecutor, PluginServer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    tracing::info!("starting ClaudeFS docker volume plugin");

    let config = cli.resolve()?;
    tracing::info!(
        sock = %config.sock_path.display(),
        cluster = %config.cluster_address,
        nfs_server = %config.nfs_server,
        mount_base = %config.mount_base.display(),
        "plugin configuration"
    );

    let executor = CommandExecutor::with_processes(config.cluster_tool());
    let server = PluginServer::build(&config, executor).await?;
    server.run(shutdown_signal()).await
}
