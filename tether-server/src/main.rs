//! tether-server: demo daemon serving the example commands
//!
//! Loads the shell configuration, starts the server and runs until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tether_server::demo::demo_commands;
use tether_server::{ConfigLoader, MemoryCache, ShellCache, ShellServerBuilder};
use tether_utils::{init_logging_with_config, Result};

/// Embedded administration shell, serving demo commands
#[derive(Parser, Debug)]
#[command(name = "tether-server")]
#[command(about = "Remote administration shell daemon")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the XDG config location)
    #[arg(short, long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Fixed listen port, overriding the port derived from the app name
    #[arg(short, long)]
    port: Option<u16>,

    /// Application name used to derive the listen port
    #[arg(long)]
    app_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load_and_validate(cli.config.as_deref())?;
    if let Some(app_name) = cli.app_name {
        config.app_name = app_name;
    }
    if let Some(port) = cli.port {
        config.server.port = Some(port);
    }

    init_logging_with_config(config.logging.to_log_config()?)?;

    let cache: Arc<dyn ShellCache> = Arc::new(MemoryCache::new());
    let server = ShellServerBuilder::new()
        .config(config)
        .cache(Arc::clone(&cache))
        .register_all(demo_commands(cache))
        .build()?;

    let addr = server.start()?;
    info!(%addr, commands = server.registry().len(), "tether-server ready");

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    server.close().await;

    info!("tether-server stopped");
    Ok(())
}
