mod cli;
mod commands;

use agentforge_core::RuntimeConfig;
use clap::Parser;
use cli::{Cli, Command};
use std::error::Error;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    debug!(command = ?cli.command, config = ?cli.config, "CLI arguments parsed");

    if let Command::Presets = cli.command {
        return commands::list_presets();
    }

    let config = RuntimeConfig::load(cli.config.as_deref())?;
    info!(
        agent = config.agent.name.as_deref().unwrap_or("unnamed"),
        servers = config.servers.len(),
        "Loaded runtime configuration"
    );

    match cli.command {
        Command::Status => commands::status(&config).await?,
        Command::Tools { json } => commands::tools(&config, json).await?,
        Command::Call { name, args, server } => {
            commands::call(&config, name, args, server).await?
        }
        Command::Presets => commands::list_presets()?,
    }
    Ok(())
}

// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true)
            .init();
    });
}
