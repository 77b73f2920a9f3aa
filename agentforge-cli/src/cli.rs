use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "agentforge",
    version,
    about = "Inspect and exercise the MCP tool servers of an agent runtime"
)]
pub struct Cli {
    /// Runtime config file (defaults to config/agent.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect every configured server and report the outcome
    Status,
    /// List the aggregated, filtered tool catalogue
    Tools {
        #[arg(long)]
        json: bool,
    },
    /// Invoke one tool by its namespaced name
    Call {
        name: String,
        /// JSON object passed as the tool arguments
        #[arg(long)]
        args: Option<String>,
        /// Target server, when the name is not namespaced
        #[arg(long)]
        server: Option<String>,
    },
    /// Show the built-in server presets
    Presets,
}
