//! Command-line surface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meshctl")]
#[command(about = "Configure and maintain a meshing-around bot host", long_about = None)]
#[command(version = env!("MESHCTL_VERSION"))]
pub struct Cli {
    /// Bot configuration file to edit
    #[arg(long, short = 'c', default_value = "config.ini")]
    pub config: PathBuf,

    /// Tool settings file (defaults to $XDG_CONFIG_HOME/meshctl/settings.toml)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Bot checkout to use instead of searching for one
    #[arg(long)]
    pub checkout: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive configuration menu (the default)
    Configure,

    /// Refresh the package index, upgrade, remove unused packages
    Update {
        #[arg(long)]
        json: bool,
    },

    /// Locate or clone the bot checkout and pull the latest code
    Sync {
        #[arg(long)]
        json: bool,
    },

    /// Install the bot's Python requirements
    InstallDeps {
        #[arg(long)]
        json: bool,
    },

    /// Check the bot process and start it if needed
    Verify {
        #[arg(long)]
        json: bool,
    },

    /// System update, sync, dependencies and bot verification in one run
    Maintain {
        #[arg(long)]
        json: bool,
    },

    /// Full maintenance plus a default configuration
    QuickSetup {
        #[arg(long)]
        json: bool,
    },

    /// Copy the configuration file into the checkout
    Deploy {
        #[arg(long)]
        json: bool,
    },

    /// Show host, toolchain and checkout information
    Info {
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    pub fn json(&self) -> bool {
        match self {
            Command::Configure => false,
            Command::Update { json }
            | Command::Sync { json }
            | Command::InstallDeps { json }
            | Command::Verify { json }
            | Command::Maintain { json }
            | Command::QuickSetup { json }
            | Command::Deploy { json }
            | Command::Info { json } => *json,
        }
    }
}
