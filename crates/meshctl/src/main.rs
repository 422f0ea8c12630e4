//! meshctl - setup and maintenance tool for a meshing-around bot host

use anyhow::{Context, Result};
use clap::Parser;
use mesh_common::{Session, Settings, SystemRunner};
use meshctl::cli::{Cli, Command};
use meshctl::errors::EXIT_GENERAL_ERROR;
use meshctl::terminal::TerminalPrompter;
use meshctl::{commands, logging};
use owo_colors::OwoColorize;
use tracing::info;

// Version is embedded at build time
const VERSION: &str = env!("MESHCTL_VERSION");

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // Interrupt ends the session; a started bot keeps running in its own group
    if let Err(e) = ctrlc::set_handler(|| {
        println!("\n{}", "Configuration cancelled by user".yellow());
        std::process::exit(0);
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            EXIT_GENERAL_ERROR
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    info!(version = VERSION, "meshctl starting");

    let settings = Settings::load(cli.settings.as_deref()).context("Failed to load settings")?;
    let runner = SystemRunner::new(&settings);

    let mut session = Session::open(&cli.config)
        .with_context(|| format!("Failed to read {}", cli.config.display()))?
        .with_checkout(cli.checkout.clone());

    let command = cli.command.unwrap_or(Command::Configure);
    let prompter = TerminalPrompter::for_command(&command);
    commands::run(&command, &settings, &runner, &prompter, &mut session)
}
