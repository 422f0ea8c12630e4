//! One-shot subcommands

use crate::cli::Command;
use crate::errors::{exit_code_for, EXIT_SUCCESS};
use crate::menu::Menu;
use crate::terminal::{print_rows, print_section};
use anyhow::{Context, Result};
use mesh_common::system_info::HostReport;
use mesh_common::{
    CommandRunner, MaintenanceRun, Notice, Orchestrator, Prompter, Session, Settings,
};
use owo_colors::OwoColorize;
use std::io;

/// Forwards questions, sends notices to the log so stdout carries only JSON
struct JsonPrompter<'p> {
    inner: &'p dyn Prompter,
}

impl Prompter for JsonPrompter<'_> {
    fn input(&self, prompt: &str, default: Option<&str>) -> io::Result<String> {
        self.inner.input(prompt, default)
    }

    fn confirm(&self, prompt: &str, default: bool) -> io::Result<bool> {
        self.inner.confirm(prompt, default)
    }

    fn choose(&self, prompt: &str, options: &[&str], default: usize) -> io::Result<usize> {
        self.inner.choose(prompt, options, default)
    }

    fn notify(&self, notice: Notice, text: &str) {
        match notice {
            Notice::Warning | Notice::Error => tracing::warn!("{}", text),
            Notice::Info | Notice::Success => tracing::info!("{}", text),
        }
    }
}

pub fn run(
    command: &Command,
    settings: &Settings,
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
    session: &mut Session,
) -> Result<i32> {
    if *command == Command::Configure {
        let exit = Menu::new(settings, runner, prompter).run(session)?;
        return Ok(exit.code());
    }

    let json = command.json();
    let quiet = JsonPrompter { inner: prompter };
    let prompter: &dyn Prompter = if json { &quiet } else { prompter };
    let orchestrator = Orchestrator::new(settings, runner, prompter);

    let run = match command {
        Command::Configure => return Ok(EXIT_SUCCESS),
        Command::Info { .. } => {
            let checkout = match session.checkout.clone() {
                Some(path) => Some(path),
                None => orchestrator.repository().locate(),
            };
            let report = HostReport::collect(
                settings,
                runner,
                checkout.as_deref(),
                &session.config_path,
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_section("System Information");
                print_rows(&report.rows());
            }
            return Ok(EXIT_SUCCESS);
        }
        Command::Update { .. } => orchestrator.system_update(session),
        Command::Sync { .. } => orchestrator.sync_checkout(session),
        Command::InstallDeps { .. } => orchestrator.install_dependencies(session),
        Command::Verify { .. } => orchestrator.verify_bot(session),
        Command::Maintain { .. } => orchestrator.full_maintenance(session),
        Command::Deploy { .. } => orchestrator.deploy(session),
        Command::QuickSetup { .. } => {
            let run = orchestrator.quick_setup(session);
            if session.dirty {
                session.save().with_context(|| {
                    format!("Failed to save config to {}", session.config_path.display())
                })?;
                prompter.notify(
                    Notice::Success,
                    &format!("Configuration saved to {}", session.config_path.display()),
                );
            }
            run
        }
    };

    report(&run, json)?;
    Ok(exit_code_for(&run))
}

pub fn report(run: &MaintenanceRun, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }
    print_section("Summary");
    let summary = run.summary();
    if run.succeeded() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.yellow());
    }
    Ok(())
}
