//! Interactive configuration and maintenance menu

use crate::commands::report;
use crate::errors::{EXIT_GENERAL_ERROR, EXIT_SUCCESS};
use crate::terminal::{print_header, print_rows, print_section};
use anyhow::Result;
use mesh_common::system_info::HostReport;
use mesh_common::wizard::Editor;
use mesh_common::{CommandRunner, MeshError, Notice, Orchestrator, Prompter, Session, Settings};
use std::io;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Edit(Editor),
    SystemUpdate,
    SyncCheckout,
    InstallDependencies,
    VerifyBot,
    FullMaintenance,
    QuickSetup,
    Deploy,
    SystemInfo,
    Save,
    SaveDeployStart,
    SaveAndExit,
    ExitWithoutSaving,
}

impl MenuAction {
    pub fn all() -> Vec<MenuAction> {
        let mut actions: Vec<MenuAction> = Editor::ALL.iter().map(|e| MenuAction::Edit(*e)).collect();
        actions.extend([
            MenuAction::SystemUpdate,
            MenuAction::SyncCheckout,
            MenuAction::InstallDependencies,
            MenuAction::VerifyBot,
            MenuAction::FullMaintenance,
            MenuAction::QuickSetup,
            MenuAction::Deploy,
            MenuAction::SystemInfo,
            MenuAction::Save,
            MenuAction::SaveDeployStart,
            MenuAction::SaveAndExit,
            MenuAction::ExitWithoutSaving,
        ]);
        actions
    }

    pub fn label(&self) -> &'static str {
        match self {
            MenuAction::Edit(editor) => editor.title(),
            MenuAction::SystemUpdate => "System Update (apt update/upgrade)",
            MenuAction::SyncCheckout => "Sync or Clone Bot Checkout",
            MenuAction::InstallDependencies => "Install Python Dependencies",
            MenuAction::VerifyBot => "Verify / Start Bot",
            MenuAction::FullMaintenance => "Full Maintenance",
            MenuAction::QuickSetup => "Quick Setup (maintenance + defaults)",
            MenuAction::Deploy => "Deploy Configuration to Checkout",
            MenuAction::SystemInfo => "Show System Info",
            MenuAction::Save => "Save Configuration",
            MenuAction::SaveDeployStart => "Save, Deploy and Start Bot",
            MenuAction::SaveAndExit => "Save and Exit",
            MenuAction::ExitWithoutSaving => "Exit without Saving",
        }
    }
}

/// How the menu session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuExit {
    Saved,
    Discarded,
    /// Input closed or the operator interrupted a question
    Cancelled,
    /// The configuration could not be written
    SaveFailed,
}

impl MenuExit {
    pub fn code(&self) -> i32 {
        match self {
            MenuExit::SaveFailed => EXIT_GENERAL_ERROR,
            _ => EXIT_SUCCESS,
        }
    }
}

pub struct Menu<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
}

impl<'a> Menu<'a> {
    pub fn new(
        settings: &'a Settings,
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            settings,
            runner,
            prompter,
        }
    }

    fn orchestrator(&self) -> Orchestrator<'a> {
        Orchestrator::new(self.settings, self.runner, self.prompter)
    }

    pub fn run(&self, session: &mut Session) -> Result<MenuExit> {
        print_header("Meshing-Around Interactive Configuration Tool");
        self.prompter.notify(
            Notice::Info,
            &format!("Editing {}", session.config_path.display()),
        );

        let actions = MenuAction::all();
        let labels: Vec<&str> = actions.iter().map(|a| a.label()).collect();
        let save_and_exit = actions
            .iter()
            .position(|a| *a == MenuAction::SaveAndExit)
            .unwrap_or(0);

        loop {
            print_section("Configuration Menu");
            let choice = match self.prompter.choose("Select option", &labels, save_and_exit) {
                Ok(choice) => choice,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(self.cancelled()),
                Err(e) => return Err(e.into()),
            };
            let action = actions[choice];
            debug!(action = action.label(), "menu action");

            match self.dispatch(action, session) {
                Ok(Some(exit)) => return Ok(exit),
                Ok(None) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(self.cancelled()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn cancelled(&self) -> MenuExit {
        self.prompter
            .notify(Notice::Warning, "Configuration cancelled by user");
        MenuExit::Cancelled
    }

    /// `Some` ends the session
    fn dispatch(&self, action: MenuAction, session: &mut Session) -> io::Result<Option<MenuExit>> {
        let orchestrator = self.orchestrator();
        let run = match action {
            MenuAction::Edit(editor) => {
                print_section(editor.title());
                editor.run(session, self.prompter)?;
                return Ok(None);
            }
            MenuAction::SystemInfo => {
                let checkout = match session.checkout.clone() {
                    Some(path) => Some(path),
                    None => orchestrator.repository().locate(),
                };
                let report = HostReport::collect(
                    self.settings,
                    self.runner,
                    checkout.as_deref(),
                    &session.config_path,
                );
                print_section("System Information");
                print_rows(&report.rows());
                return Ok(None);
            }
            MenuAction::Save => {
                return Ok(self.save(session).err());
            }
            MenuAction::SaveAndExit => {
                return Ok(Some(match self.save(session) {
                    Ok(()) => {
                        self.prompter
                            .notify(Notice::Success, "Configuration complete!");
                        MenuExit::Saved
                    }
                    Err(exit) => exit,
                }));
            }
            MenuAction::ExitWithoutSaving => {
                if !session.dirty
                    || self.prompter.confirm("Exit without saving changes?", false)?
                {
                    self.prompter.notify(Notice::Warning, "Exiting without saving");
                    return Ok(Some(MenuExit::Discarded));
                }
                return Ok(None);
            }
            MenuAction::SaveDeployStart => match orchestrator.save_deploy_start(session) {
                Ok(run) => run,
                Err(e) => return Ok(Some(self.save_failed(&e))),
            },
            MenuAction::SystemUpdate => orchestrator.system_update(session),
            MenuAction::SyncCheckout => orchestrator.sync_checkout(session),
            MenuAction::InstallDependencies => orchestrator.install_dependencies(session),
            MenuAction::VerifyBot => orchestrator.verify_bot(session),
            MenuAction::FullMaintenance => orchestrator.full_maintenance(session),
            MenuAction::QuickSetup => orchestrator.quick_setup(session),
            MenuAction::Deploy => orchestrator.deploy(session),
        };
        // Summary output failures are not worth ending the session over
        let _ = report(&run, false);
        Ok(None)
    }

    fn save(&self, session: &mut Session) -> std::result::Result<(), MenuExit> {
        match session.save() {
            Ok(()) => {
                self.prompter.notify(
                    Notice::Success,
                    &format!("Configuration saved to {}", session.config_path.display()),
                );
                Ok(())
            }
            Err(e) => Err(self.save_failed(&MeshError::from(e))),
        }
    }

    fn save_failed(&self, err: &MeshError) -> MenuExit {
        error!(code = err.code(), error = %err, "save failed");
        self.prompter
            .notify(Notice::Error, &format!("Failed to save config: {}", err));
        MenuExit::SaveFailed
    }
}
