//! DependencyInstaller - install the bot's Python requirements

use crate::command_exec::{CommandRunner, CommandSpec};
use crate::prompt::{Notice, Prompter};
use crate::settings::Settings;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("{command} failed (exit {exit_code}): {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("prompt interrupted: {0}")]
    Prompt(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { manifest: PathBuf },
    /// No manifest in the checkout, nothing to do
    NoManifest,
    Declined,
}

impl InstallOutcome {
    pub fn describe(&self) -> String {
        match self {
            InstallOutcome::Installed { manifest } => format!("installed from {}", manifest.display()),
            InstallOutcome::NoManifest => "no manifest, nothing to install".to_string(),
            InstallOutcome::Declined => "declined by operator".to_string(),
        }
    }
}

pub struct DependencyInstaller<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn CommandRunner) -> Self {
        Self { settings, runner }
    }

    pub fn install(
        &self,
        location: &Path,
        prompter: &dyn Prompter,
    ) -> Result<InstallOutcome, InstallError> {
        let manifest = location.join(&self.settings.bot.manifest);
        if !manifest.is_file() {
            info!(manifest = %manifest.display(), "no dependency manifest");
            return Ok(InstallOutcome::NoManifest);
        }

        if !prompter.confirm(
            &format!("Install dependencies from {}?", self.settings.bot.manifest),
            true,
        )? {
            return Ok(InstallOutcome::Declined);
        }

        let mut argv = self.settings.bot.installer.clone();
        argv.push(manifest.display().to_string());
        let spec = CommandSpec::new(argv)
            .cwd(location)
            .timeout(self.settings.system.command_timeout())
            .capture();

        prompter.notify(Notice::Info, &format!("Running {}", spec.display()));
        let result = self.runner.run(&spec);
        if !result.success() {
            warn!(command = %result.command, exit_code = result.exit_code, "dependency install failed");
            return Err(InstallError::Failed {
                command: result.command.clone(),
                exit_code: result.exit_code,
                stderr: result.error_text(),
            });
        }

        info!(manifest = %manifest.display(), duration_ms = result.duration_ms, "dependencies installed");
        Ok(InstallOutcome::Installed { manifest })
    }
}
