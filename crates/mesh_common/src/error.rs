//! Error types for the mesh bot tooling.

use crate::config_store::ConfigError;
use crate::dependency_installer::InstallError;
use crate::process_supervisor::ProcessStartError;
use crate::repo_sync::RepoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Process start error: {0}")]
    ProcessStart(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl MeshError {
    /// Short stable identifier, used in logs and JSON reports
    pub fn code(&self) -> &'static str {
        match self {
            MeshError::Timeout(_) => "timeout",
            MeshError::NotFound(_) => "not_found",
            MeshError::Parse(_) => "parse",
            MeshError::Io(_) => "io",
            MeshError::VersionControl(_) => "version_control",
            MeshError::ProcessStart(_) => "process_start",
            MeshError::Command(_) => "command",
            MeshError::Settings(_) => "settings",
        }
    }
}

impl From<ConfigError> for MeshError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Parse { .. } | ConfigError::InvalidName { .. } => {
                MeshError::Parse(err.to_string())
            }
            ConfigError::Io { source, .. } => MeshError::Io(source),
        }
    }
}

impl From<RepoError> for MeshError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotLocated => MeshError::NotFound(err.to_string()),
            RepoError::Prompt(source) => MeshError::Io(source),
            other => MeshError::VersionControl(other.to_string()),
        }
    }
}

impl From<InstallError> for MeshError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::Prompt(source) => MeshError::Io(source),
            other => MeshError::Command(other.to_string()),
        }
    }
}

impl From<ProcessStartError> for MeshError {
    fn from(err: ProcessStartError) -> Self {
        match err {
            ProcessStartError::Prompt(source) => MeshError::Io(source),
            other => MeshError::ProcessStart(other.to_string()),
        }
    }
}
