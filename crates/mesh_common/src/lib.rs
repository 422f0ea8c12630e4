//! Mesh Common - configuration model and host orchestration for the
//! meshing-around bot.
//!
//! The interactive front end lives in `meshctl`; everything that touches the
//! filesystem, runs commands or spawns the bot lives here.

pub mod command_exec;
pub mod config_store;
pub mod dependency_installer;
pub mod error;
pub mod maintenance;
pub mod process_supervisor;
pub mod prompt;
pub mod repo_sync;
pub mod settings;
pub mod system_info;
pub mod wizard;

pub use command_exec::{CommandResult, CommandRunner, CommandSpec, FailureReason, SystemRunner};
pub use config_store::{ConfigError, ConfigStore, FIXED_SECTIONS};
pub use error::MeshError;
pub use maintenance::{MaintenanceRun, Orchestrator, Session, StepRecord};
pub use prompt::{Notice, Prompter, ScriptedPrompter};
pub use settings::Settings;
