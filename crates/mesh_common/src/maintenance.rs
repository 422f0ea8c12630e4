//! MaintenanceOrchestrator - named multi-step procedures over the bot host
//!
//! Procedures are ordered lists of `Step`s consumed by one runner that fills a
//! `MaintenanceRun`. A failing step is recorded and the list continues, unless
//! the step is marked fatal. A step may report itself skipped when its
//! precondition (usually a resolved checkout) is missing; skipped steps are
//! listed separately and never count as attempted.
//!
//! All session state (config path, store, checkout) travels in `Session`.

use crate::command_exec::{CommandRunner, CommandSpec};
use crate::config_store::{ConfigError, ConfigStore};
use crate::dependency_installer::DependencyInstaller;
use crate::error::MeshError;
use crate::process_supervisor::ProcessSupervisor;
use crate::prompt::{Notice, Prompter};
use crate::repo_sync::{CheckoutLocation, RepositorySync};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub const STEP_REFRESH_INDEX: &str = "Refresh package index";
pub const STEP_UPGRADE: &str = "Upgrade packages";
pub const STEP_CLEANUP: &str = "Remove unused packages";
pub const STEP_SYSTEM_UPDATE: &str = "System update";
pub const STEP_LOCATE: &str = "Locate checkout";
pub const STEP_PULL: &str = "Pull updates";
pub const STEP_INSTALL: &str = "Install dependencies";
pub const STEP_VERIFY: &str = "Verify bot process";
pub const STEP_DEFAULTS: &str = "Default configuration";
pub const STEP_SAVE: &str = "Save configuration";
pub const STEP_DEPLOY: &str = "Deploy configuration";

const NO_CHECKOUT: &str = "no checkout location";

/// Interactive session state, owned by whichever procedure currently runs
#[derive(Debug, Clone)]
pub struct Session {
    pub config_path: PathBuf,
    pub store: ConfigStore,
    pub checkout: Option<CheckoutLocation>,
    /// Store changed since the last save
    pub dirty: bool,
}

impl Session {
    pub fn new(config_path: impl Into<PathBuf>, store: ConfigStore) -> Self {
        Self {
            config_path: config_path.into(),
            store,
            checkout: None,
            dirty: false,
        }
    }

    /// Load the store at `config_path` (fresh when the file is absent)
    pub fn open(config_path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = config_path.into();
        let store = ConfigStore::load(&config_path)?;
        Ok(Self::new(config_path, store))
    }

    pub fn with_checkout(mut self, checkout: Option<CheckoutLocation>) -> Self {
        self.checkout = checkout;
        self
    }

    pub fn save(&mut self) -> Result<(), ConfigError> {
        self.store.save(&self.config_path)?;
        self.dirty = false;
        Ok(())
    }

    pub fn replace_store(&mut self, store: ConfigStore) {
        self.store = store;
        self.dirty = true;
    }
}

/// One attempted step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    pub detail: Option<String>,
    /// Counts toward the procedure's verdict
    pub required: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub name: String,
    pub reason: String,
}

/// Log of one orchestrated procedure; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRun {
    pub id: Uuid,
    pub procedure: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<StepRecord>,
    pub skipped: Vec<SkippedStep>,
    /// A fatal step failed and the remaining steps were not run
    pub aborted: bool,
}

impl MaintenanceRun {
    pub fn new(procedure: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            procedure: procedure.to_string(),
            started_at: Utc::now(),
            entries: Vec::new(),
            skipped: Vec::new(),
            aborted: false,
        }
    }

    pub fn entry(&self, name: &str) -> Option<&StepRecord> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn failures(&self) -> Vec<&StepRecord> {
        self.entries.iter().filter(|e| !e.success).collect()
    }

    /// Every required step that ran succeeded and nothing aborted the run
    pub fn succeeded(&self) -> bool {
        !self.aborted && self.entries.iter().all(|e| e.success || !e.required)
    }

    pub fn summary(&self) -> String {
        let ok = self.entries.iter().filter(|e| e.success).count();
        let mut lines = vec![format!(
            "{}: {} of {} step(s) succeeded",
            self.procedure,
            ok,
            self.entries.len()
        )];
        for failure in self.failures() {
            let ignored = if failure.required { "" } else { " (ignored)" };
            lines.push(format!(
                "  failed: {}{}: {}",
                failure.name,
                ignored,
                failure.error.as_deref().unwrap_or("unknown error")
            ));
        }
        for skipped in &self.skipped {
            lines.push(format!("  skipped: {} ({})", skipped.name, skipped.reason));
        }
        if self.aborted {
            lines.push("  aborted after a fatal step".to_string());
        }
        lines.join("\n")
    }
}

/// How a step ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done(Option<String>),
    Failed(String),
    Skipped(String),
}

type StepAction<'s> = Box<dyn FnOnce(&mut Session) -> StepOutcome + 's>;

pub struct Step<'s> {
    name: String,
    fatal: bool,
    required: bool,
    action: StepAction<'s>,
}

impl<'s> Step<'s> {
    pub fn new(name: &str, action: impl FnOnce(&mut Session) -> StepOutcome + 's) -> Self {
        Self {
            name: name.to_string(),
            fatal: false,
            required: true,
            action: Box::new(action),
        }
    }

    /// Failure stops the remaining steps
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Failure is recorded but does not affect the verdict
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

pub struct Orchestrator<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
}

impl<'a> Orchestrator<'a> {
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

    pub fn repository(&self) -> RepositorySync<'a> {
        RepositorySync::new(self.settings, self.runner)
    }

    pub fn supervisor(&self) -> ProcessSupervisor<'a> {
        ProcessSupervisor::new(self.settings, self.runner)
    }

    fn installer(&self) -> DependencyInstaller<'a> {
        DependencyInstaller::new(self.settings, self.runner)
    }

    /// Consume the steps in order, recording each outcome
    pub fn run_steps(
        &self,
        procedure: &str,
        session: &mut Session,
        steps: Vec<Step<'_>>,
    ) -> MaintenanceRun {
        let mut run = MaintenanceRun::new(procedure);
        info!(run_id = %run.id, procedure, steps = steps.len(), "procedure started");

        let mut steps = steps.into_iter();
        while let Some(step) = steps.next() {
            self.prompter.notify(Notice::Info, &format!("{}...", step.name));
            let start = Instant::now();
            let outcome = (step.action)(session);
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                StepOutcome::Done(detail) => {
                    info!(run_id = %run.id, step = %step.name, duration_ms, "step succeeded");
                    let text = match &detail {
                        Some(d) => format!("{}: {}", step.name, d),
                        None => format!("{}: done", step.name),
                    };
                    self.prompter.notify(Notice::Success, &text);
                    run.entries.push(StepRecord {
                        name: step.name,
                        success: true,
                        error: None,
                        detail,
                        required: step.required,
                        duration_ms,
                    });
                }
                StepOutcome::Failed(error) => {
                    warn!(run_id = %run.id, step = %step.name, error = %error, duration_ms, "step failed");
                    self.prompter
                        .notify(Notice::Error, &format!("{} failed: {}", step.name, error));
                    run.entries.push(StepRecord {
                        name: step.name,
                        success: false,
                        error: Some(error),
                        detail: None,
                        required: step.required,
                        duration_ms,
                    });
                    if step.fatal {
                        run.aborted = true;
                        for rest in steps.by_ref() {
                            run.skipped.push(SkippedStep {
                                name: rest.name,
                                reason: "not run after fatal failure".to_string(),
                            });
                        }
                    }
                }
                StepOutcome::Skipped(reason) => {
                    info!(run_id = %run.id, step = %step.name, reason = %reason, "step skipped");
                    self.prompter
                        .notify(Notice::Info, &format!("{} skipped: {}", step.name, reason));
                    run.skipped.push(SkippedStep {
                        name: step.name,
                        reason,
                    });
                }
            }
        }

        info!(
            run_id = %run.id,
            procedure,
            failures = run.failures().len(),
            succeeded = run.succeeded(),
            "procedure finished"
        );
        run
    }

    // -- steps -------------------------------------------------------------

    fn package_step(&self, name: &str, argv: &[String]) -> Step<'_> {
        let spec = CommandSpec::new(argv.iter().cloned())
            .elevated()
            .timeout(self.settings.system.command_timeout());
        Step::new(name, move |_session: &mut Session| {
            let result = self.runner.run(&spec);
            match result.error() {
                None => StepOutcome::Done(None),
                Some(err) => StepOutcome::Failed(err.to_string()),
            }
        })
    }

    fn system_update_steps(&self) -> Vec<Step<'_>> {
        let system = &self.settings.system;
        vec![
            self.package_step(STEP_REFRESH_INDEX, &system.refresh_index),
            self.package_step(STEP_UPGRADE, &system.upgrade),
            self.package_step(STEP_CLEANUP, &system.cleanup).optional(),
        ]
    }

    /// The whole system update folded into one step
    fn system_update_step(&self) -> Step<'_> {
        Step::new(STEP_SYSTEM_UPDATE, move |session: &mut Session| {
            let run = self.system_update(session);
            if run.succeeded() {
                StepOutcome::Done(None)
            } else {
                let failed: Vec<&str> = run
                    .failures()
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| f.name.as_str())
                    .collect();
                StepOutcome::Failed(format!("failed: {}", failed.join(", ")))
            }
        })
    }

    fn locate_step(&self) -> Step<'_> {
        Step::new(STEP_LOCATE, move |session: &mut Session| {
            match self
                .repository()
                .ensure(session.checkout.as_deref(), self.prompter)
            {
                Ok(location) => {
                    let detail = location.display().to_string();
                    session.checkout = Some(location);
                    StepOutcome::Done(Some(detail))
                }
                Err(e) => {
                    // Later steps must not act on a hint that never resolved
                    session.checkout = None;
                    StepOutcome::Failed(MeshError::from(e).to_string())
                }
            }
        })
    }

    fn pull_step(&self) -> Step<'_> {
        Step::new(STEP_PULL, move |session: &mut Session| {
            let Some(location) = session.checkout.as_deref() else {
                return StepOutcome::Skipped(NO_CHECKOUT.to_string());
            };
            match self.repository().pull(location, self.prompter) {
                Ok(outcome) => StepOutcome::Done(Some(outcome.describe())),
                Err(e) => StepOutcome::Failed(MeshError::from(e).to_string()),
            }
        })
    }

    fn install_step(&self) -> Step<'_> {
        Step::new(STEP_INSTALL, move |session: &mut Session| {
            let Some(location) = session.checkout.as_deref() else {
                return StepOutcome::Skipped(NO_CHECKOUT.to_string());
            };
            match self.installer().install(location, self.prompter) {
                Ok(outcome) => StepOutcome::Done(Some(outcome.describe())),
                Err(e) => StepOutcome::Failed(MeshError::from(e).to_string()),
            }
        })
    }

    fn verify_step(&self) -> Step<'_> {
        Step::new(STEP_VERIFY, move |session: &mut Session| {
            let Some(location) = session.checkout.as_deref() else {
                return StepOutcome::Skipped(NO_CHECKOUT.to_string());
            };
            match self.supervisor().verify(location, self.prompter) {
                Ok(verdict) if verdict.is_success() => {
                    let pid = verdict
                        .process
                        .as_ref()
                        .map(|p| format!(" (PID {})", p.pid))
                        .unwrap_or_default();
                    StepOutcome::Done(Some(format!("{}{}", verdict.state.as_str(), pid)))
                }
                Ok(verdict) if verdict.is_declined() => {
                    StepOutcome::Skipped("start declined".to_string())
                }
                Ok(verdict) => {
                    if let Some(output) = verdict.stderr.as_deref().filter(|s| !s.trim().is_empty())
                    {
                        self.prompter.notify(Notice::Error, output.trim_end());
                    }
                    let text = verdict
                        .failure_text()
                        .unwrap_or_else(|| verdict.state.as_str().to_string());
                    StepOutcome::Failed(MeshError::ProcessStart(text).to_string())
                }
                Err(e) => StepOutcome::Failed(MeshError::from(e).to_string()),
            }
        })
    }

    fn defaults_step(&self) -> Step<'_> {
        Step::new(STEP_DEFAULTS, move |session: &mut Session| {
            if !session.store.is_empty() {
                match self
                    .prompter
                    .confirm("Replace the current configuration with defaults?", false)
                {
                    Ok(true) => {}
                    Ok(false) => {
                        return StepOutcome::Skipped("existing configuration kept".to_string())
                    }
                    Err(e) => return StepOutcome::Failed(format!("prompt interrupted: {}", e)),
                }
            }
            session.replace_store(ConfigStore::with_defaults());
            StepOutcome::Done(Some("safe defaults applied".to_string()))
        })
    }

    fn deploy_step(&self) -> Step<'_> {
        Step::new(STEP_DEPLOY, move |session: &mut Session| {
            let Some(location) = session.checkout.as_deref() else {
                return StepOutcome::Skipped(NO_CHECKOUT.to_string());
            };
            let dest = location.join(&self.settings.bot.deploy_filename);
            let same = match (session.config_path.canonicalize(), dest.canonicalize()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };
            if same {
                return StepOutcome::Done(Some("already in place".to_string()));
            }
            match fs::copy(&session.config_path, &dest) {
                Ok(_) => {
                    info!(from = %session.config_path.display(), to = %dest.display(), "config deployed");
                    StepOutcome::Done(Some(dest.display().to_string()))
                }
                Err(e) => StepOutcome::Failed(format!(
                    "copy {} -> {}: {}",
                    session.config_path.display(),
                    dest.display(),
                    e
                )),
            }
        })
    }

    // -- procedures --------------------------------------------------------

    /// Refresh, upgrade, clean up. Verdict ignores the cleanup step.
    pub fn system_update(&self, session: &mut Session) -> MaintenanceRun {
        self.run_steps("system update", session, self.system_update_steps())
    }

    /// Every step runs regardless of earlier failures
    pub fn full_maintenance(&self, session: &mut Session) -> MaintenanceRun {
        self.run_steps("full maintenance", session, self.full_maintenance_steps())
    }

    fn full_maintenance_steps(&self) -> Vec<Step<'_>> {
        vec![
            self.system_update_step(),
            self.locate_step(),
            self.pull_step(),
            self.install_step(),
            self.verify_step(),
        ]
    }

    /// Full maintenance plus a default configuration for first-run setups
    pub fn quick_setup(&self, session: &mut Session) -> MaintenanceRun {
        let mut steps = self.full_maintenance_steps();
        steps.push(self.defaults_step());
        self.run_steps("quick setup", session, steps)
    }

    /// Locate (or clone) the checkout and pull it
    pub fn sync_checkout(&self, session: &mut Session) -> MaintenanceRun {
        self.run_steps(
            "checkout sync",
            session,
            vec![self.locate_step(), self.pull_step()],
        )
    }

    pub fn install_dependencies(&self, session: &mut Session) -> MaintenanceRun {
        self.run_steps(
            "dependency install",
            session,
            vec![self.locate_step(), self.install_step()],
        )
    }

    pub fn verify_bot(&self, session: &mut Session) -> MaintenanceRun {
        self.run_steps(
            "bot verification",
            session,
            vec![self.locate_step(), self.verify_step()],
        )
    }

    /// Copy the saved configuration into the checkout
    pub fn deploy(&self, session: &mut Session) -> MaintenanceRun {
        self.run_steps(
            "deploy",
            session,
            vec![self.locate_step(), self.deploy_step()],
        )
    }

    /// Save, deploy and start. Only the save can fail the whole call.
    pub fn save_deploy_start(&self, session: &mut Session) -> Result<MaintenanceRun, MeshError> {
        let mut save_error: Option<ConfigError> = None;
        let save = Step::new(STEP_SAVE, |session: &mut Session| match session.save() {
            Ok(()) => StepOutcome::Done(Some(session.config_path.display().to_string())),
            Err(e) => {
                let text = e.to_string();
                save_error = Some(e);
                StepOutcome::Failed(text)
            }
        })
        .fatal();

        let steps = vec![
            save,
            self.locate_step(),
            self.deploy_step(),
            self.verify_step(),
        ];
        let run = self.run_steps("save and deploy", session, steps);

        match save_error {
            Some(e) => Err(e.into()),
            None => Ok(run),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_exec::ScriptedRunner;
    use crate::prompt::ScriptedPrompter;

    fn isolated_settings() -> Settings {
        let mut settings = Settings::default();
        settings.repository.candidate_dirs = Vec::new();
        settings.repository.search_roots = Vec::new();
        settings
    }

    fn session(dir: &tempfile::TempDir) -> Session {
        Session::new(dir.path().join("config.ini"), ConfigStore::new())
    }

    #[test]
    fn test_system_update_runs_all_three_elevated() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let run = orchestrator.system_update(&mut session(&dir));
        assert!(run.succeeded());
        assert_eq!(run.entries.len(), 3);
        assert!(runner.specs().iter().all(|s| s.elevated && !s.capture));
        assert_eq!(
            runner.calls()[1],
            vec!["apt-get".to_string(), "upgrade".to_string(), "-y".to_string()]
        );
    }

    #[test]
    fn test_system_update_continues_after_refresh_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().fail(&["update"], 100, "could not resolve host");
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let run = orchestrator.system_update(&mut session(&dir));
        assert!(!run.succeeded());
        assert_eq!(run.entries.len(), 3);
        assert_eq!(run.failures().len(), 1);
        assert!(run.entry(STEP_CLEANUP).unwrap().success);
    }

    #[test]
    fn test_cleanup_failure_does_not_fail_system_update() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().fail(&["autoremove"], 1, "dpkg lock held");
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let run = orchestrator.system_update(&mut session(&dir));
        assert!(run.succeeded());
        assert_eq!(run.failures().len(), 1);
        assert!(run.summary().contains("(ignored)"));
    }

    #[test]
    fn test_full_maintenance_with_nothing_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().fail(&["apt-get"], 100, "E: unable to lock");
        // "Skip" at the locate prompt
        let prompter = ScriptedPrompter::new(["3"]);
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let run = orchestrator.full_maintenance(&mut session(&dir));
        let failed: Vec<&str> = run.failures().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec![STEP_SYSTEM_UPDATE, STEP_LOCATE]);
        assert_eq!(run.entries.len(), 2);
        assert!(run.entry(STEP_INSTALL).is_none());
        assert!(run.entry(STEP_VERIFY).is_none());
        assert_eq!(run.skipped.len(), 3);
        assert!(!run.aborted);
    }

    #[test]
    fn test_unresolved_hint_is_dropped_after_locate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        // decline cloning into the missing directory
        let prompter = ScriptedPrompter::new(["n"]);
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let missing = dir.path().join("does-not-exist");
        let mut session = session(&dir).with_checkout(Some(missing.clone()));
        let run = orchestrator.full_maintenance(&mut session);

        assert!(session.checkout.is_none());
        assert!(!run.entry(STEP_LOCATE).unwrap().success);
        assert!(run.entry(STEP_INSTALL).is_none());
        assert!(run.entry(STEP_VERIFY).is_none());
        assert_eq!(run.skipped.len(), 3);
        assert_eq!(runner.count(&["install"]), 0);
        assert!(!missing.join("logs").exists());
    }

    #[test]
    fn test_fatal_step_stops_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let mut ran_after = false;
        let steps = vec![
            Step::new("first", |_: &mut Session| StepOutcome::Failed("boom".to_string())).fatal(),
            Step::new("second", |_: &mut Session| {
                ran_after = true;
                StepOutcome::Done(None)
            }),
        ];
        let run = orchestrator.run_steps("test", &mut session(&dir), steps);
        assert!(run.aborted);
        assert!(!run.succeeded());
        assert_eq!(run.skipped[0].name, "second");
        assert!(!ran_after);
    }

    #[test]
    fn test_failures_are_announced_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().fail(&["upgrade"], 100, "held packages");
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        orchestrator.system_update(&mut session(&dir));
        let errors = prompter.notices_of(Notice::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with(STEP_UPGRADE));
    }

    #[test]
    fn test_quick_setup_fills_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::new(["3"]);
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let mut session = session(&dir);
        let run = orchestrator.quick_setup(&mut session);
        assert!(run.entry(STEP_DEFAULTS).unwrap().success);
        assert_eq!(session.store.get("general", "bot_name"), Some("MeshBot"));
        assert!(session.dirty);
    }

    #[test]
    fn test_quick_setup_keeps_existing_store_when_declined() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::new(["3", "n"]);
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let mut session = session(&dir);
        session.store.set("general", "bot_name", "Relay").unwrap();
        let run = orchestrator.quick_setup(&mut session);
        assert!(run.skipped.iter().any(|s| s.name == STEP_DEFAULTS));
        assert_eq!(session.store.get("general", "bot_name"), Some("Relay"));
    }

    #[test]
    fn test_deploy_copies_saved_config() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let mut session = session(&dir).with_checkout(Some(checkout.path().to_path_buf()));
        session.store.set("interface", "type", "tcp").unwrap();
        session.save().unwrap();

        let run = orchestrator.deploy(&mut session);
        assert!(run.succeeded(), "{}", run.summary());
        let deployed = ConfigStore::load(&checkout.path().join("config.ini")).unwrap();
        assert_eq!(deployed.get("interface", "type"), Some("tcp"));
    }

    #[test]
    fn test_deploy_without_saved_file_fails_softly() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let mut session = session(&dir).with_checkout(Some(checkout.path().to_path_buf()));
        let run = orchestrator.deploy(&mut session);
        assert!(!run.succeeded());
        assert!(!run.entry(STEP_DEPLOY).unwrap().success);
    }

    #[test]
    fn test_save_deploy_start_save_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::default();
        let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

        let mut session = Session::new(blocker.join("config.ini"), ConfigStore::with_defaults());
        let err = orchestrator.save_deploy_start(&mut session).unwrap_err();
        assert_eq!(err.code(), "io");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_run_serializes_for_reports() {
        let mut run = MaintenanceRun::new("test");
        run.entries.push(StepRecord {
            name: STEP_PULL.to_string(),
            success: false,
            error: Some("network unreachable".to_string()),
            detail: None,
            required: true,
            duration_ms: 12,
        });
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["procedure"], "test");
        assert_eq!(json["entries"][0]["error"], "network unreachable");
    }
}
