//! ProcessSupervisor - point-in-time liveness verdict for the bot
//!
//! One verification cycle:
//!   NotChecked -> AlreadyRunning                 (process table hit)
//!   NotChecked -> SyntaxError                    (dry-run check failed, no spawn)
//!   NotChecked -> Starting -> Started            (alive after the grace window)
//!   NotChecked -> Starting -> CrashedOnStart     (exited inside the window)
//!
//! The bot runs in its own process group with output redirected to files in
//! the checkout, so it outlives meshctl. Nothing is monitored after the verdict.

use crate::command_exec::{truncate_output, CommandRunner, CommandSpec};
use crate::prompt::{Notice, Prompter};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, System, UpdateKind};
use thiserror::Error;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SYNTAX_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ProcessStartError {
    #[error("could not prepare log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt interrupted: {0}")]
    Prompt(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    NotChecked,
    AlreadyRunning,
    SyntaxError,
    Starting,
    Started,
    CrashedOnStart,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotChecked => "not checked",
            Self::AlreadyRunning => "already running",
            Self::SyntaxError => "syntax error",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::CrashedOnStart => "crashed on start",
        }
    }
}

/// The spawned bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedProcess {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

/// Verdict of one verification cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub state: SupervisorState,
    pub process: Option<ManagedProcess>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub warnings: Vec<String>,
}

impl Verification {
    fn new(state: SupervisorState, warnings: Vec<String>) -> Self {
        Self {
            state,
            process: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            warnings,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            SupervisorState::AlreadyRunning | SupervisorState::Started
        )
    }

    /// Operator declined to start, nothing was attempted
    pub fn is_declined(&self) -> bool {
        self.state == SupervisorState::NotChecked
    }

    /// One-line failure text with the most useful captured output
    pub fn failure_text(&self) -> Option<String> {
        let detail = self
            .stderr
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.stdout.as_deref())
            .map(|s| s.trim().lines().last().unwrap_or("").to_string())
            .unwrap_or_default();
        match self.state {
            SupervisorState::SyntaxError => Some(format!("syntax check failed: {}", detail)),
            SupervisorState::CrashedOnStart => Some(match self.exit_code {
                Some(code) => format!("exited with status {} during startup: {}", code, detail),
                None => format!("exited during startup: {}", detail),
            }),
            _ => None,
        }
    }
}

pub struct ProcessSupervisor<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> ProcessSupervisor<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn CommandRunner) -> Self {
        Self { settings, runner }
    }

    /// PID of a running bot, found by scanning command lines for the entry script
    pub fn find_running(&self, location: &Path) -> Option<u32> {
        find_process_for_script(&location.join(&self.settings.bot.entry_script))
    }

    pub fn verify(
        &self,
        location: &Path,
        prompter: &dyn Prompter,
    ) -> Result<Verification, ProcessStartError> {
        let bot = &self.settings.bot;
        let mut warnings = Vec::new();

        let config_file = location.join(&bot.deploy_filename);
        if !config_file.exists() {
            let text = format!(
                "{} not found in {}, the bot may fall back to its own defaults",
                bot.deploy_filename,
                location.display()
            );
            prompter.notify(Notice::Warning, &text);
            warnings.push(text);
        }

        if let Some(pid) = self.find_running(location) {
            info!(pid, "bot already running");
            prompter.notify(Notice::Success, &format!("Bot already running (PID {})", pid));
            let mut verdict = Verification::new(SupervisorState::AlreadyRunning, warnings);
            verdict.process = Some(ManagedProcess {
                pid,
                started_at: Utc::now(),
                running: true,
            });
            return Ok(verdict);
        }

        let mut check = bot.syntax_check.clone();
        check.push(bot.entry_script.clone());
        let result = self.runner.run(
            &CommandSpec::new(check)
                .cwd(location)
                .timeout(SYNTAX_CHECK_TIMEOUT)
                .capture(),
        );
        if !result.success() {
            warn!(exit_code = result.exit_code, "entry script failed its dry-run check");
            let mut verdict = Verification::new(SupervisorState::SyntaxError, warnings);
            verdict.exit_code = Some(result.exit_code);
            verdict.stdout = result.stdout.clone();
            verdict.stderr = Some(result.error_text());
            return Ok(verdict);
        }

        if !prompter.confirm("Start the bot now?", true)? {
            return Ok(Verification::new(SupervisorState::NotChecked, warnings));
        }

        self.start(location, prompter, warnings)
    }

    fn start(
        &self,
        location: &Path,
        prompter: &dyn Prompter,
        warnings: Vec<String>,
    ) -> Result<Verification, ProcessStartError> {
        let bot = &self.settings.bot;
        let log_dir = location.join(&bot.log_dir);
        fs::create_dir_all(&log_dir).map_err(|source| ProcessStartError::LogFile {
            path: log_dir.clone(),
            source,
        })?;
        let stdout_path = log_dir.join("meshbot.stdout.log");
        let stderr_path = log_dir.join("meshbot.stderr.log");
        let stdout_file = create_log(&stdout_path)?;
        let stderr_file = create_log(&stderr_path)?;

        let command = format!("{} {}", bot.interpreter, bot.entry_script);
        let mut child = Command::new(&bot.interpreter)
            .arg(&bot.entry_script)
            .current_dir(location)
            .stdin(Stdio::null())
            .stdout(stdout_file)
            .stderr(stderr_file)
            .process_group(0)
            .spawn()
            .map_err(|source| ProcessStartError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut process = ManagedProcess {
            pid: child.id(),
            started_at: Utc::now(),
            running: true,
        };
        info!(pid = process.pid, command = %command, state = SupervisorState::Starting.as_str(), "bot spawned");
        prompter.notify(
            Notice::Info,
            &format!(
                "Started PID {}, watching for {}s",
                process.pid,
                bot.grace_window().as_secs_f32()
            ),
        );

        let deadline = Instant::now() + bot.grace_window();
        let exited = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status.code()),
                Ok(None) if Instant::now() >= deadline => break None,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!(error = %e, "could not poll bot process");
                    break None;
                }
            }
        };

        match exited {
            Some(code) => {
                process.running = false;
                warn!(pid = process.pid, ?code, "bot exited during grace window");
                let mut verdict = Verification::new(SupervisorState::CrashedOnStart, warnings);
                verdict.process = Some(process);
                verdict.exit_code = code;
                verdict.stdout = read_log(&stdout_path);
                verdict.stderr = read_log(&stderr_path);
                Ok(verdict)
            }
            None => {
                info!(pid = process.pid, "bot survived grace window");
                let mut verdict = Verification::new(SupervisorState::Started, warnings);
                verdict.process = Some(process);
                Ok(verdict)
            }
        }
    }
}

fn create_log(path: &Path) -> Result<File, ProcessStartError> {
    File::create(path).map_err(|source| ProcessStartError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

fn read_log(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|bytes| truncate_output(&bytes).0)
}

/// Scan the process table for a command line naming the script.
///
/// Matches the full path, or a bare/relative reference whose file name equals
/// the script's when the process runs from the script's directory.
pub fn find_process_for_script(script: &Path) -> Option<u32> {
    let file_name = script.file_name()?;
    let dir = script.parent();
    let own_pid = std::process::id();

    // Command lines are not loaded by a plain process refresh
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet));

    sys.processes().iter().find_map(|(pid, process)| {
        if pid.as_u32() == own_pid {
            return None;
        }
        let hit = process.cmd().iter().skip(1).any(|arg| {
            let arg_path = Path::new(arg);
            if arg_path == script {
                return true;
            }
            if arg_path.file_name() != Some(file_name) {
                return false;
            }
            if arg_path.is_absolute() {
                return arg_path.parent() == dir;
            }
            match (process_cwd(pid.as_u32()), dir) {
                (Some(cwd), Some(dir)) => cwd.join(arg_path).parent() == Some(dir),
                _ => true,
            }
        });
        hit.then(|| pid.as_u32())
    })
}

fn process_cwd(pid: u32) -> Option<PathBuf> {
    fs::read_link(format!("/proc/{}/cwd", pid)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_exec::{ScriptedRunner, SystemRunner};
    use crate::prompt::ScriptedPrompter;

    fn sh_settings(entry_script: &str, grace_ms: u64) -> Settings {
        let mut settings = Settings::default();
        settings.bot.entry_script = entry_script.to_string();
        settings.bot.interpreter = "sh".to_string();
        settings.bot.syntax_check = vec!["sh".to_string(), "-n".to_string()];
        settings.bot.grace_window_ms = grace_ms;
        settings
    }

    fn kill_group(pid: u32) {
        let _ = nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        );
    }

    #[test]
    fn test_crash_on_start_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("crash_bot.sh"), "echo 'radio not found' >&2\nexit 3\n").unwrap();
        fs::write(dir.path().join("config.ini"), "[interface]\n").unwrap();
        let settings = sh_settings("crash_bot.sh", 1500);
        let runner = SystemRunner::unprivileged();
        let prompter = ScriptedPrompter::new(["y"]);

        let verdict = ProcessSupervisor::new(&settings, &runner)
            .verify(dir.path(), &prompter)
            .unwrap();
        assert_eq!(verdict.state, SupervisorState::CrashedOnStart);
        assert_eq!(verdict.exit_code, Some(3));
        assert!(verdict.stderr.as_deref().unwrap().contains("radio not found"));
        assert!(!verdict.process.as_ref().unwrap().running);
        assert!(verdict.failure_text().unwrap().contains("radio not found"));
        assert!(verdict.warnings.is_empty());
    }

    #[test]
    fn test_surviving_process_is_started() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("steady_bot.sh"), "sleep 30\n").unwrap();
        let settings = sh_settings("steady_bot.sh", 400);
        let runner = SystemRunner::unprivileged();
        let prompter = ScriptedPrompter::new(["y"]);

        let verdict = ProcessSupervisor::new(&settings, &runner)
            .verify(dir.path(), &prompter)
            .unwrap();
        assert_eq!(verdict.state, SupervisorState::Started);
        assert!(verdict.is_success());
        // config.ini missing is a warning, not a blocker
        assert_eq!(verdict.warnings.len(), 1);
        let process = verdict.process.unwrap();
        assert!(process.running);
        kill_group(process.pid);
    }

    #[test]
    fn test_syntax_error_blocks_spawn() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken_bot.sh"), "if then fi (\n").unwrap();
        let settings = sh_settings("broken_bot.sh", 400);
        let runner = SystemRunner::unprivileged();
        let prompter = ScriptedPrompter::default();

        let verdict = ProcessSupervisor::new(&settings, &runner)
            .verify(dir.path(), &prompter)
            .unwrap();
        assert_eq!(verdict.state, SupervisorState::SyntaxError);
        assert!(verdict.process.is_none());
        assert!(!dir.path().join("logs").exists());
        // never asked to start
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn test_running_instance_detected() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("resident_bot.sh");
        fs::write(&script, "sleep 30\n").unwrap();
        let mut child = Command::new("sh").arg(&script).spawn().unwrap();
        thread::sleep(Duration::from_millis(200));

        let settings = sh_settings("resident_bot.sh", 400);
        let runner = ScriptedRunner::new();
        let verdict = ProcessSupervisor::new(&settings, &runner)
            .verify(dir.path(), &ScriptedPrompter::default())
            .unwrap();

        let _ = child.kill();
        let _ = child.wait();

        assert_eq!(verdict.state, SupervisorState::AlreadyRunning);
        assert_eq!(verdict.process.unwrap().pid, child.id());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_scan_finds_script_by_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("scan_bot.sh");
        fs::write(&script, "sleep 30\n").unwrap();
        let mut child = Command::new("sh").arg(&script).spawn().unwrap();
        thread::sleep(Duration::from_millis(200));

        let found = find_process_for_script(&script);
        let other = find_process_for_script(&dir.path().join("other_bot.sh"));

        let _ = child.kill();
        let _ = child.wait();

        assert_eq!(found, Some(child.id()));
        assert!(other.is_none());
    }

    #[test]
    fn test_declined_start_is_not_checked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("idle_bot.sh"), "exit 0\n").unwrap();
        let settings = sh_settings("idle_bot.sh", 400);
        let runner = ScriptedRunner::new();
        let verdict = ProcessSupervisor::new(&settings, &runner)
            .verify(dir.path(), &ScriptedPrompter::new(["n"]))
            .unwrap();
        assert!(verdict.is_declined());
        assert!(!verdict.is_success());
        assert_eq!(runner.count(&["-n", "idle_bot.sh"]), 1);
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bot.sh"), "sleep 1\n").unwrap();
        let mut settings = sh_settings("bot.sh", 400);
        settings.bot.interpreter = "nonexistent-interpreter-xyz".to_string();
        let runner = ScriptedRunner::new();
        let err = ProcessSupervisor::new(&settings, &runner)
            .verify(dir.path(), &ScriptedPrompter::new(["y"]))
            .unwrap_err();
        assert!(matches!(err, ProcessStartError::Spawn { .. }));
    }
}
