//! CommandExec - single execution layer for external programs
//!
//! Every shell-level step (package manager, git, pip, syntax checks) goes
//! through a `CommandRunner`. The runner:
//! - resolves the executable before spawning, no shell involved
//! - optionally prefixes the privilege escalation program
//! - enforces a hard wall-clock timeout and kills the child on expiry
//! - captures exit code, stdout, stderr and duration
//!
//! Captured commands run in their own process group. The deadline covers the
//! output pipes too: a leftover background process holding them open is
//! killed with the group. Uncaptured commands stay in the terminal's group so
//! escalation prompts work; on timeout they get SIGTERM first, which the
//! escalation program relays to the elevated command.
//!
//! It never returns an error. Every failure is a `CommandResult` value and
//! the caller decides whether it matters.

use crate::error::MeshError;
use crate::settings::Settings;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::env;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum output length to capture per stream
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Default timeout for commands
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a terminated command gets to exit before SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(1);

/// How long to wait for pipes to close once the group is killed
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Why a command did not produce a normal exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The command ran to completion (its exit code may still be nonzero)
    None,
    /// Wall-clock budget exceeded, child killed
    Timeout,
    /// Executable could not be located
    NotFound,
    /// Any other spawn or wait failure
    Other,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "completed",
            Self::Timeout => "timeout",
            Self::NotFound => "not found",
            Self::Other => "error",
        }
    }
}

/// What to run and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub capture: bool,
    pub elevated: bool,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
            capture: false,
            elevated: false,
            cwd: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Result of a command execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Full command line as executed (including any escalation prefix)
    pub command: String,
    /// Exit code, -1 when the command did not exit normally
    pub exit_code: i32,
    /// Captured stdout (absent when not capturing)
    pub stdout: Option<String>,
    /// Captured stderr, or the failure text
    pub stderr: Option<String>,
    pub failure: FailureReason,
    pub duration_ms: u64,
}

impl CommandResult {
    fn failed(command: String, failure: FailureReason, message: String, start: Instant) -> Self {
        Self {
            command,
            exit_code: -1,
            stdout: None,
            stderr: Some(message),
            failure,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Ran to completion with exit code 0
    pub fn success(&self) -> bool {
        self.failure == FailureReason::None && self.exit_code == 0
    }

    pub fn stdout_str(&self) -> &str {
        self.stdout.as_deref().unwrap_or("")
    }

    pub fn stderr_str(&self) -> &str {
        self.stderr.as_deref().unwrap_or("")
    }

    /// Stderr if there is any, otherwise stdout
    pub fn error_text(&self) -> String {
        let stderr = self.stderr_str().trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.stdout_str().trim().to_string()
    }

    /// Convert a failed result into the error taxonomy
    pub fn error(&self) -> Option<MeshError> {
        match self.failure {
            FailureReason::Timeout => Some(MeshError::Timeout(format!(
                "{} after {}ms",
                self.command, self.duration_ms
            ))),
            FailureReason::NotFound => Some(MeshError::NotFound(self.error_text())),
            FailureReason::Other => Some(MeshError::Command(format!(
                "{}: {}",
                self.command,
                self.error_text()
            ))),
            FailureReason::None if self.exit_code != 0 => {
                let detail = self.error_text();
                Some(MeshError::Command(if detail.is_empty() {
                    format!("{} exited with status {}", self.command, self.exit_code)
                } else {
                    format!(
                        "{} exited with status {}: {}",
                        self.command, self.exit_code, detail
                    )
                }))
            }
            FailureReason::None => None,
        }
    }
}

/// Anything that can run a `CommandSpec`
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> CommandResult;
}

/// Runs commands on the real system
pub struct SystemRunner {
    /// Escalation program, `None` when already root
    escalation: Option<String>,
}

impl SystemRunner {
    pub fn new(settings: &Settings) -> Self {
        let escalation = if nix::unistd::geteuid().is_root() {
            None
        } else {
            Some(settings.system.escalation.clone())
        };
        Self { escalation }
    }

    /// Runner that never prefixes an escalation program
    pub fn unprivileged() -> Self {
        Self { escalation: None }
    }

    fn effective_argv(&self, spec: &CommandSpec) -> Vec<String> {
        match (&self.escalation, spec.elevated) {
            (Some(prefix), true) => {
                let mut argv = vec![prefix.clone()];
                argv.extend(spec.argv.iter().cloned());
                argv
            }
            _ => spec.argv.clone(),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> CommandResult {
        let start = Instant::now();
        let argv = self.effective_argv(spec);
        let command = argv.join(" ");

        if argv.is_empty() {
            return CommandResult::failed(
                command,
                FailureReason::Other,
                "empty command".to_string(),
                start,
            );
        }

        // The target must resolve even when wrapped by the escalation program
        for program in argv.iter().take(if argv.len() > spec.argv.len() { 2 } else { 1 }) {
            if resolve_executable(program).is_none() {
                debug!(program = %program, "executable not found");
                return CommandResult::failed(
                    command,
                    FailureReason::NotFound,
                    format!("{}: command not found", program),
                    start,
                );
            }
        }

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        if spec.capture {
            // Own process group so a timeout can take down grandchildren
            // holding the pipes. Interactive commands stay in the terminal's
            // group so escalation prompts keep working.
            cmd.stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let failure = if e.kind() == std::io::ErrorKind::NotFound {
                    FailureReason::NotFound
                } else {
                    FailureReason::Other
                };
                return CommandResult::failed(command, failure, format!("OS error: {}", e), start);
            }
        };

        let stdout_reader = child.stdout.take().map(OutputReader::spawn);
        let stderr_reader = child.stderr.take().map(OutputReader::spawn);
        let readers: Vec<&OutputReader> =
            stdout_reader.iter().chain(stderr_reader.iter()).collect();

        let deadline = start + spec.timeout;
        let mut waited = wait_with_deadline(&mut child, deadline, spec.capture);

        let drain_by = if waited.is_ok() {
            deadline
        } else {
            Instant::now() + DRAIN_GRACE
        };
        if !readers.iter().all(|reader| reader.finish_by(drain_by)) {
            warn!(command = %command, "output still open at the deadline, killing process group");
            signal_group(child.id(), Signal::SIGKILL);
            let grace = Instant::now() + DRAIN_GRACE;
            for reader in &readers {
                reader.finish_by(grace);
            }
            if waited.is_ok() {
                waited = Err(Waited::TimedOut);
            }
        }

        let stdout = stdout_reader.as_ref().map(OutputReader::text);
        let stderr = stderr_reader.as_ref().map(OutputReader::text);
        let duration_ms = start.elapsed().as_millis() as u64;

        match waited {
            Ok(status) => {
                let exit_code = status.code().unwrap_or(-1);
                debug!(command = %command, exit_code, duration_ms, "command finished");
                CommandResult {
                    command,
                    exit_code,
                    stdout,
                    stderr,
                    failure: FailureReason::None,
                    duration_ms,
                }
            }
            Err(Waited::TimedOut) => {
                warn!(command = %command, timeout_ms = spec.timeout.as_millis() as u64, "command timed out");
                let note = format!("timed out after {}s", spec.timeout.as_secs_f32());
                let stderr = match stderr {
                    Some(text) if !text.trim().is_empty() => format!("{}\n{}", text.trim_end(), note),
                    _ => note,
                };
                CommandResult {
                    command,
                    exit_code: -1,
                    stdout,
                    stderr: Some(stderr),
                    failure: FailureReason::Timeout,
                    duration_ms,
                }
            }
            Err(Waited::Failed(e)) => CommandResult {
                command,
                exit_code: -1,
                stdout,
                stderr: Some(format!("OS error: {}", e)),
                failure: FailureReason::Other,
                duration_ms,
            },
        }
    }
}

/// Answers commands from a list of canned replies and records every call.
///
/// A rule matches when its needle appears as a contiguous run inside the
/// argv. The first matching rule wins; anything unmatched succeeds with empty
/// output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<(Vec<String>, CommandResult)>,
    calls: std::cell::RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn reply(exit_code: i32, stdout: &str, stderr: &str, failure: FailureReason) -> CommandResult {
        CommandResult {
            command: String::new(),
            exit_code,
            stdout: Some(stdout.to_string()),
            stderr: Some(stderr.to_string()),
            failure,
            duration_ms: 0,
        }
    }

    fn rule(mut self, needle: &[&str], result: CommandResult) -> Self {
        self.rules
            .push((needle.iter().map(|s| s.to_string()).collect(), result));
        self
    }

    pub fn ok(self, needle: &[&str], stdout: &str) -> Self {
        self.rule(needle, Self::reply(0, stdout, "", FailureReason::None))
    }

    pub fn fail(self, needle: &[&str], exit_code: i32, stderr: &str) -> Self {
        self.rule(needle, Self::reply(exit_code, "", stderr, FailureReason::None))
    }

    pub fn timeout(self, needle: &[&str]) -> Self {
        self.rule(needle, Self::reply(-1, "", "timed out", FailureReason::Timeout))
    }

    pub fn not_found(self, needle: &[&str]) -> Self {
        self.rule(
            needle,
            Self::reply(-1, "", "command not found", FailureReason::NotFound),
        )
    }

    /// Every argv run so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().iter().map(|s| s.argv.clone()).collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Number of calls whose argv contains the needle
    pub fn count(&self, needle: &[&str]) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|spec| contains_run(&spec.argv, needle))
            .count()
    }
}

fn contains_run(argv: &[String], needle: &[impl AsRef<str>]) -> bool {
    if needle.is_empty() {
        return true;
    }
    argv.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle)
            .all(|(a, b)| a.as_str() == b.as_ref())
    })
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> CommandResult {
        self.calls.borrow_mut().push(spec.clone());
        let mut result = self
            .rules
            .iter()
            .find(|(needle, _)| contains_run(&spec.argv, needle.as_slice()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| Self::reply(0, "", "", FailureReason::None));
        result.command = spec.display();
        if !spec.capture {
            result.stdout = None;
            result.stderr = None;
        }
        result
    }
}

enum Waited {
    TimedOut,
    Failed(std::io::Error),
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
    own_group: bool,
) -> Result<ExitStatus, Waited> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                terminate(child, own_group);
                return Err(Waited::TimedOut);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                terminate(child, own_group);
                return Err(Waited::Failed(e));
            }
        }
    }
}

/// SIGTERM, a short grace period, then SIGKILL. Reaps the child.
fn terminate(child: &mut Child, own_group: bool) {
    let pid = child.id();
    if own_group {
        signal_group(pid, Signal::SIGTERM);
    }
    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

    let grace = Instant::now() + TERM_GRACE;
    while Instant::now() < grace {
        match child.try_wait() {
            Ok(None) => thread::sleep(POLL_INTERVAL),
            _ => break,
        }
    }

    if own_group {
        signal_group(pid, Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn signal_group(pgid: u32, sig: Signal) {
    let _ = signal::killpg(Pid::from_raw(pgid as i32), sig);
}

/// Drains one output pipe on its own thread
struct OutputReader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl OutputReader {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut out) = sink.lock() {
                            // keep draining past the cap so the writer never blocks
                            let room = (MAX_OUTPUT_BYTES + 1).saturating_sub(out.len());
                            out.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(());
        });
        Self { buf, done }
    }

    /// True once the pipe reached end of file, false if the deadline hit first
    fn finish_by(&self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Whatever has been read so far
    fn text(&self) -> String {
        self.buf
            .lock()
            .map(|bytes| truncate_output(&bytes).0)
            .unwrap_or_default()
    }
}

/// Truncate output to max bytes, converting to string
pub fn truncate_output(bytes: &[u8]) -> (String, bool) {
    let truncated = bytes.len() > MAX_OUTPUT_BYTES;
    let slice = if truncated {
        &bytes[..MAX_OUTPUT_BYTES]
    } else {
        bytes
    };

    (String::from_utf8_lossy(slice).to_string(), truncated)
}

/// Locate an executable the way the kernel would, without a shell
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') {
        let path = Path::new(program);
        return is_executable(path).then(|| path.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> SystemRunner {
        SystemRunner::unprivileged()
    }

    #[test]
    fn test_captures_stdout_and_exit_code() {
        let result = runner().run(&CommandSpec::new(["sh", "-c", "echo mesh-ok"]).capture());
        assert!(result.success());
        assert_eq!(result.stdout_str().trim(), "mesh-ok");
        assert_eq!(result.failure, FailureReason::None);
    }

    #[test]
    fn test_nonzero_exit_is_a_value_not_a_failure_reason() {
        let result = runner().run(&CommandSpec::new(["sh", "-c", "echo bad >&2; exit 3"]).capture());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.failure, FailureReason::None);
        assert!(!result.success());
        assert_eq!(result.stderr_str().trim(), "bad");
        assert_eq!(result.error().unwrap().code(), "command");
    }

    #[test]
    fn test_missing_binary_is_not_found() {
        let result = runner().run(&CommandSpec::new(["nonexistent-binary-xyz"]).capture());
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.failure, FailureReason::NotFound);
        assert_eq!(result.error().unwrap().code(), "not_found");
    }

    #[test]
    fn test_missing_binary_behind_escalation_is_not_found() {
        let runner = SystemRunner {
            escalation: Some("sh".to_string()),
        };
        let result = runner.run(&CommandSpec::new(["nonexistent-binary-xyz"]).elevated());
        assert_eq!(result.failure, FailureReason::NotFound);
        assert!(result.command.starts_with("sh "));
    }

    #[test]
    fn test_timeout_kills_child() {
        let start = Instant::now();
        let result = runner().run(
            &CommandSpec::new(["sleep", "5"])
                .timeout(Duration::from_millis(300))
                .capture(),
        );
        assert_eq!(result.failure, FailureReason::Timeout);
        assert_eq!(result.exit_code, -1);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(result.error().unwrap().code(), "timeout");
    }

    #[test]
    fn test_timeout_reaches_grandchildren() {
        let start = Instant::now();
        let result = runner().run(
            &CommandSpec::new(["sh", "-c", "sleep 5; echo late"])
                .timeout(Duration::from_millis(300))
                .capture(),
        );
        assert_eq!(result.failure, FailureReason::Timeout);
        assert!(!result.stdout_str().contains("late"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_background_process_holding_output_hits_deadline() {
        let start = Instant::now();
        let result = runner().run(
            &CommandSpec::new(["sh", "-c", "sleep 4 & echo hi"])
                .timeout(Duration::from_millis(500))
                .capture(),
        );
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(result.failure, FailureReason::Timeout);
        assert_eq!(result.stdout_str().trim(), "hi");
    }

    #[test]
    fn test_uncaptured_timeout_through_escalation_wrapper() {
        // env stands in for the escalation program and execs the target
        let runner = SystemRunner {
            escalation: Some("env".to_string()),
        };
        let start = Instant::now();
        let result = runner.run(
            &CommandSpec::new(["sleep", "5"])
                .elevated()
                .timeout(Duration::from_millis(300)),
        );
        assert_eq!(result.failure, FailureReason::Timeout);
        assert!(result.command.starts_with("env sleep"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_cwd_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner().run(&CommandSpec::new(["pwd"]).cwd(dir.path()).capture());
        assert!(result.success());
        let reported = PathBuf::from(result.stdout_str().trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_uncaptured_output_is_absent() {
        let result = runner().run(&CommandSpec::new(["true"]));
        assert!(result.success());
        assert!(result.stdout.is_none());
        assert!(result.stderr.is_none());
    }

    #[test]
    fn test_escalation_prefix() {
        let runner = SystemRunner {
            escalation: Some("sudo".to_string()),
        };
        let spec = CommandSpec::new(["apt-get", "update"]).elevated();
        assert_eq!(runner.effective_argv(&spec), vec!["sudo", "apt-get", "update"]);

        let plain = CommandSpec::new(["git", "status"]);
        assert_eq!(runner.effective_argv(&plain), vec!["git", "status"]);
    }

    #[test]
    fn test_truncate_output() {
        let big = vec![b'a'; MAX_OUTPUT_BYTES + 10];
        let (text, truncated) = truncate_output(&big);
        assert!(truncated);
        assert_eq!(text.len(), MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_scripted_runner_first_match_wins() {
        let runner = ScriptedRunner::new()
            .fail(&["pull", "origin", "main"], 1, "no such ref")
            .ok(&["pull"], "Already up to date.");

        let first = runner.run(&CommandSpec::new(["git", "pull", "origin", "main"]).capture());
        assert_eq!(first.exit_code, 1);
        assert_eq!(first.stderr_str(), "no such ref");

        let second = runner.run(&CommandSpec::new(["git", "pull", "origin", "master"]).capture());
        assert!(second.success());

        let other = runner.run(&CommandSpec::new(["git", "status"]));
        assert!(other.success());
        assert!(other.stdout.is_none());

        assert_eq!(runner.count(&["pull"]), 2);
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_resolve_executable() {
        assert!(resolve_executable("sh").is_some());
        assert!(resolve_executable("nonexistent-binary-xyz").is_none());
        assert!(resolve_executable("/nonexistent/bin/tool").is_none());
    }
}
