//! RepositorySync - find, clone and update the bot checkout
//!
//! Discovery order:
//! 1. configured candidate directories, first one holding the entry script
//! 2. bounded recursive search under the search roots
//! 3. the operator: manual path, clone from upstream, or skip
//!
//! Pull tries the primary branch, then the fallback branch exactly once.

use crate::command_exec::{CommandRunner, CommandSpec};
use crate::prompt::{Notice, Prompter};
use crate::settings::{expand_home, Settings};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

/// Directory believed to hold the bot's checkout
pub type CheckoutLocation = PathBuf;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("no checkout location resolved")]
    NotLocated,

    #[error("{} is not a git checkout", .0.display())]
    NotARepository(PathBuf),

    #[error("clone into {} failed: {stderr}", dest.display())]
    Clone { dest: PathBuf, stderr: String },

    #[error("pull failed after {attempts} attempt(s): {stderr}")]
    Pull { attempts: usize, stderr: String },

    #[error("could not inspect checkout: {0}")]
    Status(String),

    #[error("prompt interrupted: {0}")]
    Prompt(#[from] std::io::Error),
}

/// What a successful pull did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    AlreadyCurrent { branch: String, attempts: usize },
    Updated { branch: String, attempts: usize },
    /// Local modifications present and the operator declined to pull over them
    SkippedLocalChanges,
}

impl PullOutcome {
    pub fn describe(&self) -> String {
        match self {
            PullOutcome::AlreadyCurrent { branch, .. } => format!("already current ({})", branch),
            PullOutcome::Updated { branch, .. } => format!("updated from {}", branch),
            PullOutcome::SkippedLocalChanges => "skipped, local changes kept".to_string(),
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            PullOutcome::AlreadyCurrent { attempts, .. } | PullOutcome::Updated { attempts, .. } => {
                *attempts
            }
            PullOutcome::SkippedLocalChanges => 0,
        }
    }
}

/// Branch and commit of a checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutStatus {
    pub branch: String,
    pub commit: String,
    pub dirty: bool,
}

pub struct RepositorySync<'a> {
    settings: &'a Settings,
    runner: &'a dyn CommandRunner,
}

impl<'a> RepositorySync<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn CommandRunner) -> Self {
        Self { settings, runner }
    }

    fn entry_script(&self) -> &str {
        &self.settings.bot.entry_script
    }

    /// Probe candidates, then search. `None` when nothing was found.
    pub fn locate(&self) -> Option<CheckoutLocation> {
        for raw in &self.settings.repository.candidate_dirs {
            let dir = expand_home(raw);
            if dir.join(self.entry_script()).is_file() {
                debug!(dir = %dir.display(), "checkout found in candidate directory");
                return Some(normalize(dir));
            }
        }

        let deadline = Instant::now() + self.settings.repository.search_timeout();
        for raw in &self.settings.repository.search_roots {
            let root = expand_home(raw);
            if let Some(found) = self.search(&root, deadline) {
                info!(dir = %found.display(), "checkout found by search");
                return Some(found);
            }
            if Instant::now() >= deadline {
                warn!("checkout search timed out");
                break;
            }
        }
        None
    }

    /// Depth-bounded walk, skipping hidden directories, giving up at the deadline
    fn search(&self, root: &Path, deadline: Instant) -> Option<CheckoutLocation> {
        if !root.is_dir() {
            return None;
        }
        let walker = WalkDir::new(root)
            .max_depth(self.settings.repository.search_max_depth)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            if Instant::now() >= deadline {
                return None;
            }
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_file() && entry.file_name() == self.entry_script() {
                return entry.path().parent().map(|p| normalize(p.to_path_buf()));
            }
        }
        None
    }

    /// Resolve a usable checkout, asking the operator when discovery fails
    pub fn ensure(
        &self,
        hint: Option<&Path>,
        prompter: &dyn Prompter,
    ) -> Result<CheckoutLocation, RepoError> {
        let resolved = match hint {
            Some(path) => Some(path.to_path_buf()),
            None => self.locate(),
        };

        if let Some(location) = resolved {
            if location.exists() {
                return Ok(location);
            }
            prompter.notify(
                Notice::Warning,
                &format!("Checkout {} does not exist", location.display()),
            );
            if prompter.confirm(
                &format!("Clone {} into it?", self.settings.repository.upstream_url),
                true,
            )? {
                return self.clone_into(&location, prompter);
            }
            return Err(RepoError::NotLocated);
        }

        prompter.notify(
            Notice::Warning,
            &format!("Could not find a checkout containing {}", self.entry_script()),
        );
        let choice = prompter.choose(
            "How do you want to continue?",
            &["Enter the path manually", "Clone from upstream", "Skip"],
            1,
        )?;

        match choice {
            0 => {
                let raw = prompter.input("Checkout path", None)?;
                if raw.is_empty() {
                    return Err(RepoError::NotLocated);
                }
                let location = expand_home(&raw);
                if location.exists() {
                    if !location.join(self.entry_script()).is_file() {
                        prompter.notify(
                            Notice::Warning,
                            &format!(
                                "{} has no {}, using it anyway",
                                location.display(),
                                self.entry_script()
                            ),
                        );
                    }
                    return Ok(location);
                }
                if prompter.confirm(
                    &format!("{} does not exist. Clone into it?", location.display()),
                    true,
                )? {
                    return self.clone_into(&location, prompter);
                }
                Err(RepoError::NotLocated)
            }
            1 => {
                let default_dest = expand_home("~/meshing-around");
                let raw = prompter.input(
                    "Clone destination",
                    Some(&default_dest.display().to_string()),
                )?;
                self.clone_into(&expand_home(&raw), prompter)
            }
            _ => Err(RepoError::NotLocated),
        }
    }

    fn clone_into(
        &self,
        dest: &Path,
        prompter: &dyn Prompter,
    ) -> Result<CheckoutLocation, RepoError> {
        let url = &self.settings.repository.upstream_url;
        prompter.notify(
            Notice::Info,
            &format!("Cloning {} into {}", url, dest.display()),
        );

        let argv = vec![
            "git".to_string(),
            "clone".to_string(),
            url.clone(),
            dest.display().to_string(),
        ];
        let result = self.runner.run(
            &CommandSpec::new(argv)
                .timeout(self.settings.repository.network_timeout())
                .capture(),
        );
        if !result.success() {
            let stderr = result.error_text();
            prompter.notify(Notice::Error, &format!("Clone failed: {}", stderr));
            return Err(RepoError::Clone {
                dest: dest.to_path_buf(),
                stderr,
            });
        }

        info!(dest = %dest.display(), "checkout cloned");
        prompter.notify(Notice::Success, &format!("Cloned into {}", dest.display()));
        Ok(dest.to_path_buf())
    }

    /// Update the checkout, trying the primary then the fallback branch
    pub fn pull(
        &self,
        location: &Path,
        prompter: &dyn Prompter,
    ) -> Result<PullOutcome, RepoError> {
        if !location.join(".git").exists() {
            return Err(RepoError::NotARepository(location.to_path_buf()));
        }

        let status = self.git(location, &["status", "--porcelain"], STATUS_TIMEOUT);
        if !status.success() {
            return Err(RepoError::Status(status.error_text()));
        }
        if !status.stdout_str().trim().is_empty() {
            prompter.notify(
                Notice::Warning,
                &format!("Local modifications in {}:", location.display()),
            );
            prompter.notify(Notice::Info, status.stdout_str().trim_end());
            if !prompter.confirm("Pull anyway?", false)? {
                info!(location = %location.display(), "pull skipped, local changes present");
                return Ok(PullOutcome::SkippedLocalChanges);
            }
        }

        let mut last_error = String::new();
        let mut attempts = 0;
        for branch in self.settings.repository.branches() {
            attempts += 1;
            let result = self.git(
                location,
                &["pull", "origin", branch],
                self.settings.repository.network_timeout(),
            );
            if result.success() {
                let output = result.stdout_str();
                let outcome = if output.contains("Already up to date")
                    || output.contains("Already up-to-date")
                {
                    PullOutcome::AlreadyCurrent {
                        branch: branch.to_string(),
                        attempts,
                    }
                } else {
                    PullOutcome::Updated {
                        branch: branch.to_string(),
                        attempts,
                    }
                };
                info!(branch, attempts, outcome = %outcome.describe(), "pull finished");
                return Ok(outcome);
            }
            last_error = result.error_text();
            warn!(branch, error = %last_error, "pull attempt failed");
        }

        Err(RepoError::Pull {
            attempts,
            stderr: last_error,
        })
    }

    /// Current branch, short commit and dirty flag
    pub fn status(&self, location: &Path) -> Result<CheckoutStatus, RepoError> {
        if !location.join(".git").exists() {
            return Err(RepoError::NotARepository(location.to_path_buf()));
        }
        let branch = self.git(location, &["rev-parse", "--abbrev-ref", "HEAD"], STATUS_TIMEOUT);
        let commit = self.git(location, &["rev-parse", "--short", "HEAD"], STATUS_TIMEOUT);
        let porcelain = self.git(location, &["status", "--porcelain"], STATUS_TIMEOUT);
        for result in [&branch, &commit, &porcelain] {
            if !result.success() {
                return Err(RepoError::Status(result.error_text()));
            }
        }
        Ok(CheckoutStatus {
            branch: branch.stdout_str().trim().to_string(),
            commit: commit.stdout_str().trim().to_string(),
            dirty: !porcelain.stdout_str().trim().is_empty(),
        })
    }

    fn git(&self, location: &Path, args: &[&str], timeout: Duration) -> crate::CommandResult {
        let mut argv = vec!["git".to_string(), "-C".to_string()];
        argv.push(location.display().to_string());
        argv.extend(args.iter().map(|s| s.to_string()));
        self.runner
            .run(&CommandSpec::new(argv).timeout(timeout).capture())
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Absolute form when possible, so later steps do not depend on the cwd
fn normalize(dir: PathBuf) -> PathBuf {
    dir.canonicalize().unwrap_or(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_exec::ScriptedRunner;
    use crate::prompt::ScriptedPrompter;
    use std::fs;

    fn isolated_settings() -> Settings {
        let mut settings = Settings::default();
        settings.repository.candidate_dirs = Vec::new();
        settings.repository.search_roots = Vec::new();
        settings
    }

    fn git_checkout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        dir
    }

    #[test]
    fn test_locate_prefers_candidates() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("mesh_bot.py"), "").unwrap();

        let mut settings = isolated_settings();
        settings.repository.candidate_dirs = vec![
            first.path().display().to_string(),
            second.path().display().to_string(),
        ];
        let runner = ScriptedRunner::new();
        let sync = RepositorySync::new(&settings, &runner);

        assert_eq!(
            sync.locate(),
            Some(second.path().canonicalize().unwrap())
        );
    }

    #[test]
    fn test_locate_searches_roots_skipping_hidden() {
        let root = tempfile::tempdir().unwrap();
        let hidden = root.path().join(".cache/meshing-around");
        fs::create_dir_all(&hidden).unwrap();
        fs::write(hidden.join("mesh_bot.py"), "").unwrap();
        let visible = root.path().join("src/bots/meshing-around");
        fs::create_dir_all(&visible).unwrap();
        fs::write(visible.join("mesh_bot.py"), "").unwrap();

        let mut settings = isolated_settings();
        settings.repository.search_roots = vec![root.path().display().to_string()];
        let runner = ScriptedRunner::new();
        let sync = RepositorySync::new(&settings, &runner);

        assert_eq!(sync.locate(), Some(visible.canonicalize().unwrap()));
    }

    #[test]
    fn test_locate_respects_depth_limit() {
        let root = tempfile::tempdir().unwrap();
        let deep = root.path().join("a/b/c/d");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("mesh_bot.py"), "").unwrap();

        let mut settings = isolated_settings();
        settings.repository.search_roots = vec![root.path().display().to_string()];
        settings.repository.search_max_depth = 2;
        let runner = ScriptedRunner::new();
        assert_eq!(RepositorySync::new(&settings, &runner).locate(), None);
    }

    #[test]
    fn test_ensure_skip_is_not_located() {
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let prompter = ScriptedPrompter::new(["3"]);
        let err = RepositorySync::new(&settings, &runner)
            .ensure(None, &prompter)
            .unwrap_err();
        assert!(matches!(err, RepoError::NotLocated));
        assert_eq!(runner.calls().len(), 0);
    }

    #[test]
    fn test_ensure_clone_failure_reports_absent() {
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().fail(&["clone"], 128, "fatal: unable to access");
        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("meshing-around");
        let prompter = ScriptedPrompter::new(["2", target.display().to_string().as_str()]);

        let err = RepositorySync::new(&settings, &runner)
            .ensure(None, &prompter)
            .unwrap_err();
        match err {
            RepoError::Clone { dest, stderr } => {
                assert_eq!(dest, target);
                assert!(stderr.contains("unable to access"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!prompter.notices_of(Notice::Error).is_empty());
    }

    #[test]
    fn test_ensure_missing_hint_clones_on_confirmation() {
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("bot");
        let prompter = ScriptedPrompter::new(["y"]);

        let location = RepositorySync::new(&settings, &runner)
            .ensure(Some(&target), &prompter)
            .unwrap();
        assert_eq!(location, target);
        assert_eq!(
            runner.calls(),
            vec![vec![
                "git".to_string(),
                "clone".to_string(),
                settings.repository.upstream_url.clone(),
                target.display().to_string(),
            ]]
        );
    }

    #[test]
    fn test_ensure_existing_hint_needs_no_prompt() {
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let dir = tempfile::tempdir().unwrap();
        let prompter = ScriptedPrompter::default();
        let location = RepositorySync::new(&settings, &runner)
            .ensure(Some(dir.path()), &prompter)
            .unwrap();
        assert_eq!(location, dir.path());
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn test_pull_falls_back_once() {
        let checkout = git_checkout();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new()
            .fail(&["pull", "origin", "main"], 1, "couldn't find remote ref main")
            .ok(&["pull", "origin", "master"], "Fast-forward\n mesh_bot.py | 2 +-");
        let prompter = ScriptedPrompter::default();

        let outcome = RepositorySync::new(&settings, &runner)
            .pull(checkout.path(), &prompter)
            .unwrap();
        assert_eq!(
            outcome,
            PullOutcome::Updated {
                branch: "master".to_string(),
                attempts: 2
            }
        );
        assert_eq!(runner.count(&["pull"]), 2);
    }

    #[test]
    fn test_pull_already_current_on_primary() {
        let checkout = git_checkout();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().ok(&["pull"], "Already up to date.\n");
        let outcome = RepositorySync::new(&settings, &runner)
            .pull(checkout.path(), &ScriptedPrompter::default())
            .unwrap();
        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(outcome, PullOutcome::AlreadyCurrent { .. }));
    }

    #[test]
    fn test_pull_both_branches_fail() {
        let checkout = git_checkout();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().fail(&["pull"], 1, "network unreachable");
        let err = RepositorySync::new(&settings, &runner)
            .pull(checkout.path(), &ScriptedPrompter::default())
            .unwrap_err();
        assert!(matches!(err, RepoError::Pull { attempts: 2, .. }));
        assert_eq!(runner.count(&["pull"]), 2);
    }

    #[test]
    fn test_pull_declined_over_local_changes() {
        let checkout = git_checkout();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new().ok(&["status", "--porcelain"], " M config.ini\n");
        let prompter = ScriptedPrompter::new(["n"]);

        let outcome = RepositorySync::new(&settings, &runner)
            .pull(checkout.path(), &prompter)
            .unwrap();
        assert_eq!(outcome, PullOutcome::SkippedLocalChanges);
        assert_eq!(runner.count(&["pull"]), 0);
    }

    #[test]
    fn test_pull_requires_git_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new();
        let err = RepositorySync::new(&settings, &runner)
            .pull(dir.path(), &ScriptedPrompter::default())
            .unwrap_err();
        assert!(matches!(err, RepoError::NotARepository(_)));
    }

    #[test]
    fn test_status_reads_branch_and_commit() {
        let checkout = git_checkout();
        let settings = isolated_settings();
        let runner = ScriptedRunner::new()
            .ok(&["--abbrev-ref"], "main\n")
            .ok(&["--short"], "a1b2c3d\n");
        let status = RepositorySync::new(&settings, &runner)
            .status(checkout.path())
            .unwrap();
        assert_eq!(status.branch, "main");
        assert_eq!(status.commit, "a1b2c3d");
        assert!(!status.dirty);
    }
}
