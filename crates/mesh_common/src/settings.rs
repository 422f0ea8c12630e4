//! Tool settings for meshctl itself
//!
//! These are not the bot's settings (see `config_store`), they describe how
//! meshctl finds, updates and starts the bot on this host.
//!
//! Settings live in $XDG_CONFIG_HOME/meshctl/settings.toml. Every field has a
//! default so a missing or partial file is fine.

use crate::error::MeshError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_DIR: &str = "meshctl";
const SETTINGS_FILE: &str = "settings.toml";

/// Canonical upstream of the bot
pub const UPSTREAM_URL: &str = "https://github.com/SpudGunMan/meshing-around.git";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub repository: RepositorySettings,
    pub bot: BotSettings,
    pub system: SystemSettings,
}

/// Where the checkout comes from and where to look for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,

    #[serde(default = "default_fallback_branch")]
    pub fallback_branch: String,

    /// Probed in order before any filesystem search. `~` is expanded.
    #[serde(default = "default_candidate_dirs")]
    pub candidate_dirs: Vec<String>,

    /// Roots for the bounded recursive search
    #[serde(default = "default_search_roots")]
    pub search_roots: Vec<String>,

    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    #[serde(default = "default_search_depth")]
    pub search_max_depth: usize,

    /// Budget for clone/pull
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
}

fn default_upstream_url() -> String {
    UPSTREAM_URL.to_string()
}

fn default_primary_branch() -> String {
    "main".to_string()
}

fn default_fallback_branch() -> String {
    "master".to_string()
}

fn default_candidate_dirs() -> Vec<String> {
    vec![
        "~/meshing-around".to_string(),
        "/opt/meshing-around".to_string(),
        "/usr/local/meshing-around".to_string(),
        "./meshing-around".to_string(),
        ".".to_string(),
    ]
}

fn default_search_roots() -> Vec<String> {
    vec!["~".to_string()]
}

fn default_search_timeout() -> u64 {
    30
}

fn default_search_depth() -> usize {
    6
}

fn default_network_timeout() -> u64 {
    300
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            primary_branch: default_primary_branch(),
            fallback_branch: default_fallback_branch(),
            candidate_dirs: default_candidate_dirs(),
            search_roots: default_search_roots(),
            search_timeout_secs: default_search_timeout(),
            search_max_depth: default_search_depth(),
            network_timeout_secs: default_network_timeout(),
        }
    }
}

impl RepositorySettings {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// Primary branch first, then the single fallback
    pub fn branches(&self) -> Vec<&str> {
        let mut branches = vec![self.primary_branch.as_str()];
        if self.fallback_branch != self.primary_branch {
            branches.push(self.fallback_branch.as_str());
        }
        branches
    }
}

/// How the bot is checked, installed and started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub entry_script: String,
    pub interpreter: String,
    /// Dry-run check; the entry script is appended
    pub syntax_check: Vec<String>,
    /// Dependency manifest at the checkout root
    pub manifest: String,
    /// Installer invocation; the manifest path is appended
    pub installer: Vec<String>,
    /// Filename the saved configuration is deployed under
    pub deploy_filename: String,
    /// Directory (relative to the checkout) for the bot's stdout/stderr
    pub log_dir: String,
    pub grace_window_ms: u64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            entry_script: "mesh_bot.py".to_string(),
            interpreter: "python3".to_string(),
            syntax_check: vec![
                "python3".to_string(),
                "-m".to_string(),
                "py_compile".to_string(),
            ],
            manifest: "requirements.txt".to_string(),
            installer: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "-r".to_string(),
            ],
            deploy_filename: "config.ini".to_string(),
            log_dir: "logs".to_string(),
            grace_window_ms: 3000,
        }
    }
}

impl BotSettings {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }
}

/// Host package management and privilege escalation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub escalation: String,
    pub refresh_index: Vec<String>,
    pub upgrade: Vec<String>,
    pub cleanup: Vec<String>,
    pub command_timeout_secs: u64,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            escalation: "sudo".to_string(),
            refresh_index: vec!["apt-get".to_string(), "update".to_string()],
            upgrade: vec![
                "apt-get".to_string(),
                "upgrade".to_string(),
                "-y".to_string(),
            ],
            cleanup: vec![
                "apt-get".to_string(),
                "autoremove".to_string(),
                "-y".to_string(),
            ],
            command_timeout_secs: 600,
        }
    }
}

impl SystemSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Settings {
    /// Load settings from an explicit path, or from the default location.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, MeshError> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(MeshError::NotFound(format!(
                        "settings file {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => match default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)?;
        Self::from_toml(&content)
            .map_err(|e| MeshError::Settings(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write settings to the given path, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), MeshError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MeshError::Settings(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Default settings path: $XDG_CONFIG_HOME/meshctl/settings.toml
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// Expand a leading `~` to the home directory
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
