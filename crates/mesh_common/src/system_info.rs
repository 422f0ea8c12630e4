//! Host report for the "system info" menu entry and `meshctl info`
//!
//! Read-only. Every probe degrades to `None` instead of failing.

use crate::command_exec::{resolve_executable, CommandRunner};
use crate::config_store::ConfigStore;
use crate::repo_sync::RepositorySync;
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::System;

/// Executables the maintenance procedures rely on
pub const REQUIRED_TOOLS: [&str; 3] = ["git", "python3", "pip"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCheck {
    pub name: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReport {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub dirty: Option<bool>,
    pub bot_pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReport {
    pub path: PathBuf,
    pub exists: bool,
    pub sections: usize,
    pub interface_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReport {
    pub collected_at: DateTime<Utc>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel: Option<String>,
    pub hostname: Option<String>,
    pub cpu_cores: usize,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub running_as_root: bool,
    pub tools: Vec<ToolCheck>,
    pub checkout: Option<CheckoutReport>,
    pub config: ConfigReport,
}

impl HostReport {
    pub fn collect(
        settings: &Settings,
        runner: &dyn CommandRunner,
        checkout: Option<&Path>,
        config_path: &Path,
    ) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let mut tools: Vec<ToolCheck> = REQUIRED_TOOLS
            .iter()
            .map(|name| ToolCheck {
                name: name.to_string(),
                path: resolve_executable(name),
            })
            .collect();
        if !settings.system.escalation.is_empty() {
            tools.push(ToolCheck {
                name: settings.system.escalation.clone(),
                path: resolve_executable(&settings.system.escalation),
            });
        }

        Self {
            collected_at: Utc::now(),
            os_name: System::name(),
            os_version: System::os_version(),
            kernel: System::kernel_version(),
            hostname: System::host_name(),
            cpu_cores: sys.cpus().len(),
            total_memory_mb: sys.total_memory() / 1024 / 1024,
            available_memory_mb: sys.available_memory() / 1024 / 1024,
            running_as_root: nix::unistd::geteuid().is_root(),
            tools,
            checkout: checkout.map(|path| checkout_report(settings, runner, path)),
            config: config_report(config_path),
        }
    }

    pub fn missing_tools(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| t.path.is_none())
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Label/value rows for terminal display
    pub fn rows(&self) -> Vec<(String, String)> {
        let unknown = || "unknown".to_string();
        let mut rows = vec![
            (
                "OS".to_string(),
                format!(
                    "{} {}",
                    self.os_name.clone().unwrap_or_else(unknown),
                    self.os_version.clone().unwrap_or_default()
                )
                .trim()
                .to_string(),
            ),
            ("Kernel".to_string(), self.kernel.clone().unwrap_or_else(unknown)),
            ("Hostname".to_string(), self.hostname.clone().unwrap_or_else(unknown)),
            ("CPU cores".to_string(), self.cpu_cores.to_string()),
            (
                "Memory".to_string(),
                format!(
                    "{} MB total, {} MB available",
                    self.total_memory_mb, self.available_memory_mb
                ),
            ),
            (
                "Root".to_string(),
                if self.running_as_root { "yes" } else { "no" }.to_string(),
            ),
        ];

        for tool in &self.tools {
            rows.push((
                tool.name.clone(),
                tool.path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "not found".to_string()),
            ));
        }

        match &self.checkout {
            Some(c) => {
                rows.push(("Checkout".to_string(), c.path.display().to_string()));
                rows.push((
                    "Branch".to_string(),
                    match (&c.branch, &c.commit) {
                        (Some(b), Some(h)) => format!("{} @ {}", b, h),
                        _ => unknown(),
                    },
                ));
                if c.dirty == Some(true) {
                    rows.push(("Local changes".to_string(), "yes".to_string()));
                }
                rows.push((
                    "Bot".to_string(),
                    c.bot_pid
                        .map(|pid| format!("running (PID {})", pid))
                        .unwrap_or_else(|| "not running".to_string()),
                ));
            }
            None => rows.push(("Checkout".to_string(), "not located".to_string())),
        }

        rows.push((
            "Config".to_string(),
            if self.config.exists {
                format!(
                    "{} ({} sections, interface {})",
                    self.config.path.display(),
                    self.config.sections,
                    self.config.interface_type.as_deref().unwrap_or("unset")
                )
            } else {
                format!("{} (not created yet)", self.config.path.display())
            },
        ));
        rows
    }
}

fn checkout_report(settings: &Settings, runner: &dyn CommandRunner, path: &Path) -> CheckoutReport {
    let status = RepositorySync::new(settings, runner).status(path).ok();
    CheckoutReport {
        path: path.to_path_buf(),
        branch: status.as_ref().map(|s| s.branch.clone()),
        commit: status.as_ref().map(|s| s.commit.clone()),
        dirty: status.as_ref().map(|s| s.dirty),
        bot_pid: crate::process_supervisor::find_process_for_script(
            &path.join(&settings.bot.entry_script),
        ),
    }
}

fn config_report(path: &Path) -> ConfigReport {
    let store = if path.is_file() {
        ConfigStore::load(path).ok()
    } else {
        None
    };
    ConfigReport {
        path: path.to_path_buf(),
        exists: path.is_file(),
        sections: store.as_ref().map(ConfigStore::populated_sections).unwrap_or(0),
        interface_type: store
            .as_ref()
            .and_then(|s| s.get("interface", "type"))
            .map(str::to_string),
    }
}
