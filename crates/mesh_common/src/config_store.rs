//! ConfigStore - sectioned key/value configuration of the bot
//!
//! The bot reads an INI file (`config.ini`). The store keeps sections and keys
//! in order so that loading and saving an unmodified file gives the same bytes
//! back. Values are plain strings; editors own parsing and validation.
//!
//! Save order: the fixed sections in declaration order, then any unknown
//! sections in the order they were loaded.
//!
//! Multi-line values are written as indented continuation lines. Each line is
//! trimmed on load, interior empty lines are kept and trailing ones dropped.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Sections every store carries, in the order they are written
pub const FIXED_SECTIONS: [&str; 17] = [
    "interface",
    "general",
    "emergencyHandler",
    "proximityAlert",
    "altitudeAlert",
    "weatherAlert",
    "ipawsAlert",
    "volcanoAlert",
    "noisyNodeAlert",
    "batteryAlert",
    "newNodeAlert",
    "snrAlert",
    "disconnectAlert",
    "customAlert",
    "alertGlobal",
    "smtp",
    "sms",
];

pub const DEFAULT_EMERGENCY_KEYWORDS: &str =
    "emergency,911,112,999,police,fire,ambulance,rescue,help,sos,mayday";

pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome to the mesh, {node_name}!";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Canonical string form of a boolean field
pub fn bool_str(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Overwrites in place so a key keeps its original position
    fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }
}

/// Ordered sectioned configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    sections: Vec<Section>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Store with every fixed section present and empty
    pub fn new() -> Self {
        Self {
            sections: FIXED_SECTIONS.iter().map(|name| Section::new(name)).collect(),
        }
    }

    /// First-run configuration with safe defaults
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.put("interface", "type", "serial");
        store.put("general", "bot_name", "MeshBot");

        store.put("emergencyHandler", "enabled", bool_str(true));
        store.put(
            "emergencyHandler",
            "emergency_keywords",
            DEFAULT_EMERGENCY_KEYWORDS,
        );
        store.put("emergencyHandler", "alert_channel", "2");
        store.put("emergencyHandler", "cooldown_period", "300");

        store.put("newNodeAlert", "enabled", bool_str(true));
        store.put("newNodeAlert", "welcome_message", DEFAULT_WELCOME_MESSAGE);
        store.put("newNodeAlert", "send_as_dm", bool_str(true));

        store.put("alertGlobal", "global_enabled", bool_str(true));
        store.put("alertGlobal", "max_alerts_per_hour", "20");
        store
    }

    /// Load from disk. A missing file yields a fresh store.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, starting fresh");
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse the persisted form
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut parsed: Vec<Section> = Vec::new();
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;
        // Empty lines seen inside a value, kept only if a continuation follows
        let mut pending_blank = 0;

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() {
                if last_key.is_some() {
                    pending_blank += 1;
                }
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Indented line continues the previous value
            if raw.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (current, last_key.as_ref()) {
                    let section = &mut parsed[section];
                    let previous = section.get(key).unwrap_or_default().to_string();
                    let gap = "\n".repeat(pending_blank + 1);
                    section.set(key, &format!("{}{}{}", previous, gap, trimmed));
                    pending_blank = 0;
                    continue;
                }
                return Err(ConfigError::Parse {
                    line: line_no,
                    message: "continuation line without a preceding key".to_string(),
                });
            }

            last_key = None;
            pending_blank = 0;

            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ConfigError::Parse {
                    line: line_no,
                    message: format!("unterminated section header '{}'", trimmed),
                })?;
                if name.is_empty() {
                    return Err(ConfigError::Parse {
                        line: line_no,
                        message: "empty section name".to_string(),
                    });
                }
                // Repeated headers merge into the first occurrence
                current = Some(match parsed.iter().position(|s| s.name == name) {
                    Some(pos) => pos,
                    None => {
                        parsed.push(Section::new(name));
                        parsed.len() - 1
                    }
                });
                continue;
            }

            let section = current.ok_or_else(|| ConfigError::Parse {
                line: line_no,
                message: "key before any section header".to_string(),
            })?;
            let (key, value) = split_entry(trimmed).ok_or_else(|| ConfigError::Parse {
                line: line_no,
                message: format!("expected 'key = value', got '{}'", trimmed),
            })?;
            if key.is_empty() {
                return Err(ConfigError::Parse {
                    line: line_no,
                    message: "empty key".to_string(),
                });
            }
            parsed[section].set(key, value);
            last_key = Some(key.to_string());
        }

        Ok(Self::from_parsed(parsed))
    }

    /// Fixed sections first, unknown sections after, in load order
    fn from_parsed(mut parsed: Vec<Section>) -> Self {
        let mut sections = Vec::with_capacity(FIXED_SECTIONS.len() + parsed.len());
        for name in FIXED_SECTIONS {
            match parsed.iter().position(|s| s.name == name) {
                Some(pos) => sections.push(parsed.remove(pos)),
                None => sections.push(Section::new(name)),
            }
        }
        sections.extend(parsed);
        Self { sections }
    }

    /// Persisted form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&value.replace('\n', "\n\t"));
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    /// Write to disk via a temp file and rename
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, self.render()).map_err(io_err)?;
        if let Err(source) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(io_err(source));
        }

        debug!(path = %path.display(), sections = self.sections.len(), "config saved");
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.find(section).and_then(|s| s.get(key))
    }

    /// Set a value, creating the section if it is not known yet.
    ///
    /// Names that could not be read back from the persisted form are refused.
    pub fn set(&mut self, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        check_name("section", section)?;
        check_name("key", key)?;
        self.put(section, key, value);
        Ok(())
    }

    fn put(&mut self, section: &str, key: &str, value: &str) {
        let idx = match self.sections.iter().position(|s| s.name == section) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section::new(section));
                self.sections.len() - 1
            }
        };
        self.sections[idx].set(key, value);
    }

    /// Apply a batch of staged edits to one section in a single call.
    /// Nothing is written unless every name is valid.
    pub fn apply(&mut self, section: &str, edits: &[(String, String)]) -> Result<(), ConfigError> {
        check_name("section", section)?;
        for (key, _) in edits {
            check_name("key", key)?;
        }
        for (key, value) in edits {
            self.put(section, key, value);
        }
        Ok(())
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.find(section).is_some()
    }

    /// Entries of a section, in assignment order
    pub fn section(&self, section: &str) -> Option<Vec<(&str, &str)>> {
        self.find(section).map(|s| {
            s.entries
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect()
        })
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Sections holding at least one key
    pub fn populated_sections(&self) -> usize {
        self.sections.iter().filter(|s| !s.entries.is_empty()).count()
    }

    /// True when no section holds any key
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.entries.is_empty())
    }

    fn find(&self, section: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == section)
    }
}

fn check_name(kind: &'static str, name: &str) -> Result<(), ConfigError> {
    let forbidden: &[char] = match kind {
        "section" => &['[', ']', '\n', '\r'],
        _ => &['=', ':', '\n', '\r'],
    };
    let valid = !name.is_empty()
        && name.trim() == name
        && !name.starts_with(['#', ';', '['])
        && !name.contains(forbidden);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// Split on the first `=` or `:`, whichever comes first
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let pos = line.find(|c| c == '=' || c == ':')?;
    Some((line[..pos].trim(), line[pos + 1..].trim()))
}
