//! ConfigWizard - one interactive editor per configuration area
//!
//! Editors never touch the store directly. Answers are collected into
//! `StagedEdits` and applied in one go, so an editor cut short by EOF or
//! Ctrl-D leaves the store exactly as it was.

use crate::config_store::{
    bool_str, ConfigError, DEFAULT_EMERGENCY_KEYWORDS, DEFAULT_WELCOME_MESSAGE,
};
use crate::maintenance::Session;
use crate::prompt::{Notice, Prompter};
use std::io;
use std::ops::RangeInclusive;
use tracing::debug;

const CHANNELS: RangeInclusive<i64> = 0..=7;
const PERCENT: RangeInclusive<i64> = 0..=100;
const PORTS: RangeInclusive<i64> = 1..=65535;
const POSITIVE: RangeInclusive<i64> = 1..=i64::MAX;
const NON_NEGATIVE: RangeInclusive<i64> = 0..=i64::MAX;

const DEFAULT_SOUND_FILE: &str = "/usr/share/sounds/freedesktop/stereo/alarm-clock-elapsed.oga";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Editor {
    Interface,
    General,
    Emergency,
    Proximity,
    Altitude,
    Weather,
    Battery,
    NoisyNode,
    NewNode,
    EmailSms,
    Global,
}

impl Editor {
    pub const ALL: [Editor; 11] = [
        Editor::Interface,
        Editor::General,
        Editor::Emergency,
        Editor::Proximity,
        Editor::Altitude,
        Editor::Weather,
        Editor::Battery,
        Editor::NoisyNode,
        Editor::NewNode,
        Editor::EmailSms,
        Editor::Global,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Editor::Interface => "Interface Settings (Serial/TCP/BLE)",
            Editor::General => "General Settings (Bot name, admins)",
            Editor::Emergency => "Emergency Alerts",
            Editor::Proximity => "Proximity Alerts",
            Editor::Altitude => "Altitude Alerts",
            Editor::Weather => "Weather Alerts",
            Editor::Battery => "Battery Alerts",
            Editor::NoisyNode => "Noisy Node Detection",
            Editor::NewNode => "New Node Welcomes",
            Editor::EmailSms => "Email/SMS Settings",
            Editor::Global => "Global Alert Settings",
        }
    }

    /// Ask this editor's questions. Nothing is written anywhere.
    pub fn collect(&self, prompter: &dyn Prompter) -> io::Result<StagedEdits> {
        let ask = Ask { prompter };
        let mut edits = StagedEdits::default();
        match self {
            Editor::Interface => interface(&ask, &mut edits)?,
            Editor::General => general(&ask, &mut edits)?,
            Editor::Emergency => emergency(&ask, &mut edits)?,
            Editor::Proximity => proximity(&ask, &mut edits)?,
            Editor::Altitude => altitude(&ask, &mut edits)?,
            Editor::Weather => weather(&ask, &mut edits)?,
            Editor::Battery => battery(&ask, &mut edits)?,
            Editor::NoisyNode => noisy_node(&ask, &mut edits)?,
            Editor::NewNode => new_node(&ask, &mut edits)?,
            Editor::EmailSms => email_sms(&ask, &mut edits)?,
            Editor::Global => global(&ask, &mut edits)?,
        }
        Ok(edits)
    }

    /// Collect, then apply to the session store. Returns the number of keys written.
    pub fn run(&self, session: &mut Session, prompter: &dyn Prompter) -> io::Result<usize> {
        let edits = self.collect(prompter)?;
        let written = edits.len();
        if written > 0 {
            edits
                .apply_to(session)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            prompter.notify(Notice::Success, &format!("{} updated", self.title()));
        }
        debug!(editor = self.title(), written, "editor finished");
        Ok(written)
    }
}

/// Pending key writes grouped by section, in answer order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedEdits {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl StagedEdits {
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let idx = match self.sections.iter().position(|(name, _)| name == section) {
            Some(idx) => idx,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        let entries = &mut self.sections[idx].1;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, entries)| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.sections.iter().map(|(_, e)| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply_to(self, session: &mut Session) -> Result<(), ConfigError> {
        for (section, entries) in &self.sections {
            session.store.apply(section, entries)?;
        }
        session.dirty = true;
        Ok(())
    }
}

/// Typed questions that re-ask until the answer validates
struct Ask<'p> {
    prompter: &'p dyn Prompter,
}

impl Ask<'_> {
    fn text(&self, prompt: &str, default: Option<&str>) -> io::Result<String> {
        self.prompter.input(prompt, default)
    }

    fn yes_no(&self, prompt: &str, default: bool) -> io::Result<bool> {
        self.prompter.confirm(prompt, default)
    }

    fn int(&self, prompt: &str, default: i64, range: RangeInclusive<i64>) -> io::Result<i64> {
        let default_text = default.to_string();
        loop {
            let answer = self.text(prompt, Some(&default_text))?;
            match answer.parse::<i64>() {
                Ok(v) if range.contains(&v) => return Ok(v),
                _ => self
                    .prompter
                    .notify(Notice::Error, &int_hint(&answer, &range)),
            }
        }
    }

    fn float(&self, prompt: &str, default: f64, limit: f64) -> io::Result<f64> {
        let default_text = float_str(default);
        loop {
            let answer = self.text(prompt, Some(&default_text))?;
            match answer.parse::<f64>() {
                Ok(v) if v.is_finite() && v.abs() <= limit => return Ok(v),
                _ => self.prompter.notify(
                    Notice::Error,
                    &format!(
                        "Invalid input '{}'. Expected a number between -{} and {}",
                        answer, limit, limit
                    ),
                ),
            }
        }
    }

    /// Free text checked by `valid`; `hint` explains the expected shape
    fn checked(
        &self,
        prompt: &str,
        default: Option<&str>,
        hint: &str,
        valid: impl Fn(&str) -> bool,
    ) -> io::Result<String> {
        loop {
            let answer = self.text(prompt, default)?;
            if valid(&answer) {
                return Ok(answer);
            }
            self.prompter
                .notify(Notice::Error, &format!("Invalid input '{}'. {}", answer, hint));
        }
    }
}

fn int_hint(answer: &str, range: &RangeInclusive<i64>) -> String {
    let expected = if *range.end() == i64::MAX {
        if *range.start() == 1 {
            "a positive whole number".to_string()
        } else {
            format!("a whole number of at least {}", range.start())
        }
    } else {
        format!("a whole number between {} and {}", range.start(), range.end())
    };
    format!("Invalid input '{}'. Expected {}", answer, expected)
}

/// Always keeps a decimal point, so 0 is written as `0.0`
fn float_str(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

fn is_location(text: &str) -> bool {
    let mut parts = text.split(',').map(|p| p.trim().parse::<f64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(lat)), Some(Ok(lon)), None) => lat.abs() <= 90.0 && lon.abs() <= 180.0,
        _ => false,
    }
}

fn is_quiet_hours(text: &str) -> bool {
    fn clock(part: &str) -> bool {
        match part.trim().split_once(':') {
            Some((h, m)) if h.len() == 2 && m.len() == 2 => matches!(
                (h.parse::<u8>(), m.parse::<u8>()),
                (Ok(h), Ok(m)) if h < 24 && m < 60
            ),
            _ => false,
        }
    }
    match text.split_once('-') {
        Some((from, to)) => clock(from) && clock(to),
        None => false,
    }
}

/// Starts an alert editor: writes the flag and reports whether to continue
fn enabled(
    ask: &Ask,
    edits: &mut StagedEdits,
    section: &str,
    question: &str,
    default: bool,
) -> io::Result<bool> {
    let on = ask.yes_no(question, default)?;
    edits.set(section, "enabled", bool_str(on));
    Ok(on)
}

fn interface(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "interface";
    let choice = ask.prompter.choose(
        "Select connection type",
        &["Serial (recommended)", "TCP", "BLE"],
        0,
    )?;
    match choice {
        1 => {
            edits.set(S, "type", "tcp");
            let host = ask.checked(
                "Enter TCP hostname/IP",
                Some("192.168.1.100"),
                "Expected a hostname or IP address",
                |s| !s.is_empty() && !s.contains(char::is_whitespace),
            )?;
            edits.set(S, "hostname", host);
        }
        2 => {
            edits.set(S, "type", "ble");
            let mac = ask.checked(
                "Enter BLE MAC address",
                Some("AA:BB:CC:DD:EE:FF"),
                "Expected six hex pairs separated by ':'",
                |s| {
                    let pairs: Vec<&str> = s.split(':').collect();
                    pairs.len() == 6
                        && pairs
                            .iter()
                            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
                },
            )?;
            edits.set(S, "mac", mac);
        }
        _ => {
            edits.set(S, "type", "serial");
            if !ask.yes_no("Use auto-detect for serial port?", true)? {
                let port = ask.text("Enter serial port", Some("/dev/ttyUSB0"))?;
                edits.set(S, "port", port);
            }
        }
    }
    Ok(())
}

fn general(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "general";
    edits.set(S, "bot_name", ask.text("Bot name", Some("MeshBot"))?);
    if ask.yes_no("Configure admin nodes?", false)? {
        let admins = ask.text("Admin node numbers (comma-separated)", None)?;
        edits.set(S, "bbs_admin_list", admins);
    }
    if ask.yes_no("Configure favorite nodes?", false)? {
        let favorites = ask.text("Favorite node numbers (comma-separated)", None)?;
        edits.set(S, "favoriteNodeList", favorites);
    }
    Ok(())
}

fn emergency(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "emergencyHandler";
    if !enabled(ask, edits, S, "Enable emergency keyword detection?", true)? {
        return Ok(());
    }
    let keywords = if ask.yes_no("Use default emergency keywords?", true)? {
        DEFAULT_EMERGENCY_KEYWORDS.to_string()
    } else {
        ask.text("Enter emergency keywords (comma-separated)", None)?
    };
    edits.set(S, "emergency_keywords", keywords);
    let channel = ask.int("Alert channel number", 2, CHANNELS)?;
    edits.set(S, "alert_channel", channel.to_string());
    let cooldown = ask.int("Cooldown period between alerts (seconds)", 300, POSITIVE)?;
    edits.set(S, "cooldown_period", cooldown.to_string());

    if ask.yes_no("Enable email notifications for emergencies?", false)? {
        edits.set(S, "send_email", bool_str(true));
    }
    if ask.yes_no("Enable SMS notifications for emergencies?", false)? {
        edits.set(S, "send_sms", bool_str(true));
    }
    if ask.yes_no("Play sound for emergency alerts?", false)? {
        edits.set(S, "play_sound", bool_str(true));
        edits.set(S, "sound_file", ask.text("Sound file path", Some(DEFAULT_SOUND_FILE))?);
    }
    Ok(())
}

fn proximity(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "proximityAlert";
    if !enabled(ask, edits, S, "Enable proximity alerts?", false)? {
        return Ok(());
    }
    let lat = ask.float("Target latitude", 0.0, 90.0)?;
    edits.set(S, "target_latitude", float_str(lat));
    let lon = ask.float("Target longitude", 0.0, 180.0)?;
    edits.set(S, "target_longitude", float_str(lon));
    let radius = ask.int("Proximity radius in meters", 100, POSITIVE)?;
    edits.set(S, "radius_meters", radius.to_string());
    let channel = ask.int("Alert channel", 0, CHANNELS)?;
    edits.set(S, "alert_channel", channel.to_string());
    let interval = ask.int("Check interval in seconds", 60, POSITIVE)?;
    edits.set(S, "check_interval", interval.to_string());
    if ask.yes_no("Execute script on proximity trigger?", false)? {
        edits.set(S, "run_script", bool_str(true));
        edits.set(S, "script_path", ask.text("Script path", None)?);
    }
    Ok(())
}

fn altitude(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "altitudeAlert";
    if !enabled(ask, edits, S, "Enable high altitude detection?", false)? {
        return Ok(());
    }
    let min = ask.int("Minimum altitude threshold (meters)", 1000, NON_NEGATIVE)?;
    edits.set(S, "min_altitude", min.to_string());
    let channel = ask.int("Alert channel", 0, CHANNELS)?;
    edits.set(S, "alert_channel", channel.to_string());
    let interval = ask.int("Check interval (seconds)", 120, POSITIVE)?;
    edits.set(S, "check_interval", interval.to_string());
    Ok(())
}

fn weather(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "weatherAlert";
    if !enabled(ask, edits, S, "Enable weather/NOAA alerts?", false)? {
        return Ok(());
    }
    let location = ask.checked(
        "Location (latitude,longitude)",
        None,
        "Expected latitude,longitude within +/-90 and +/-180",
        is_location,
    )?;
    edits.set(S, "location", location);
    let severity = ask.text("Alert severity levels (comma-separated)", Some("Extreme,Severe"))?;
    edits.set(S, "severity_levels", severity);
    let interval = ask.int("Check interval (minutes)", 30, POSITIVE)?;
    edits.set(S, "check_interval_minutes", interval.to_string());
    let channel = ask.int("Alert channel", 2, CHANNELS)?;
    edits.set(S, "alert_channel", channel.to_string());
    Ok(())
}

fn battery(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "batteryAlert";
    if !enabled(ask, edits, S, "Enable low battery monitoring?", false)? {
        return Ok(());
    }
    let threshold = ask.int("Battery threshold percentage", 20, PERCENT)?;
    edits.set(S, "threshold_percent", threshold.to_string());
    let interval = ask.int("Check interval (minutes)", 30, POSITIVE)?;
    edits.set(S, "check_interval_minutes", interval.to_string());
    let channel = ask.int("Alert channel", 0, CHANNELS)?;
    edits.set(S, "alert_channel", channel.to_string());
    if ask.yes_no("Monitor specific nodes only?", false)? {
        let nodes = ask.text("Node numbers to monitor (comma-separated)", None)?;
        edits.set(S, "monitor_nodes", nodes);
    }
    Ok(())
}

fn noisy_node(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "noisyNodeAlert";
    if !enabled(ask, edits, S, "Enable noisy node detection?", false)? {
        return Ok(());
    }
    let threshold = ask.int("Message threshold (messages per period)", 50, POSITIVE)?;
    edits.set(S, "message_threshold", threshold.to_string());
    let period = ask.int("Time period (minutes)", 10, POSITIVE)?;
    edits.set(S, "time_period_minutes", period.to_string());
    if ask.yes_no("Auto-mute noisy nodes?", false)? {
        edits.set(S, "auto_mute", bool_str(true));
        let duration = ask.int("Mute duration (minutes)", 60, POSITIVE)?;
        edits.set(S, "mute_duration_minutes", duration.to_string());
    }
    Ok(())
}

fn new_node(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "newNodeAlert";
    if !enabled(ask, edits, S, "Enable new node welcomes?", true)? {
        return Ok(());
    }
    let message = ask.text(
        "Welcome message (use {node_name} placeholder)",
        Some(DEFAULT_WELCOME_MESSAGE),
    )?;
    edits.set(S, "welcome_message", message);
    let dm = ask.yes_no("Send welcome as DM?", true)?;
    edits.set(S, "send_as_dm", bool_str(dm));
    if ask.yes_no("Also announce to channel?", false)? {
        edits.set(S, "announce_to_channel", bool_str(true));
        let channel = ask.int("Announcement channel", 0, CHANNELS)?;
        edits.set(S, "announcement_channel", channel.to_string());
    }
    Ok(())
}

fn email_sms(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    if !ask.yes_no("Configure email settings?", false)? {
        return Ok(());
    }
    const SMTP: &str = "smtp";
    edits.set(SMTP, "enableSMTP", bool_str(true));
    edits.set(SMTP, "SMTP_SERVER", ask.text("SMTP server", Some("smtp.gmail.com"))?);
    let port = ask.int("SMTP port", 587, PORTS)?;
    edits.set(SMTP, "SMTP_PORT", port.to_string());
    let username = ask.text("SMTP username/email", None)?;
    edits.set(SMTP, "SMTP_PASSWORD", ask.text("SMTP password", None)?);
    let from_default = Some(username.as_str()).filter(|u| !u.is_empty());
    edits.set(SMTP, "SMTP_FROM", ask.text("From email address", from_default)?);
    edits.set(SMTP, "SMTP_USERNAME", username);
    let sysops = ask.text("Sysop email addresses (comma-separated)", None)?;
    edits.set(SMTP, "sysopEmails", sysops);

    if ask.yes_no("Configure SMS settings?", false)? {
        const SMS: &str = "sms";
        edits.set(SMS, "enabled", bool_str(true));
        edits.set(SMS, "gateway", ask.text("SMS gateway (e.g., @txt.att.net)", None)?);
        let phones = ask.text("Phone numbers (comma-separated)", None)?;
        edits.set(SMS, "phone_numbers", phones);
    }
    Ok(())
}

fn global(ask: &Ask, edits: &mut StagedEdits) -> io::Result<()> {
    const S: &str = "alertGlobal";
    let on = ask.yes_no("Enable all alerts globally?", true)?;
    edits.set(S, "global_enabled", bool_str(on));
    if ask.yes_no("Configure quiet hours?", false)? {
        let quiet = ask.checked(
            "Quiet hours (24hr format HH:MM-HH:MM, e.g., 22:00-07:00)",
            None,
            "Expected HH:MM-HH:MM",
            is_quiet_hours,
        )?;
        edits.set(S, "quiet_hours", quiet);
    }
    let max = ask.int("Maximum alerts per hour (all types)", 20, NON_NEGATIVE)?;
    edits.set(S, "max_alerts_per_hour", max.to_string());
    Ok(())
}
