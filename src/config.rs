//! # Host configuration
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [printer]
//! printer_name = "voron"
//! menu = true
//!
//! [idle_timeout]
//! timeout = 600.0
//!
//! [heaters]
//! names = ["extruder", "heater_bed"]
//!
//! [state_notify]
//! inactive_timeout = 300.0
//! heaters_active = true
//! on_inactive_gcode = "TURN_OFF_HEATERS"
//! pause_detection = "poll"
//!
//! [web]
//! listen = "127.0.0.1:3000"
//! ```
//!
//! Every section and every field is optional; missing values take the
//! defaults below. Template options are checked for syntax when the file is
//! loaded.

// src/config.rs - Single configuration file
use crate::gcode::{ScriptTemplate, TemplateError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("Invalid option {option}: {reason}")]
    Invalid { option: String, reason: String },
}

/// Main configuration struct for the host.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub idle_timeout: IdleTimeoutConfig,
    #[serde(default)]
    pub heaters: HeatersConfig,
    #[serde(default)]
    pub state_notify: StateNotifyConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default)]
    pub printer_name: Option<String>,
    /// Whether a display menu is attached.
    #[serde(default = "default_menu")]
    pub menu: bool,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            printer_name: None,
            menu: default_menu(),
        }
    }
}

/// Activity detector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdleTimeoutConfig {
    #[serde(default = "default_idle_timeout")]
    pub timeout: f64,
}

impl Default for IdleTimeoutConfig {
    fn default() -> Self {
        Self {
            timeout: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeatersConfig {
    #[serde(default = "default_heater_names")]
    pub names: Vec<String>,
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
}

impl Default for HeatersConfig {
    fn default() -> Self {
        Self {
            names: default_heater_names(),
            max_temp: default_max_temp(),
        }
    }
}

/// How the engine notices that a print was paused or resumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseDetection {
    /// Poll the job provider every `pause_poll_interval` while printing.
    #[default]
    Poll,
    /// Rely on `print-paused` / `print-resumed` events only.
    Event,
}

/// State tracking and notification options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateNotifyConfig {
    /// Seconds without activity before going inactive; 0 disables.
    #[serde(default)]
    pub inactive_timeout: f64,
    /// Fire the keep-alive script while a heater target holds the printer active.
    #[serde(default)]
    pub heaters_active: bool,
    #[serde(default)]
    pub on_ready_gcode: String,
    #[serde(default)]
    pub on_active_gcode: String,
    #[serde(default)]
    pub on_inactive_gcode: String,
    #[serde(default)]
    pub on_idle_gcode: String,
    /// Keep-alive script; empty disables it.
    #[serde(default = "default_noop_gcode")]
    pub noop_gcode: String,
    #[serde(default)]
    pub pause_detection: PauseDetection,
    #[serde(default = "default_poll_interval")]
    pub pause_poll_interval: f64,
    #[serde(default = "default_poll_interval")]
    pub menu_poll_interval: f64,
    #[serde(default = "default_mutex_retry_delay")]
    pub mutex_retry_delay: f64,
}

impl Default for StateNotifyConfig {
    fn default() -> Self {
        Self {
            inactive_timeout: 0.0,
            heaters_active: false,
            on_ready_gcode: String::new(),
            on_active_gcode: String::new(),
            on_inactive_gcode: String::new(),
            on_idle_gcode: String::new(),
            noop_gcode: default_noop_gcode(),
            pause_detection: PauseDetection::default(),
            pause_poll_interval: default_poll_interval(),
            menu_poll_interval: default_poll_interval(),
            mutex_retry_delay: default_mutex_retry_delay(),
        }
    }
}

impl StateNotifyConfig {
    /// Validate ranges and template syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("state_notify.inactive_timeout", self.inactive_timeout)?;
        positive("state_notify.pause_poll_interval", self.pause_poll_interval)?;
        positive("state_notify.menu_poll_interval", self.menu_poll_interval)?;
        positive("state_notify.mutex_retry_delay", self.mutex_retry_delay)?;
        for (name, source) in self.template_sources() {
            ScriptTemplate::new(name, source)?;
        }
        Ok(())
    }

    /// Option name and source of every configurable script.
    pub fn template_sources(&self) -> [(&'static str, &str); 5] {
        [
            ("on_ready_gcode", self.on_ready_gcode.as_str()),
            ("on_active_gcode", self.on_active_gcode.as_str()),
            ("on_inactive_gcode", self.on_inactive_gcode.as_str()),
            ("on_idle_gcode", self.on_idle_gcode.as_str()),
            ("noop_gcode", self.noop_gcode.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            listen: default_listen(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("idle_timeout.timeout", self.idle_timeout.timeout)?;
        positive("heaters.max_temp", self.heaters.max_temp)?;
        if let Some(name) = self.heaters.names.iter().find(|n| n.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                option: "heaters.names".to_string(),
                reason: format!("invalid heater name '{}'", name),
            });
        }
        self.state_notify.validate()
    }
}

fn non_negative(option: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            option: option.to_string(),
            reason: format!("{} must be >= 0", value),
        })
    }
}

fn positive(option: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            option: option.to_string(),
            reason: format!("{} must be > 0", value),
        })
    }
}

// Default value functions
fn default_menu() -> bool { true }
fn default_idle_timeout() -> f64 { 600.0 }
fn default_heater_names() -> Vec<String> { vec!["extruder".to_string(), "heater_bed".to_string()] }
fn default_max_temp() -> f64 { 300.0 }
fn default_noop_gcode() -> String { "G4 P1".to_string() }
fn default_poll_interval() -> f64 { 0.1 }
fn default_mutex_retry_delay() -> f64 { 0.2 }
fn default_web_enabled() -> bool { true }
fn default_listen() -> String { "127.0.0.1:3000".to_string() }

/// Parse and validate a configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    parse_config(&contents).map_err(|e| {
        tracing::error!("Failed to load config '{}': {}", path.display(), e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.state_notify.inactive_timeout, 0.0);
        assert!(!config.state_notify.heaters_active);
        assert!(config.state_notify.on_ready_gcode.is_empty());
        assert_eq!(config.state_notify.noop_gcode, "G4 P1");
        assert_eq!(config.state_notify.pause_detection, PauseDetection::Poll);
        assert_eq!(config.state_notify.pause_poll_interval, 0.1);
        assert_eq!(config.state_notify.mutex_retry_delay, 0.2);
        assert_eq!(config.idle_timeout.timeout, 600.0);
        assert_eq!(config.heaters.names, vec!["extruder", "heater_bed"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("printer.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[state_notify]\ninactive_timeout = 300.0\nheaters_active = true\non_inactive_gcode = 'TURN_OFF_HEATERS'\npause_detection = 'event'"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(&file_path).unwrap();
        assert_eq!(config.state_notify.inactive_timeout, 300.0);
        assert!(config.state_notify.heaters_active);
        assert_eq!(config.state_notify.on_inactive_gcode, "TURN_OFF_HEATERS");
        assert_eq!(config.state_notify.pause_detection, PauseDetection::Event);
        // Defaults for missing fields
        assert_eq!(config.state_notify.menu_poll_interval, 0.1);
        assert!(config.web.enabled);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(&file_path);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        let result = parse_config("[state_notify]\ninactive_timeout = -1.0");
        assert!(matches!(result, Err(ConfigError::Invalid { ref option, .. }) if option == "state_notify.inactive_timeout"));
        let result = parse_config("[state_notify]\nmutex_retry_delay = 0.0");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        let result = parse_config("[heaters]\nnames = ['extruder', ' ']");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_template_syntax_checked_at_load() {
        let result = parse_config("[state_notify]\non_idle_gcode = 'M117 {previous_state'");
        assert!(matches!(result, Err(ConfigError::Template(TemplateError::Syntax { .. }))));
    }
}
