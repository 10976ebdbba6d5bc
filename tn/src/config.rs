//! tasknag configuration types and loading

use std::fs;
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::state::{StateDir, write_atomic};

/// Reminder interval used when nothing else is configured
pub const DEFAULT_INTERVAL_MINUTES: u64 = 25;

/// Longest allowed reminder interval (one week)
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Main tasknag configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes the daemon sleeps between reminders
    pub interval: u64,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Alert sound configuration
    pub alerts: AlertConfig,

    /// Command prefix used to open the reminder window
    pub terminal: Vec<String>,

    /// Best-effort command that makes the current window fullscreen
    pub fullscreen: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_MINUTES,
            log_level: None,
            alerts: AlertConfig::default(),
            terminal: vec!["x-terminal-emulator".to_string(), "-e".to_string()],
            fullscreen: ["wmctrl", "-r", ":ACTIVE:", "-b", "add,fullscreen"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Load the config from the state directory
    ///
    /// A missing or unparseable file yields the defaults; startup never fails
    /// because of a bad config.
    pub fn load(dir: &StateDir) -> Self {
        let path = dir.config();
        debug!(?path, "Config::load: called");
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "Failed to read config, using defaults");
                }
                return Self::default();
            }
        };

        match serde_yaml::from_str::<Self>(&content) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to parse config, using defaults");
                Self::default()
            }
        }
    }

    /// Load the config, writing the defaults on first run
    ///
    /// The returned flag is true when this call created the file.
    pub fn load_or_init(dir: &StateDir) -> Result<(Self, bool)> {
        if dir.config().exists() {
            return Ok((Self::load(dir), false));
        }

        info!("No config file found, creating defaults");
        let config = Self::default();
        config.save(dir)?;
        Ok((config, true))
    }

    /// Persist the config atomically
    pub fn save(&self, dir: &StateDir) -> Result<()> {
        debug!(interval = self.interval, "Config::save: called");
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        write_atomic(&dir.config(), &content).context("Failed to save config")
    }

    /// Read just the log level, before logging is set up
    pub fn load_log_level(dir: &StateDir) -> Option<String> {
        let content = fs::read_to_string(dir.config()).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.saturating_mul(60))
    }

    /// Change the reminder interval; must be within 1..=MAX_INTERVAL_MINUTES
    pub fn set_interval(&mut self, minutes: u64) -> Result<()> {
        if minutes == 0 {
            return Err(eyre::eyre!("Interval must be at least one minute"));
        }
        if minutes > MAX_INTERVAL_MINUTES {
            return Err(eyre::eyre!("Interval must be at most {} minutes", MAX_INTERVAL_MINUTES));
        }
        self.interval = minutes;
        Ok(())
    }

    fn sanitized(mut self) -> Self {
        if self.interval == 0 || self.interval > MAX_INTERVAL_MINUTES {
            warn!(
                interval = self.interval,
                "Config interval out of range, using {}", DEFAULT_INTERVAL_MINUTES
            );
            self.interval = DEFAULT_INTERVAL_MINUTES;
        }
        self
    }
}

/// Alert sound configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Program used to play sound files
    pub player: String,

    /// Sound played before the escalation threshold
    pub soft: String,

    /// Sound played after the escalation threshold
    pub urgent: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            player: "paplay".to_string(),
            soft: "/usr/share/sounds/freedesktop/stereo/complete.oga".to_string(),
            urgent: "/usr/share/sounds/freedesktop/stereo/alarm-clock-elapsed.oga".to_string(),
        }
    }
}
