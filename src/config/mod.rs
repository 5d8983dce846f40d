use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::daemon::idle::IdleBackend;

/// Shortest accepted poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Video player settings
    #[serde(default)]
    pub player: PlayerConfig,

    /// Idle thresholds that select the playback mode
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Idle polling settings
    #[serde(default)]
    pub idle: IdleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Player executable
    #[serde(default = "default_program")]
    pub program: String,

    /// Video file to loop
    #[serde(default = "default_video")]
    pub video: PathBuf,

    /// How long to wait after an interrupt before killing the player
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Filter graph appended in rainbow mode
    #[serde(default = "default_rainbow_filter")]
    pub rainbow_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Idle seconds before normal playback starts
    #[serde(default = "default_first_seconds")]
    pub first_seconds: u64,

    /// Idle seconds before playback restarts with the rainbow filter
    #[serde(default = "default_second_seconds")]
    pub second_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// How often to query idle time (in seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,

    /// Idle backends to probe, in order of preference
    #[serde(default = "default_backends")]
    pub backends: Vec<IdleBackend>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_program() -> String {
    "ffplay".to_string()
}

fn default_video() -> PathBuf {
    PathBuf::from("capture2.mp4")
}

fn default_grace_period_ms() -> u64 {
    2000
}

fn default_rainbow_filter() -> String {
    "hue=h=2*t:s=2".to_string()
}

fn default_first_seconds() -> u64 {
    300 // 5 minutes
}

fn default_second_seconds() -> u64 {
    3600 // 1 hour
}

fn default_poll_interval() -> f64 {
    1.0
}

fn default_backends() -> Vec<IdleBackend> {
    vec![IdleBackend::Xprintidle, IdleBackend::Mutter]
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            video: default_video(),
            grace_period_ms: default_grace_period_ms(),
            rainbow_filter: default_rainbow_filter(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            first_seconds: default_first_seconds(),
            second_seconds: default_second_seconds(),
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            backends: default_backends(),
        }
    }
}

/// Values given on the command line. `None` keeps the config file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub video: Option<PathBuf>,
    pub first_threshold: Option<u64>,
    pub second_threshold: Option<u64>,
    pub poll_interval: Option<f64>,
}

/// The immutable, validated settings the controller runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub program: String,
    pub video: PathBuf,
    pub rainbow_filter: String,
    pub first_threshold: Duration,
    pub second_threshold: Duration,
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub backends: Vec<IdleBackend>,
}

impl Config {
    /// Load configuration from file, or create default if not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(Self::default_config_path);

        let config = if let Some(ref path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config from {:?}", path))?
            } else {
                Config::default()
            }
        } else {
            Config::default()
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(Self::default_config_path)
            .context("No config path available")?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(config_path)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "idlereel", "idlereel")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Fold command-line values into the file configuration.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(ref video) = overrides.video {
            self.player.video = video.clone();
        }
        if let Some(first) = overrides.first_threshold {
            self.thresholds.first_seconds = first;
        }
        if let Some(second) = overrides.second_threshold {
            self.thresholds.second_seconds = second;
        }
        if let Some(interval) = overrides.poll_interval {
            self.idle.poll_interval_seconds = interval;
        }
    }

    /// Validate and freeze the configuration for a run.
    pub fn settings(&self) -> Result<Settings> {
        let thresholds = &self.thresholds;
        if thresholds.second_seconds < thresholds.first_seconds {
            anyhow::bail!(
                "Second threshold ({}s) must not be below the first threshold ({}s)",
                thresholds.second_seconds,
                thresholds.first_seconds
            );
        }

        let interval = self.idle.poll_interval_seconds;
        let poll_interval = Duration::try_from_secs_f64(interval)
            .ok()
            .filter(|d| *d >= MIN_POLL_INTERVAL)
            .with_context(|| {
                format!(
                    "Poll interval must be a representable duration of at least {}ms, got {}s",
                    MIN_POLL_INTERVAL.as_millis(),
                    interval
                )
            })?;

        if self.idle.backends.is_empty() {
            anyhow::bail!("At least one idle backend must be configured");
        }

        if self.player.program.trim().is_empty() {
            anyhow::bail!("Player program must not be empty");
        }

        Ok(Settings {
            program: self.player.program.clone(),
            video: self.player.video.clone(),
            rainbow_filter: self.player.rainbow_filter.clone(),
            first_threshold: Duration::from_secs(thresholds.first_seconds),
            second_threshold: Duration::from_secs(thresholds.second_seconds),
            poll_interval,
            grace_period: Duration::from_millis(self.player.grace_period_ms),
            backends: self.idle.backends.clone(),
        })
    }
}
