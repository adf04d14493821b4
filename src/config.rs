//! Strongly-typed configuration loading.
//!
//! Settings come from `config/default.toml` (base file) with environment
//! overrides prefixed `SPM_DAQ_`, e.g. `SPM_DAQ_APPLICATION_LOG_LEVEL=debug`.
//! Every field has a default, so an absent file still yields a working
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::bridge::SetVerifyPolicy;
use crate::sequencer::SequencerConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings.
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Sequencer timing.
    #[serde(default)]
    pub sequencer: SequencerSettings,
    /// Parameter set/verify behavior.
    #[serde(default)]
    pub instrument: InstrumentSettings,
    /// Script store location.
    #[serde(default)]
    pub scripts: ScriptSettings,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name used in logs.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Sequencer timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerSettings {
    /// Worst-case seconds allowed per raster line.
    #[serde(default = "default_seconds_per_line")]
    pub seconds_per_line: f64,
    /// Lower bound on the per-segment wait.
    #[serde(with = "humantime_serde", default = "default_min_segment_timeout")]
    pub min_segment_timeout: Duration,
    /// Settle delay after a probe move.
    #[serde(with = "humantime_serde", default = "default_settle_time")]
    pub settle_time: Duration,
    /// Deadline for one point measurement.
    #[serde(with = "humantime_serde", default = "default_measurement_timeout")]
    pub measurement_timeout: Duration,
    /// Scan-state poll period.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            seconds_per_line: default_seconds_per_line(),
            min_segment_timeout: default_min_segment_timeout(),
            settle_time: default_settle_time(),
            measurement_timeout: default_measurement_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl From<&SequencerSettings> for SequencerConfig {
    fn from(settings: &SequencerSettings) -> Self {
        SequencerConfig {
            seconds_per_line: settings.seconds_per_line,
            min_segment_timeout: settings.min_segment_timeout,
            settle_time: settings.settle_time,
            measurement_timeout: settings.measurement_timeout,
            poll_interval: settings.poll_interval,
        }
    }
}

/// Parameter set/verify settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Write attempts before a set is reported failed.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between write attempts.
    #[serde(with = "humantime_serde", default = "default_retry_backoff")]
    pub retry_backoff: Duration,
    /// Absolute read-back tolerance for scan parameters.
    #[serde(default = "default_scan_tolerance")]
    pub scan_tolerance: f64,
    /// Absolute read-back tolerance for feedback parameters.
    #[serde(default = "default_feedback_tolerance")]
    pub feedback_tolerance: f64,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff: default_retry_backoff(),
            scan_tolerance: default_scan_tolerance(),
            feedback_tolerance: default_feedback_tolerance(),
        }
    }
}

impl From<&InstrumentSettings> for SetVerifyPolicy {
    fn from(settings: &InstrumentSettings) -> Self {
        SetVerifyPolicy {
            attempts: settings.retry_attempts,
            backoff: settings.retry_backoff,
            scan_tolerance: settings.scan_tolerance,
            feedback_tolerance: settings.feedback_tolerance,
        }
    }
}

/// Script store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSettings {
    /// JSON file holding the named scripts.
    #[serde(default = "default_scripts_path")]
    pub path: PathBuf,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            path: default_scripts_path(),
        }
    }
}

fn default_app_name() -> String {
    "spm_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_seconds_per_line() -> f64 {
    2.0
}

fn default_min_segment_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_settle_time() -> Duration {
    Duration::from_millis(500)
}

fn default_measurement_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_scan_tolerance() -> f64 {
    1e-3
}

fn default_feedback_tolerance() -> f64 {
    1e-6
}

fn default_scripts_path() -> PathBuf {
    PathBuf::from("data/sts_scripts.json")
}

impl Settings {
    /// Load from the default file location plus environment overrides.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/default.toml")
    }

    /// Load from a specific file path plus environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPM_DAQ_").split("_"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.sequencer.seconds_per_line <= 0.0 {
            return Err(format!(
                "Invalid seconds_per_line {}. Must be positive",
                self.sequencer.seconds_per_line
            ));
        }

        if self.instrument.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }

        Ok(())
    }
}
