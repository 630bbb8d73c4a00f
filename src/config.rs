//! # Configuration Management
//!
//! This module loads `flood-watch.toml`: which upstream source to poll, which
//! calibration to apply, the zone thresholds, and polling/logging settings.
//!
//! A missing file means "use the defaults" (NOAA San Francisco, fixed 0.4 ft
//! offset, the three Mill Valley zones). A file that exists but is unreadable,
//! malformed, or describes an impossible calibration stops startup with a
//! [`ConfigError`]; nothing is re-validated per poll.

use crate::calibration::{preset, CalibrationError, CalibrationProfile, PRESET_NAMES};
use crate::monitor::{Engine, PollSettings};
use crate::tide_data::{
    http_client, AnySource, FetchError, NoaaClient, OneRainClient, NOAA_BASE_URL,
    ONERAIN_SENSOR_URL,
};
use crate::zones::{default_zones, validate_zones, ClassifierPolicy, ZoneError, ZoneThreshold};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{fs, io};
use thiserror::Error;
use tracing::info;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "flood-watch.toml";

/// Preset used when `[calibration]` names nothing.
pub const DEFAULT_PRESET: &str = "fixed-0.4";

/// Upper bound for every configured window and interval (one week).
const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid calibration: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("invalid zones: {0}")]
    Zone(#[from] ZoneError),

    #[error("unknown calibration preset `{0}` (known: {})", PRESET_NAMES.join(", "))]
    UnknownPreset(String),

    #[error("set either `calibration.preset` or `[calibration.custom]`, not both")]
    AmbiguousCalibration,

    #[error("invalid setting `{0}`: {1}")]
    Invalid(&'static str, String),
}

/// Application configuration loaded from flood-watch.toml
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub calibration: CalibrationConfig,
    pub classifier: ClassifierPolicy,
    pub zones: Zones,
    pub poll: PollConfig,
    pub logging: LoggingConfig,
}

/// Zone list that defaults to the Mill Valley roads when the file omits it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Zones(pub Vec<ZoneThreshold>);

impl Default for Zones {
    fn default() -> Self {
        Zones(default_zones())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Noaa,
    #[serde(rename = "onerain")]
    OneRain,
}

/// Upstream water-level source
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// NOAA station ID (9414290 is San Francisco)
    pub station: String,
    /// Sent to NOAA as `application=` so they can see who is polling
    pub application: String,
    pub noaa_base_url: String,
    pub sensor_url: String,
    /// History requested for the rise/fall rate
    pub trend_minutes: i64,
    /// Use a prediction for the surge anomaly only if it is this close to the reading
    pub surge_window_minutes: i64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Noaa,
            station: "9414290".to_string(),
            application: "millvalleybriefing".to_string(),
            noaa_base_url: NOAA_BASE_URL.to_string(),
            sensor_url: ONERAIN_SENSOR_URL.to_string(),
            trend_minutes: 60,
            surge_window_minutes: 90,
        }
    }
}

/// Either a named preset or a custom profile
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub preset: Option<String>,
    pub custom: Option<CalibrationProfile>,
}

impl CalibrationConfig {
    pub fn profile(&self) -> Result<CalibrationProfile, ConfigError> {
        let profile = match (&self.preset, &self.custom) {
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousCalibration),
            (None, Some(custom)) => custom.clone(),
            (Some(name), None) => {
                preset(name).ok_or_else(|| ConfigError::UnknownPreset(name.clone()))?
            }
            (None, None) => preset(DEFAULT_PRESET)
                .ok_or_else(|| ConfigError::UnknownPreset(DEFAULT_PRESET.to_string()))?,
        };
        profile.validate()?;
        Ok(profile)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Readings older than this are flagged stale on the board
    pub stale_after_secs: i64,
    pub rain_advisory: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            stale_after_secs: 900,
            rain_advisory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "flood_watch_lib=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from flood-watch.toml in the working directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<Config>(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.profile()?;
        validate_zones(&self.zones.0)?;

        if !(self.classifier.warning_margin.is_finite() && self.classifier.warning_margin >= 0.0)
        {
            return Err(ConfigError::Invalid(
                "classifier.warning_margin",
                "must be a non-negative number".to_string(),
            ));
        }
        if !(1..=MAX_WINDOW_SECS).contains(&self.poll.interval_secs) {
            return Err(ConfigError::Invalid(
                "poll.interval_secs",
                format!("must be between 1 and {MAX_WINDOW_SECS}"),
            ));
        }
        if !(1..=MAX_WINDOW_SECS as i64).contains(&self.poll.stale_after_secs) {
            return Err(ConfigError::Invalid(
                "poll.stale_after_secs",
                format!("must be between 1 and {MAX_WINDOW_SECS}"),
            ));
        }
        if !(1..=MAX_WINDOW_MINUTES).contains(&self.source.trend_minutes) {
            return Err(ConfigError::Invalid(
                "source.trend_minutes",
                format!("must be between 1 and {MAX_WINDOW_MINUTES}"),
            ));
        }
        if !(0..=MAX_WINDOW_MINUTES).contains(&self.source.surge_window_minutes) {
            return Err(ConfigError::Invalid(
                "source.surge_window_minutes",
                format!("must be between 0 and {MAX_WINDOW_MINUTES}"),
            ));
        }
        if self.source.kind == SourceKind::Noaa && self.source.station.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "source.station",
                "a NOAA station ID is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Calibration, zones and classifier policy for the poll pipeline
    pub fn engine(&self) -> Result<Engine, ConfigError> {
        Ok(Engine {
            profile: self.calibration.profile()?,
            zones: self.zones.0.clone(),
            policy: self.classifier,
        })
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            trend_window: chrono::Duration::minutes(self.source.trend_minutes),
            surge_window: chrono::Duration::minutes(self.source.surge_window_minutes),
            rain_advisory: self.poll.rain_advisory,
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll.interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.poll.stale_after_secs)
    }

    /// Build the configured upstream source
    pub fn source(&self) -> Result<AnySource, FetchError> {
        let http = http_client()?;
        Ok(match self.source.kind {
            SourceKind::Noaa => AnySource::Noaa(NoaaClient::with_base_url(
                http,
                &self.source.noaa_base_url,
                &self.source.station,
                &self.source.application,
            )),
            SourceKind::OneRain => {
                AnySource::OneRain(OneRainClient::new(http, &self.source.sensor_url))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationModel;
    use crate::zones::ClosureBoundary;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.source.kind, SourceKind::Noaa);
        assert_eq!(config.source.station, "9414290");
        assert_eq!(config.zones.0.len(), 3);
        assert_eq!(config.poll.interval_secs, 300);
        assert_eq!(config.engine().unwrap().profile.name, DEFAULT_PRESET);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/flood-watch.toml").unwrap();
        assert_eq!(config.source.station, "9414290");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
[source]
kind = "onerain"

[calibration]
preset = "surge-rain"

[classifier]
boundary = "exclusive"
warning_margin = 0.4

[poll]
rain_advisory = true
"#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.source.kind, SourceKind::OneRain);
        assert_eq!(config.source.trend_minutes, 60);
        assert_eq!(config.classifier.boundary, ClosureBoundary::Exclusive);
        assert_eq!(config.zones.0.len(), 3);
        assert!(config.poll_settings().rain_advisory);
        assert!(config.engine().unwrap().profile.rain_override.is_some());
    }

    #[test]
    fn test_custom_calibration_and_zones() {
        let file = write_config(
            r#"
[calibration.custom]
name = "king-tide-2025"
version = 5

[calibration.custom.model]
kind = "surge_dynamic"
base_amplification_ft = 0.35
floor_offset_ft = 0.25

[[zones]]
name = "Manzanita (Hwy 1)"
closure_level = 7.2
warning_level = 6.9

[[zones]]
name = "Miller Avenue"
closure_level = 8.0
closure_label = "road blocked"
sub_thresholds = [{ label = "lot flooded", closure_level = 7.6 }]
"#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        let engine = config.engine().unwrap();
        assert_eq!(engine.profile.name, "king-tide-2025");
        assert!(matches!(
            engine.profile.model,
            CalibrationModel::SurgeDynamic(ref m) if m.surge_threshold_ft == 0.1
        ));
        assert_eq!(engine.zones.len(), 2);
        assert_eq!(engine.zones[0].warning_level, Some(6.9));
        assert_eq!(engine.zones[1].sub_thresholds[0].label, "lot flooded");
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let file = write_config("not = [valid");
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_preset_fails_fast() {
        let file = write_config("[calibration]\npreset = \"tuesday\"\n");
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::UnknownPreset(name)) if name == "tuesday"
        ));
    }

    #[test]
    fn test_preset_and_custom_conflict() {
        let file = write_config(
            r#"
[calibration]
preset = "fixed-0.4"

[calibration.custom]
name = "other"
model = { kind = "fixed_offset", offset_ft = 0.5 }
"#,
        );
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::AmbiguousCalibration)
        ));
    }

    #[test]
    fn test_unsorted_breakpoints_fail_fast() {
        let file = write_config(
            r#"
[calibration.custom]
name = "backwards"

[calibration.custom.model]
kind = "piecewise_linear"
points = [
    { upstream_ft = 7.8, local_ft = 8.2 },
    { upstream_ft = 6.9, local_ft = 7.2 },
]
"#,
        );
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Calibration(
                CalibrationError::UnsortedPoints { .. }
            ))
        ));
    }

    #[test]
    fn test_bad_zones_fail_fast() {
        let file = write_config(
            r#"
[[zones]]
name = "Manzanita (Hwy 1)"
closure_level = 7.2
warning_level = 7.4
"#,
        );
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Zone(ZoneError::WarningAboveClosure { .. }))
        ));

        let empty = write_config("zones = []\n");
        assert!(matches!(
            Config::load_from_path(empty.path()),
            Err(ConfigError::Zone(ZoneError::Empty))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let file = write_config("[poll]\ninterval_secs = 0\n");
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Invalid("poll.interval_secs", _))
        ));
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let file = write_config("[source]\ntrend_minutes = 200000000000000\n");
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Invalid("source.trend_minutes", _))
        ));

        let file = write_config("[poll]\nstale_after_secs = 9223372036854775807\n");
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Invalid("poll.stale_after_secs", _))
        ));

        let file = write_config("[source]\nsurge_window_minutes = 99999999999\n");
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Invalid("source.surge_window_minutes", _))
        ));
    }

    #[test]
    fn test_week_long_windows_accepted() {
        let file = write_config(
            "[source]\ntrend_minutes = 10080\nsurge_window_minutes = 10080\n\n[poll]\nstale_after_secs = 604800\n",
        );
        let config = Config::load_from_path(file.path()).unwrap();
        let settings = config.poll_settings();
        assert_eq!(settings.trend_window, chrono::Duration::days(7));
        assert_eq!(settings.surge_window, chrono::Duration::days(7));
        assert_eq!(config.stale_after(), chrono::Duration::days(7));
    }

    #[test]
    fn test_negative_surge_window_names_its_key() {
        let file = write_config("[source]\nsurge_window_minutes = -5\n");
        assert!(matches!(
            Config::load_from_path(file.path()),
            Err(ConfigError::Invalid("source.surge_window_minutes", _))
        ));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.source.station, config.source.station);
        assert_eq!(parsed.zones.0, config.zones.0);
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config = toml::from_str(include_str!("../flood-watch.example.toml")).unwrap();
        config.validate().unwrap();

        assert_eq!(config.engine().unwrap().profile.name, "surge-rain");
        assert_eq!(config.zones.0, default_zones());
    }
}
