//! # Flood Watch Core Library
//!
//! This library turns a San Francisco Bay water-level reading into an estimated
//! Mill Valley water level and a per-road flood status. It is the engine behind
//! the `flood-watch` binary, which owns polling and the last-known-good display.
//!
//! ## Design Philosophy
//!
//! ### Pure engine, thin I/O
//! - **Estimator and classifier are pure**: same inputs, same outputs, no logging,
//!   no network, no caching
//! - **Validated at the edge**: every upstream number passes through
//!   [`Reading::new`] (or [`Reading::parse`]) before it can reach the estimator
//! - **Calibration is data**: each historical tuning of the conversion formula is
//!   a named preset of [`calibration::CalibrationModel`], not a code fork
//!
//! ### Data Flow
//! 1. **Fetch**: NOAA CO-OPS JSON or the OneRain sensor page → [`Reading`]
//! 2. **Estimate**: remote level + calibration → local Mill Valley level
//! 3. **Classify**: local level vs. zone thresholds → Clear / Warning / Closed
//! 4. **Display**: the scheduler keeps the last good briefing and flags staleness
//!
//! ## Core Types
//!
//! - [`Reading`]: one validated water-level observation in feet (MLLW)
//! - [`TrendWindow`]: recent readings used for the rise/fall rate
//! - [`Prediction`]: a NOAA high/low tide forecast point

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod calibration;
pub mod config;
pub mod estimator;
pub mod monitor;
pub mod renderer;
pub mod tide_data;
pub mod zones;

/// Lowest gauge value (feet, MLLW) accepted as a physical reading.
pub const MIN_PLAUSIBLE_FT: f64 = 0.0;

/// Highest gauge value (feet, MLLW) accepted as a physical reading.
///
/// The San Francisco record is a little over 9 ft; anything above this is a
/// decoding problem, not water.
pub const MAX_PLAUSIBLE_FT: f64 = 15.0;

/// A water-level number that must not reach the estimator or classifier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidReading {
    #[error("water level is not a finite number")]
    NotFinite,

    #[error("water level {value} ft is outside the plausible gauge range {min}..={max} ft")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("water level {0:?} is not a number")]
    Unparseable(String),
}

/// Check that `value` is a usable gauge level in feet.
pub fn validate_level(value: f64) -> Result<f64, InvalidReading> {
    if !value.is_finite() {
        return Err(InvalidReading::NotFinite);
    }
    if !(MIN_PLAUSIBLE_FT..=MAX_PLAUSIBLE_FT).contains(&value) {
        return Err(InvalidReading::OutOfRange {
            value,
            min: MIN_PLAUSIBLE_FT,
            max: MAX_PLAUSIBLE_FT,
        });
    }
    Ok(value)
}

/// Where a reading came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    /// NOAA CO-OPS tide gauge (San Francisco, 9414290)
    TideGauge,
    /// Scraped OneRain sensor page (Tam Valley)
    SensorScrape,
}

/// A single validated water-level observation.
///
/// Fields are private so a `Reading` can only exist once its value has passed
/// [`validate_level`].
///
/// # Example
/// ```
/// use chrono::Utc;
/// use flood_watch_lib::{Reading, ReadingSource};
///
/// let reading = Reading::parse("6.123", Utc::now(), ReadingSource::TideGauge).unwrap();
/// assert!((reading.value_ft() - 6.123).abs() < 1e-9);
///
/// assert!(Reading::new(f64::NAN, Utc::now(), ReadingSource::TideGauge).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Reading {
    value_ft: f64,
    timestamp: DateTime<Utc>,
    source: ReadingSource,
}

impl Reading {
    pub fn new(
        value_ft: f64,
        timestamp: DateTime<Utc>,
        source: ReadingSource,
    ) -> Result<Self, InvalidReading> {
        Ok(Self {
            value_ft: validate_level(value_ft)?,
            timestamp,
            source,
        })
    }

    /// Build a reading from a string-encoded value such as NOAA's `"v": "6.123"`.
    pub fn parse(
        raw: &str,
        timestamp: DateTime<Utc>,
        source: ReadingSource,
    ) -> Result<Self, InvalidReading> {
        let value = raw
            .trim()
            .parse::<f64>()
            .map_err(|_| InvalidReading::Unparseable(raw.to_string()))?;
        Self::new(value, timestamp, source)
    }

    pub fn value_ft(&self) -> f64 {
        self.value_ft
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> ReadingSource {
        self.source
    }
}

/// Rise/fall rates smaller than this (feet over the window) count as steady.
pub const STEADY_BAND_FT: f64 = 0.05;

/// Direction of the water over a [`TrendWindow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Steady,
}

/// Recent readings, oldest first.
///
/// Fetched fresh on every poll; nothing accumulates across polls.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrendWindow {
    pub readings: Vec<Reading>,
}

impl TrendWindow {
    /// Sorts by timestamp so callers can pass readings in any order.
    pub fn new(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|r| r.timestamp());
        Self { readings }
    }

    /// Change in feet from the first to the last reading.
    ///
    /// `None` means unknown (fewer than two readings), which is not the same
    /// as a flat tide.
    pub fn rise_rate(&self) -> Option<f64> {
        match (self.readings.first(), self.readings.last()) {
            (Some(first), Some(last)) if self.readings.len() >= 2 => {
                Some(last.value_ft() - first.value_ft())
            }
            _ => None,
        }
    }

    pub fn direction(&self) -> Option<TrendDirection> {
        self.rise_rate().map(|rate| {
            if rate.abs() < STEADY_BAND_FT {
                TrendDirection::Steady
            } else if rate > 0.0 {
                TrendDirection::Rising
            } else {
                TrendDirection::Falling
            }
        })
    }
}

/// High or low water.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionKind {
    #[serde(rename = "H")]
    High,
    #[serde(rename = "L")]
    Low,
}

/// A tide-table forecast point from NOAA's `interval=hilo` predictions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub value_ft: f64,
    pub timestamp: DateTime<Utc>,
    pub kind: PredictionKind,
}
