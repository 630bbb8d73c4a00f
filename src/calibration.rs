//! # Calibration Models
//!
//! A calibration decides how a San Francisco gauge reading maps to a Mill Valley
//! level. Each variant the field notes produced over the winter is kept here as
//! data: a [`CalibrationModel`] strategy wrapped in a named, versioned
//! [`CalibrationProfile`].
//!
//! ## Strategies
//!
//! | Kind                | Offset added to the remote reading                         |
//! |---------------------|------------------------------------------------------------|
//! | `fixed_offset`      | constant `K`                                               |
//! | `piecewise_linear`  | offset `yᵢ − xᵢ` interpolated between calibration points   |
//! | `surge_dynamic`     | `base + max(surge above threshold, floor)`                 |
//!
//! Profiles are validated once, when configuration loads. The estimator assumes
//! a validated model and never re-checks it per poll.

use crate::estimator::EstimateContext;
use crate::zones::ZoneState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with a calibration that must stop startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("calibration constant `{0}` must be a finite number")]
    NotFinite(&'static str),

    #[error("calibration constant `{0}` must not be negative")]
    Negative(&'static str),

    #[error("piecewise calibration needs at least one point")]
    NoPoints,

    #[error("calibration points must be sorted by upstream level without duplicates (point {index})")]
    UnsortedPoints { index: usize },

    #[error("calibration points must not lower the local level as the upstream level rises (point {index})")]
    NonMonotonic { index: usize },

    #[error("calibration profile needs a name")]
    Unnamed,
}

/// Strategy interface shared by every calibration variant.
pub trait OffsetModel {
    /// Feet to add to `remote` to get the local estimate.
    fn offset(&self, remote: f64, ctx: &EstimateContext) -> f64;

    /// Surge anomaly used by the model, when it uses one.
    fn surge(&self, _remote: f64, _ctx: &EstimateContext) -> Option<f64> {
        None
    }
}

/// `local = remote + offset_ft`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedOffset {
    pub offset_ft: f64,
}

impl OffsetModel for FixedOffset {
    fn offset(&self, _remote: f64, _ctx: &EstimateContext) -> f64 {
        self.offset_ft
    }
}

/// An observed (upstream, local) pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub upstream_ft: f64,
    pub local_ft: f64,
}

impl CalibrationPoint {
    pub fn offset(&self) -> f64 {
        self.local_ft - self.upstream_ft
    }
}

/// Interpolates the offset (not the level) between calibration points and
/// holds the end offsets outside the observed range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseLinear {
    pub points: Vec<CalibrationPoint>,
}

impl OffsetModel for PiecewiseLinear {
    fn offset(&self, remote: f64, _ctx: &EstimateContext) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };

        if remote <= first.upstream_ft {
            return first.offset();
        }
        if remote >= last.upstream_ft {
            return last.offset();
        }

        self.points
            .windows(2)
            .find(|w| remote <= w[1].upstream_ft)
            .map(|w| {
                let (p0, p1) = (&w[0], &w[1]);
                let alpha = (remote - p0.upstream_ft) / (p1.upstream_ft - p0.upstream_ft);
                p0.offset() + alpha * (p1.offset() - p0.offset())
            })
            .unwrap_or_else(|| last.offset())
    }
}

fn default_surge_threshold() -> f64 {
    0.1
}

/// Base amplification plus a storm-surge term that never drops below a floor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicOffset {
    pub base_amplification_ft: f64,
    pub floor_offset_ft: f64,
    /// Surges at or below this are treated as tide-table noise.
    #[serde(default = "default_surge_threshold")]
    pub surge_threshold_ft: f64,
}

impl OffsetModel for DynamicOffset {
    fn offset(&self, remote: f64, ctx: &EstimateContext) -> f64 {
        let surge = self.surge(remote, ctx).unwrap_or(0.0);
        let counted = if surge > self.surge_threshold_ft {
            surge
        } else {
            0.0
        };
        self.base_amplification_ft + counted.max(self.floor_offset_ft)
    }

    fn surge(&self, remote: f64, ctx: &EstimateContext) -> Option<f64> {
        Some(ctx.predicted.map_or(0.0, |predicted| remote - predicted))
    }
}

/// The strategy a profile uses, selected by `kind` in configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationModel {
    FixedOffset(FixedOffset),
    PiecewiseLinear(PiecewiseLinear),
    SurgeDynamic(DynamicOffset),
}

impl CalibrationModel {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        match self {
            CalibrationModel::FixedOffset(m) => finite("offset_ft", m.offset_ft),
            CalibrationModel::PiecewiseLinear(m) => validate_points(&m.points),
            CalibrationModel::SurgeDynamic(m) => {
                finite("base_amplification_ft", m.base_amplification_ft)?;
                non_negative("floor_offset_ft", m.floor_offset_ft)?;
                non_negative("surge_threshold_ft", m.surge_threshold_ft)
            }
        }
    }

    fn as_offset_model(&self) -> &dyn OffsetModel {
        match self {
            CalibrationModel::FixedOffset(m) => m,
            CalibrationModel::PiecewiseLinear(m) => m,
            CalibrationModel::SurgeDynamic(m) => m,
        }
    }
}

impl OffsetModel for CalibrationModel {
    fn offset(&self, remote: f64, ctx: &EstimateContext) -> f64 {
        self.as_offset_model().offset(remote, ctx)
    }

    fn surge(&self, remote: f64, ctx: &EstimateContext) -> Option<f64> {
        self.as_offset_model().surge(remote, ctx)
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), CalibrationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CalibrationError::NotFinite(name))
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), CalibrationError> {
    finite(name, value)?;
    if value < 0.0 {
        return Err(CalibrationError::Negative(name));
    }
    Ok(())
}

fn validate_points(points: &[CalibrationPoint]) -> Result<(), CalibrationError> {
    if points.is_empty() {
        return Err(CalibrationError::NoPoints);
    }
    for point in points {
        finite("upstream_ft", point.upstream_ft)?;
        finite("local_ft", point.local_ft)?;
    }
    for (i, w) in points.windows(2).enumerate() {
        if w[1].upstream_ft <= w[0].upstream_ft {
            return Err(CalibrationError::UnsortedPoints { index: i + 1 });
        }
        if w[1].local_ft < w[0].local_ft {
            return Err(CalibrationError::NonMonotonic { index: i + 1 });
        }
    }
    Ok(())
}

/// Which level the rain override compares against its trigger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RainCompare {
    #[default]
    Remote,
    Local,
}

fn default_rain_trigger() -> f64 {
    5.5
}

fn default_forced_state() -> ZoneState {
    ZoneState::Warning
}

/// During a rain advisory, creek runoff backs up behind the tide: above the
/// trigger level every zone is shown at least at `forced_state`, whatever the
/// arithmetic says.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RainOverride {
    #[serde(default = "default_rain_trigger")]
    pub trigger_level_ft: f64,
    #[serde(default)]
    pub compare: RainCompare,
    #[serde(default = "default_forced_state")]
    pub forced_state: ZoneState,
}

impl Default for RainOverride {
    fn default() -> Self {
        Self {
            trigger_level_ft: default_rain_trigger(),
            compare: RainCompare::Remote,
            forced_state: default_forced_state(),
        }
    }
}

impl RainOverride {
    pub fn triggered(&self, remote: f64, local: f64, rain_advisory: bool) -> bool {
        let level = match self.compare {
            RainCompare::Remote => remote,
            RainCompare::Local => local,
        };
        rain_advisory && level >= self.trigger_level_ft
    }
}

/// A named, versioned calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub model: CalibrationModel,
    #[serde(default)]
    pub rain_override: Option<RainOverride>,
}

fn default_version() -> u32 {
    1
}

impl CalibrationProfile {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.name.trim().is_empty() {
            return Err(CalibrationError::Unnamed);
        }
        self.model.validate()?;
        if let Some(rain) = &self.rain_override {
            finite("trigger_level_ft", rain.trigger_level_ft)?;
        }
        Ok(())
    }
}

/// Names accepted by [`preset`].
pub const PRESET_NAMES: &[&str] = &["fixed-0.4", "piecewise-2pt", "surge-dynamic", "surge-rain"];

/// Look up one of the historical calibrations by name.
///
/// # Example
/// ```
/// use flood_watch_lib::calibration::preset;
///
/// let profile = preset("piecewise-2pt").unwrap();
/// assert!(profile.validate().is_ok());
/// assert!(preset("made-up").is_none());
/// ```
pub fn preset(name: &str) -> Option<CalibrationProfile> {
    let surge = DynamicOffset {
        base_amplification_ft: 0.35,
        floor_offset_ft: 0.25,
        surge_threshold_ft: 0.1,
    };

    let profile = match name {
        "fixed-0.4" => CalibrationProfile {
            name: name.to_string(),
            version: 1,
            model: CalibrationModel::FixedOffset(FixedOffset { offset_ft: 0.4 }),
            rain_override: None,
        },
        "piecewise-2pt" => CalibrationProfile {
            name: name.to_string(),
            version: 2,
            model: CalibrationModel::PiecewiseLinear(PiecewiseLinear {
                points: vec![
                    CalibrationPoint {
                        upstream_ft: 6.9,
                        local_ft: 7.2,
                    },
                    CalibrationPoint {
                        upstream_ft: 7.8,
                        local_ft: 8.2,
                    },
                ],
            }),
            rain_override: None,
        },
        "surge-dynamic" => CalibrationProfile {
            name: name.to_string(),
            version: 3,
            model: CalibrationModel::SurgeDynamic(surge),
            rain_override: None,
        },
        "surge-rain" => CalibrationProfile {
            name: name.to_string(),
            version: 4,
            model: CalibrationModel::SurgeDynamic(surge),
            rain_override: Some(RainOverride::default()),
        },
        _ => return None,
    };
    Some(profile)
}
