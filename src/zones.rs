//! Zone risk classification.
//!
//! Compares an estimated local level against each road's closure elevation.
//! Boundary handling and the width of the warning band are policy, carried in
//! [`ClassifierPolicy`], because the field thresholds were written down with
//! both `>` and `>=` over the season.

use crate::InvalidReading;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flood status of a zone, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneState {
    Clear,
    Warning,
    Closed,
}

impl ZoneState {
    /// Headline wording used on the status board.
    pub fn label(&self) -> &'static str {
        match self {
            ZoneState::Clear => "PASSABLE",
            ZoneState::Warning => "AT RISK",
            ZoneState::Closed => "IMPASSABLE",
        }
    }
}

/// Whether a level exactly at the closure elevation closes the road.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureBoundary {
    /// `level >= closure` is closed.
    #[default]
    Inclusive,
    /// `level > closure` is closed.
    Exclusive,
}

fn default_warning_margin() -> f64 {
    0.5
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierPolicy {
    #[serde(default)]
    pub boundary: ClosureBoundary,
    /// Headroom (feet) below which a zone without an explicit warning level
    /// is at risk.
    #[serde(default = "default_warning_margin")]
    pub warning_margin: f64,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            boundary: ClosureBoundary::Inclusive,
            warning_margin: default_warning_margin(),
        }
    }
}

/// An extra closure elevation inside a compound zone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubThreshold {
    pub label: String,
    pub closure_level: f64,
    #[serde(default)]
    pub warning_level: Option<f64>,
}

fn default_closure_label() -> String {
    "road closed".to_string()
}

/// Static configuration for one monitored zone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneThreshold {
    pub name: String,
    pub closure_level: f64,
    #[serde(default)]
    pub warning_level: Option<f64>,
    /// Describes what `closure_level` means for compound zones.
    #[serde(default = "default_closure_label")]
    pub closure_label: String,
    #[serde(default)]
    pub sub_thresholds: Vec<SubThreshold>,
}

impl ZoneThreshold {
    pub fn new(name: &str, closure_level: f64) -> Self {
        Self {
            name: name.to_string(),
            closure_level,
            warning_level: None,
            closure_label: default_closure_label(),
            sub_thresholds: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ZoneError> {
        if self.name.trim().is_empty() {
            return Err(ZoneError::Unnamed);
        }
        check_levels(&self.name, self.closure_level, self.warning_level)?;
        for (i, sub) in self.sub_thresholds.iter().enumerate() {
            check_levels(&self.name, sub.closure_level, sub.warning_level)?;
            if sub.label.trim().is_empty() {
                return Err(ZoneError::UnlabeledSubThreshold(self.name.clone()));
            }
            // Labels identify the rows of `details`, which starts with the closure label.
            let taken = sub.label == self.closure_label
                || self.sub_thresholds[..i].iter().any(|s| s.label == sub.label);
            if taken {
                return Err(ZoneError::DuplicateLabel {
                    zone: self.name.clone(),
                    label: sub.label.clone(),
                });
            }
        }
        Ok(())
    }
}

fn check_levels(zone: &str, closure: f64, warning: Option<f64>) -> Result<(), ZoneError> {
    if !closure.is_finite() {
        return Err(ZoneError::NotFinite(zone.to_string()));
    }
    match warning {
        Some(w) if !w.is_finite() => Err(ZoneError::NotFinite(zone.to_string())),
        Some(w) if w >= closure => Err(ZoneError::WarningAboveClosure {
            zone: zone.to_string(),
            warning: w,
            closure,
        }),
        _ => Ok(()),
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZoneError {
    #[error("zone needs a name")]
    Unnamed,

    #[error("zone `{0}` has a non-finite threshold")]
    NotFinite(String),

    #[error("zone `{zone}` warning level {warning} ft must be below its closure level {closure} ft")]
    WarningAboveClosure {
        zone: String,
        warning: f64,
        closure: f64,
    },

    #[error("zone `{0}` is configured twice")]
    Duplicate(String),

    #[error("zone `{0}` has a sub-threshold without a label")]
    UnlabeledSubThreshold(String),

    #[error("zone `{zone}` uses the label `{label}` more than once")]
    DuplicateLabel { zone: String, label: String },

    #[error("no zones configured")]
    Empty,
}

/// Check a whole zone list: each zone valid, names unique, at least one zone.
pub fn validate_zones(zones: &[ZoneThreshold]) -> Result<(), ZoneError> {
    if zones.is_empty() {
        return Err(ZoneError::Empty);
    }
    for (i, zone) in zones.iter().enumerate() {
        zone.validate()?;
        if zones[..i].iter().any(|z| z.name == zone.name) {
            return Err(ZoneError::Duplicate(zone.name.clone()));
        }
    }
    Ok(())
}

/// Result for one threshold of a compound zone.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubStatus {
    pub label: String,
    pub state: ZoneState,
    pub headroom: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ZoneStatus {
    pub zone_name: String,
    pub state: ZoneState,
    pub estimated_level: f64,
    /// Feet until the nearest closure; zero or negative once closed.
    pub headroom: f64,
    /// Per-threshold results, only filled for compound zones.
    pub details: Vec<SubStatus>,
    /// Escalated by the rain override rather than by the level.
    pub overridden: bool,
}

impl ClassifierPolicy {
    fn state_for(&self, level: f64, closure: f64, warning: Option<f64>) -> (ZoneState, f64) {
        let headroom = closure - level;
        let above = |limit: f64| match self.boundary {
            ClosureBoundary::Inclusive => level >= limit,
            ClosureBoundary::Exclusive => level > limit,
        };

        let warned = match warning {
            Some(w) => above(w),
            None => headroom < self.warning_margin,
        };

        let state = if above(closure) {
            ZoneState::Closed
        } else if warned {
            ZoneState::Warning
        } else {
            ZoneState::Clear
        };
        (state, headroom)
    }

    fn classify_zone(&self, level: f64, zone: &ZoneThreshold) -> ZoneStatus {
        let (state, headroom) = self.state_for(level, zone.closure_level, zone.warning_level);

        if zone.sub_thresholds.is_empty() {
            return ZoneStatus {
                zone_name: zone.name.clone(),
                state,
                estimated_level: level,
                headroom,
                details: Vec::new(),
                overridden: false,
            };
        }

        let mut details = vec![SubStatus {
            label: zone.closure_label.clone(),
            state,
            headroom,
        }];
        details.extend(zone.sub_thresholds.iter().map(|sub| {
            let (state, headroom) = self.state_for(level, sub.closure_level, sub.warning_level);
            SubStatus {
                label: sub.label.clone(),
                state,
                headroom,
            }
        }));

        ZoneStatus {
            zone_name: zone.name.clone(),
            state: details.iter().map(|d| d.state).max().unwrap_or(state),
            estimated_level: level,
            headroom: details.iter().map(|d| d.headroom).fold(headroom, f64::min),
            details,
            overridden: false,
        }
    }

    /// Classify `level` against every zone, in configuration order.
    pub fn classify_zones(
        &self,
        level: f64,
        zones: &[ZoneThreshold],
    ) -> Result<Vec<ZoneStatus>, InvalidReading> {
        if !level.is_finite() {
            return Err(InvalidReading::NotFinite);
        }
        Ok(zones.iter().map(|z| self.classify_zone(level, z)).collect())
    }
}

/// [`ClassifierPolicy::classify_zones`] with the default policy (`>=` closes,
/// 0.5 ft warning band).
///
/// # Example
/// ```
/// use flood_watch_lib::zones::{classify_zones, ZoneState, ZoneThreshold};
///
/// let zones = vec![ZoneThreshold::new("Manzanita (Hwy 1)", 7.2)];
/// let statuses = classify_zones(7.2, &zones).unwrap();
/// assert_eq!(statuses[0].state, ZoneState::Closed);
/// ```
pub fn classify_zones(
    level: f64,
    zones: &[ZoneThreshold],
) -> Result<Vec<ZoneStatus>, InvalidReading> {
    ClassifierPolicy::default().classify_zones(level, zones)
}

/// Most severe state across zones; an empty list is clear.
pub fn overall_status(statuses: &[ZoneStatus]) -> ZoneState {
    statuses
        .iter()
        .map(|s| s.state)
        .max()
        .unwrap_or(ZoneState::Clear)
}

/// Raise every zone to at least `forced`. Never lowers a state.
pub fn apply_rain_override(statuses: &mut [ZoneStatus], forced: ZoneState) {
    for status in statuses.iter_mut().filter(|s| s.state < forced) {
        status.state = forced;
        status.overridden = true;
    }
}

/// The three roads the briefing has tracked since the first king tide.
pub fn default_zones() -> Vec<ZoneThreshold> {
    vec![
        ZoneThreshold::new("Manzanita (Hwy 1)", 7.2),
        ZoneThreshold {
            closure_label: "road blocked".to_string(),
            sub_thresholds: vec![SubThreshold {
                label: "lot flooded".to_string(),
                closure_level: 7.6,
                warning_level: None,
            }],
            ..ZoneThreshold::new("Miller Avenue", 8.0)
        },
        ZoneThreshold::new("Lucky Drive & Hwy 101", 8.2),
    ]
}
