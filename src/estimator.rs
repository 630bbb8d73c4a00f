//! # Local Level Estimator
//!
//! Converts an upstream gauge reading into an estimated Mill Valley water level.
//! Everything here is a pure function of its arguments; callers own fetching,
//! retries, and any memory of previous polls.

use crate::calibration::{CalibrationModel, CalibrationProfile, OffsetModel};
use crate::{validate_level, InvalidReading};
use serde::Serialize;

/// Optional signals that some calibrations use.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EstimateContext {
    /// Tide-table level for (about) the same time as the reading.
    pub predicted: Option<f64>,
    /// A rain advisory is in effect for Marin.
    pub rain_advisory: bool,
}

/// Result of one estimation, kept together so the display can explain itself.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LocalEstimate {
    pub remote_ft: f64,
    pub local_ft: f64,
    pub offset_ft: f64,
    /// Surge anomaly, when the model uses one.
    pub surge_ft: Option<f64>,
    /// The profile's rain override fired; zones must be escalated.
    pub rain_override: bool,
}

/// Estimate the local level for `remote` with a bare model.
///
/// # Errors
/// [`InvalidReading`] when `remote` (or a supplied prediction) is not finite or
/// is outside the plausible gauge range.
///
/// # Example
/// ```
/// use flood_watch_lib::calibration::preset;
/// use flood_watch_lib::estimator::{estimate_local_level, EstimateContext};
///
/// let model = preset("piecewise-2pt").unwrap().model;
/// let local = estimate_local_level(7.35, &model, &EstimateContext::default()).unwrap();
/// assert!((local - 7.7).abs() < 1e-9);
/// ```
pub fn estimate_local_level(
    remote: f64,
    model: &CalibrationModel,
    ctx: &EstimateContext,
) -> Result<f64, InvalidReading> {
    check_inputs(remote, ctx)?;
    Ok(remote + model.offset(remote, ctx))
}

/// Estimate with a full profile, including the rain override flag.
pub fn estimate(
    remote: f64,
    profile: &CalibrationProfile,
    ctx: &EstimateContext,
) -> Result<LocalEstimate, InvalidReading> {
    check_inputs(remote, ctx)?;

    let offset_ft = profile.model.offset(remote, ctx);
    let local_ft = remote + offset_ft;
    let rain_override = profile
        .rain_override
        .as_ref()
        .is_some_and(|rain| rain.triggered(remote, local_ft, ctx.rain_advisory));

    Ok(LocalEstimate {
        remote_ft: remote,
        local_ft,
        offset_ft,
        surge_ft: profile.model.surge(remote, ctx),
        rain_override,
    })
}

fn check_inputs(remote: f64, ctx: &EstimateContext) -> Result<(), InvalidReading> {
    validate_level(remote)?;
    if let Some(predicted) = ctx.predicted {
        validate_level(predicted)?;
    }
    Ok(())
}
