//! # Poll Pipeline
//!
//! One poll is: fetch → estimate → classify → briefing. Polls are independent;
//! the only thing kept between them is the [`StatusBoard`], which belongs to
//! the scheduler and holds the single most recent good briefing.
//!
//! ## Degradation
//!
//! - Latest reading fails → the whole poll fails, the board keeps the old briefing
//! - Trend window fails → rise rate is reported as unknown
//! - Prediction fails → no surge term and no next-high-tide forecast
//! - Any number fails validation → the poll fails; no partial briefing is shown
//!
//! The surge term compares the reading with the predicted high nearest to it,
//! before or after, as long as that high is inside the surge window. The
//! forecast is always the first high still to come.

use crate::calibration::CalibrationProfile;
use crate::estimator::{estimate, EstimateContext, LocalEstimate};
use crate::tide_data::{FetchError, LevelSource};
use crate::zones::{
    apply_rain_override, overall_status, ClassifierPolicy, ZoneState, ZoneStatus, ZoneThreshold,
};
use crate::{InvalidReading, Prediction, PredictionKind, Reading, TrendDirection};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Calibration, zones and classifier policy, fixed at startup.
#[derive(Clone, Debug)]
pub struct Engine {
    pub profile: CalibrationProfile,
    pub zones: Vec<ZoneThreshold>,
    pub policy: ClassifierPolicy,
}

/// Estimate plus the zone verdicts derived from it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Assessment {
    pub estimate: LocalEstimate,
    pub zones: Vec<ZoneStatus>,
    pub overall: ZoneState,
}

impl Engine {
    /// Estimate and classify one upstream level. Pure.
    pub fn assess(&self, remote: f64, ctx: &EstimateContext) -> Result<Assessment, InvalidReading> {
        let estimate = estimate(remote, &self.profile, ctx)?;
        let mut zones = self.policy.classify_zones(estimate.local_ft, &self.zones)?;

        if estimate.rain_override {
            if let Some(rain) = &self.profile.rain_override {
                apply_rain_override(&mut zones, rain.forced_state);
            }
        }

        Ok(Assessment {
            overall: overall_status(&zones),
            estimate,
            zones,
        })
    }
}

/// What the next predicted high tide would mean locally.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Forecast {
    pub prediction: Prediction,
    #[serde(flatten)]
    pub assessment: Assessment,
}

/// Everything one successful poll produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Briefing {
    pub reading: Reading,
    pub profile: String,
    /// Feet over the trend window; `None` when unknown.
    pub rise_rate_ft: Option<f64>,
    pub trend: Option<TrendDirection>,
    #[serde(flatten)]
    pub current: Assessment,
    pub forecast: Option<Forecast>,
    pub generated_at: DateTime<Utc>,
}

/// Per-poll knobs that come from configuration or the command line.
#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub trend_window: Duration,
    /// A prediction this close to the reading is used for the surge anomaly.
    pub surge_window: Duration,
    pub rain_advisory: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            trend_window: Duration::minutes(60),
            surge_window: Duration::minutes(90),
            rain_advisory: false,
        }
    }
}

/// The predicted high closest to `at`, if one lies within `window` of it.
pub fn surge_reference(
    highs: &[Prediction],
    at: DateTime<Utc>,
    window: Duration,
) -> Option<Prediction> {
    let gap = |p: &Prediction| (p.timestamp - at).num_seconds().abs();
    highs
        .iter()
        .filter(|p| p.kind == PredictionKind::High)
        .filter(|p| gap(p) <= window.num_seconds())
        .min_by_key(|p| gap(p))
        .copied()
}

/// First predicted high strictly after `now`.
pub fn next_high(highs: &[Prediction], now: DateTime<Utc>) -> Option<Prediction> {
    highs
        .iter()
        .filter(|p| p.kind == PredictionKind::High && p.timestamp > now)
        .min_by_key(|p| p.timestamp)
        .copied()
}

/// Run one poll against `source`.
///
/// # Errors
/// Fails when the latest reading cannot be fetched or any number on the path
/// to a verdict is invalid. Trend and prediction failures only degrade the
/// briefing.
pub async fn poll_once<S: LevelSource>(
    source: &S,
    engine: &Engine,
    settings: &PollSettings,
    now: DateTime<Utc>,
) -> Result<Briefing, FetchError> {
    let reading = source.fetch_latest_reading().await?;

    let trend = match source.fetch_trend_window(settings.trend_window).await {
        Ok(window) => Some(window),
        Err(err) => {
            warn!(error = %err, "trend window unavailable, rise rate unknown");
            None
        }
    };

    // Reach back far enough to find a peak that has just passed.
    let since = reading.timestamp().min(now) - settings.surge_window;
    let highs = match source.fetch_high_tides(since).await {
        Ok(highs) => highs,
        Err(err) => {
            warn!(error = %err, "tide prediction unavailable, surge treated as zero");
            Vec::new()
        }
    };

    let reference = surge_reference(&highs, reading.timestamp(), settings.surge_window);
    if reference.is_none() && !highs.is_empty() {
        debug!("no high tide within the surge window");
    }
    let prediction = next_high(&highs, now);

    let current = engine.assess(
        reading.value_ft(),
        &EstimateContext {
            predicted: reference.map(|p| p.value_ft),
            rain_advisory: settings.rain_advisory,
        },
    )?;

    let forecast = match prediction {
        Some(prediction) => Some(Forecast {
            assessment: engine.assess(
                prediction.value_ft,
                &EstimateContext {
                    predicted: Some(prediction.value_ft),
                    rain_advisory: settings.rain_advisory,
                },
            )?,
            prediction,
        }),
        None => None,
    };

    let rise_rate_ft = trend.as_ref().and_then(|t| t.rise_rate());
    let direction = trend.as_ref().and_then(|t| t.direction());

    info!(
        remote_ft = reading.value_ft(),
        local_ft = current.estimate.local_ft,
        overall = current.overall.label(),
        rise_rate_ft = ?rise_rate_ft,
        "poll complete"
    );

    Ok(Briefing {
        reading,
        profile: engine.profile.name.clone(),
        rise_rate_ft,
        trend: direction,
        current,
        forecast,
        generated_at: now,
    })
}

/// Last known good briefing, owned by the scheduler.
#[derive(Debug, Default)]
pub struct StatusBoard {
    last_good: Option<Briefing>,
    last_failure: Option<(DateTime<Utc>, String)>,
}

/// What the display should show right now.
#[derive(Debug, Serialize)]
pub struct BoardView<'a> {
    pub briefing: Option<&'a Briefing>,
    pub stale: bool,
    pub notice: Option<String>,
}

impl StatusBoard {
    pub fn record_success(&mut self, briefing: Briefing) {
        self.last_good = Some(briefing);
        self.last_failure = None;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: &FetchError) {
        self.last_failure = Some((at, error.to_string()));
    }

    pub fn last_good(&self) -> Option<&Briefing> {
        self.last_good.as_ref()
    }

    /// The briefing is stale when the last poll failed or its reading is older
    /// than `stale_after`.
    pub fn view(&self, now: DateTime<Utc>, stale_after: Duration) -> BoardView<'_> {
        let briefing = self.last_good.as_ref();
        let too_old = briefing.is_some_and(|b| now - b.reading.timestamp() > stale_after);

        let notice = match (&self.last_failure, briefing) {
            (Some((at, err)), Some(_)) => Some(format!(
                "could not refresh at {}: {err}; showing last good reading",
                at.format("%H:%M UTC")
            )),
            (Some((_, err)), None) => Some(format!("data unavailable: {err}")),
            (None, None) => Some("data unavailable: no reading yet".to_string()),
            (None, Some(b)) if too_old => Some(format!(
                "reading from {} is out of date",
                b.reading.timestamp().format("%H:%M UTC")
            )),
            (None, Some(_)) => None,
        };

        BoardView {
            briefing,
            stale: self.last_failure.is_some() || too_old,
            notice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::preset;
    use crate::zones::default_zones;
    use chrono::TimeZone;

    fn engine(preset_name: &str) -> Engine {
        Engine {
            profile: preset(preset_name).unwrap(),
            zones: default_zones(),
            policy: ClassifierPolicy::default(),
        }
    }

    #[test]
    fn test_assess_stress_test() {
        let assessment = engine("surge-dynamic")
            .assess(
                7.126,
                &EstimateContext {
                    predicted: Some(6.8),
                    rain_advisory: false,
                },
            )
            .unwrap();
        assert!((assessment.estimate.local_ft - 7.802).abs() < 1e-9);
        assert_eq!(assessment.zones[0].state, ZoneState::Closed);
        assert_eq!(assessment.overall, ZoneState::Closed);
    }

    #[test]
    fn test_assess_applies_rain_override() {
        let wet = EstimateContext {
            predicted: None,
            rain_advisory: true,
        };
        let dry = engine("surge-dynamic").assess(5.8, &wet).unwrap();
        assert_eq!(dry.overall, ZoneState::Clear);

        let rainy = engine("surge-rain").assess(5.8, &wet).unwrap();
        assert_eq!(rainy.overall, ZoneState::Warning);
        assert!(rainy.zones.iter().all(|z| z.overridden));
        assert_eq!(rainy.estimate.local_ft, dry.estimate.local_ft);
    }

    #[test]
    fn test_assess_rejects_invalid_level() {
        assert!(engine("fixed-0.4")
            .assess(f64::NAN, &EstimateContext::default())
            .is_err());
    }

    fn high(h: u32, m: u32, value_ft: f64) -> Prediction {
        Prediction {
            value_ft,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 4, h, m, 0).unwrap(),
            kind: PredictionKind::High,
        }
    }

    #[test]
    fn test_surge_reference_picks_nearest_high() {
        let highs = [high(4, 10, 6.1), high(16, 24, 6.8)];
        let window = Duration::minutes(90);
        let at = |h, m| Utc.with_ymd_and_hms(2025, 1, 4, h, m, 0).unwrap();

        // Just after the peak still compares against it.
        assert_eq!(surge_reference(&highs, at(16, 36), window), Some(highs[1]));
        assert_eq!(surge_reference(&highs, at(15, 0), window), Some(highs[1]));
        assert_eq!(surge_reference(&highs, at(5, 0), window), Some(highs[0]));
        assert_eq!(surge_reference(&highs, at(10, 0), window), None);
        assert_eq!(surge_reference(&[], at(16, 36), window), None);
    }

    #[test]
    fn test_next_high_skips_passed_peaks() {
        let highs = [high(4, 10, 6.1), high(16, 24, 6.8)];
        let at = |h, m| Utc.with_ymd_and_hms(2025, 1, 4, h, m, 0).unwrap();

        assert_eq!(next_high(&highs, at(9, 0)), Some(highs[1]));
        assert_eq!(next_high(&highs, at(16, 24)), None);
    }

    #[test]
    fn test_board_starts_unavailable() {
        let board = StatusBoard::default();
        let now = Utc.with_ymd_and_hms(2025, 1, 4, 16, 10, 0).unwrap();
        let view = board.view(now, Duration::minutes(15));
        assert!(view.briefing.is_none());
        assert!(!view.stale);
        assert!(view.notice.unwrap().starts_with("data unavailable"));
    }

    #[test]
    fn test_board_failure_without_history() {
        let mut board = StatusBoard::default();
        let now = Utc.with_ymd_and_hms(2025, 1, 4, 16, 10, 0).unwrap();
        board.record_failure(now, &FetchError::Scrape);
        let view = board.view(now, Duration::minutes(15));
        assert!(view.briefing.is_none());
        assert!(view.stale);
        assert!(view.notice.unwrap().contains("scrape failed"));
    }
}
