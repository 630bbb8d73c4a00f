//! # Briefing Output
//!
//! Turns a [`BoardView`] into the terminal status board, and a single upstream
//! fetch into the small JSON body the old serverless proxy returned.

use crate::monitor::{Assessment, BoardView, Briefing};
use crate::tide_data::FetchError;
use crate::zones::ZoneState;
use crate::{Reading, ReadingSource, TrendDirection};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

/// Status icon for a zone state
fn state_icon(state: ZoneState) -> &'static str {
    match state {
        ZoneState::Clear => "✅",
        ZoneState::Warning => "⚠️",
        ZoneState::Closed => "🚫",
    }
}

/// One-line explanation under a zone name
fn describe(state: ZoneState, level: f64, headroom: f64) -> String {
    match state {
        ZoneState::Closed => format!("CLOSED - water at {level:.2} ft"),
        ZoneState::Warning => format!("At risk - {headroom:.2} ft until closure"),
        ZoneState::Clear => format!("Safe - {headroom:.2} ft clearance"),
    }
}

fn format_rate(rate: Option<f64>, trend: Option<TrendDirection>) -> String {
    match (rate, trend) {
        (Some(rate), Some(TrendDirection::Rising)) => format!("rising {rate:+.2} ft"),
        (Some(rate), Some(TrendDirection::Falling)) => format!("falling {rate:+.2} ft"),
        (Some(_), _) => "steady".to_string(),
        _ => "trend unknown".to_string(),
    }
}

fn source_name(source: ReadingSource) -> &'static str {
    match source {
        ReadingSource::TideGauge => "NOAA San Francisco",
        ReadingSource::SensorScrape => "Tam Valley (OneRain)",
    }
}

fn write_zones(out: &mut String, assessment: &Assessment) {
    for zone in &assessment.zones {
        let _ = writeln!(
            out,
            "  {} {:<11} {:<24} {}{}",
            state_icon(zone.state),
            zone.state.label(),
            zone.zone_name,
            describe(zone.state, zone.estimated_level, zone.headroom),
            if zone.overridden { " (rain advisory)" } else { "" }
        );
        for detail in &zone.details {
            let _ = writeln!(
                out,
                "      - {}: {} ({:+.2} ft)",
                detail.label,
                detail.state.label(),
                detail.headroom
            );
        }
    }
}

fn write_briefing(out: &mut String, briefing: &Briefing) {
    let current = &briefing.current;
    let _ = writeln!(
        out,
        "{} (now):    {:.2} ft  [{}]",
        source_name(briefing.reading.source()),
        current.estimate.remote_ft,
        briefing.reading.timestamp().format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(
        out,
        "Mill Valley (est.): {:.2} ft  (+{:.2} ft, {})",
        current.estimate.local_ft, current.estimate.offset_ft, briefing.profile
    );
    if let Some(surge) = current.estimate.surge_ft {
        let _ = writeln!(out, "Surge anomaly:      {surge:+.2} ft");
    }
    let _ = writeln!(
        out,
        "Trend:              {}",
        format_rate(briefing.rise_rate_ft, briefing.trend)
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Overall: {} {}",
        state_icon(current.overall),
        current.overall.label()
    );
    write_zones(out, current);

    if let Some(forecast) = &briefing.forecast {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Next high tide {}: {:.2} ft SF = {:.2} ft Mill Valley",
            forecast.prediction.timestamp.format("%H:%M UTC"),
            forecast.prediction.value_ft,
            forecast.assessment.estimate.local_ft
        );
        write_zones(out, &forecast.assessment);
    }
}

/// Render the board as plain text.
pub fn render_text(view: &BoardView<'_>) -> String {
    let mut out = String::from("🌊 Mill Valley Flood Watch\n\n");

    if let Some(notice) = &view.notice {
        let marker = if view.stale { "⚠ STALE: " } else { "" };
        let _ = writeln!(out, "{marker}{notice}\n");
    }

    match view.briefing {
        Some(briefing) => write_briefing(&mut out, briefing),
        None => out.push_str("Mill Valley (est.): -- ft\n"),
    }
    out
}

/// Print the board to stdout.
pub fn draw_ascii(view: &BoardView<'_>) {
    print!("{}", render_text(view));
}

/// JSON body for a single upstream fetch, in the shape front ends already
/// consume (`success`, `waterLevel`, `timestamp`, `source`, `unit`, `error`).
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_level: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SensorReport {
    pub fn from_result(result: &Result<Reading, FetchError>, now: DateTime<Utc>) -> Self {
        match result {
            Ok(reading) => Self {
                success: true,
                water_level: Some(reading.value_ft()),
                timestamp: reading.timestamp(),
                source: Some(source_name(reading.source())),
                unit: Some("ft"),
                error: None,
            },
            Err(err) => Self {
                success: false,
                water_level: None,
                timestamp: now,
                source: None,
                unit: None,
                error: Some(err.to_string()),
            },
        }
    }
}
