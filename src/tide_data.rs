//! # Water-Level Sources
//!
//! This module fetches the upstream readings the engine works from. It is the
//! only place that talks to the network; everything it returns has already
//! passed [`Reading`] validation.
//!
//! ## Data Sources
//!
//! ### NOAA CO-OPS data API
//! - **URL**: https://api.tidesandcurrents.noaa.gov/api/prod/datagetter
//! - **Station**: 9414290 (San Francisco) - configurable
//! - **Format**: JSON, `data: [{t, v}]` for observations and
//!   `predictions: [{t, v, type}]` for hi/lo forecasts, values string-encoded
//! - **Time zone**: requested as `gmt`, so every `t` is parsed as UTC
//!
//! ### OneRain sensor page (Tam Valley)
//! - **Format**: HTML; the current stage is the first `<number> ft` in the page
//! - **Limits**: no history and no predictions
//!
//! ## Error Handling
//!
//! Each fetch fails on its own. A missing trend window or prediction does not
//! stop the caller from producing a basic estimate; see `monitor::poll_once`.
//! All errors propagate through [`FetchError`].

use crate::{InvalidReading, Prediction, PredictionKind, Reading, ReadingSource, TrendWindow};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use scraper::Html;
use serde::Deserialize;
use std::future::Future;
use thiserror::Error;

/// NOAA CO-OPS data getter endpoint.
pub const NOAA_BASE_URL: &str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";

/// Tam Valley sensor page on Marin County's OneRain portal.
pub const ONERAIN_SENSOR_URL: &str = "https://marin.onerain.com/sensor/?time_zone=US%2FPacific&site_id=8689&site=46602a15-53c4-4e20-bdd2-8a95d9372f09&device_id=1&device=d1a13e98-2636-49e7-89f4-932c7c4115a6&bin=86400&range=standard&markers=false&legend=true&thresholds=true&refresh=off&show_raw=true&show_quality=true";

/// NOAA's `t` field format.
const NOAA_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// NOAA's `begin_date`/`end_date` query format.
const NOAA_QUERY_FORMAT: &str = "%Y%m%d %H:%M";

/// HTTP timeout for every upstream call.
const HTTP_TIMEOUT_SECS: u64 = 20;

/// Errors that can occur while fetching an upstream reading.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Request failed (DNS, TLS, timeout, connection reset)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-2xx status
    #[error("upstream returned HTTP {0}")]
    Status(u16),

    /// Body was not the JSON shape we expect
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),

    /// NOAA answered with an `error` object instead of data
    #[error("upstream reported: {0}")]
    Api(String),

    /// Response parsed but held no usable rows
    #[error("no data in response")]
    NoData,

    /// Sensor page had no `<number> ft` value
    #[error("scrape failed: no water level found on the sensor page")]
    Scrape,

    /// Row timestamp in an unexpected format
    #[error("bad timestamp {0:?}")]
    Timestamp(String),

    /// This source cannot provide the requested data
    #[error("{0} is not available from this source")]
    Unsupported(&'static str),

    /// The number itself was unusable
    #[error("invalid reading: {0}")]
    Invalid(#[from] InvalidReading),
}

/// Anything that can produce water-level readings.
///
/// The engine only consumes this interface; retries and backoff belong to
/// implementations or the scheduler.
pub trait LevelSource {
    /// Most recent observation.
    fn fetch_latest_reading(&self) -> impl Future<Output = Result<Reading, FetchError>> + Send;

    /// Observations covering the last `window`, oldest first.
    fn fetch_trend_window(
        &self,
        window: Duration,
    ) -> impl Future<Output = Result<TrendWindow, FetchError>> + Send;

    /// Predicted high tides from `since` through the next day, oldest first.
    fn fetch_high_tides(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Prediction>, FetchError>> + Send;
}

/// Build the HTTP client shared by the sources.
pub fn http_client() -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(concat!("flood-watch/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

// -- NOAA --

#[derive(Debug, Deserialize)]
struct DataGetterResponse {
    #[serde(default)]
    data: Vec<ObservationRow>,
    #[serde(default)]
    predictions: Vec<PredictionRow>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ObservationRow {
    t: String,
    v: String,
}

#[derive(Debug, Deserialize)]
struct PredictionRow {
    t: String,
    v: String,
    #[serde(rename = "type")]
    kind: PredictionKind,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn parse_body(body: &str) -> Result<DataGetterResponse, FetchError> {
    let response: DataGetterResponse = serde_json::from_str(body)?;
    match response.error {
        Some(err) => Err(FetchError::Api(err.message)),
        None => Ok(response),
    }
}

fn parse_noaa_time(raw: &str) -> Result<DateTime<Utc>, FetchError> {
    NaiveDateTime::parse_from_str(raw.trim(), NOAA_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| FetchError::Timestamp(raw.to_string()))
}

fn parse_observation(row: &ObservationRow) -> Result<Reading, FetchError> {
    let timestamp = parse_noaa_time(&row.t)?;
    Ok(Reading::parse(&row.v, timestamp, ReadingSource::TideGauge)?)
}

/// Latest reading from a `product=water_level` response.
///
/// # Example
/// ```
/// use flood_watch_lib::tide_data::parse_water_level;
///
/// let body = r#"{"data":[{"t":"2025-01-04 16:06","v":"7.126","s":"0.030","f":"0,0,0,0","q":"p"}]}"#;
/// let reading = parse_water_level(body).unwrap();
/// assert_eq!(reading.value_ft(), 7.126);
/// ```
pub fn parse_water_level(body: &str) -> Result<Reading, FetchError> {
    let response = parse_body(body)?;
    let latest = response.data.last().ok_or(FetchError::NoData)?;
    parse_observation(latest)
}

/// Readings inside `window` (measured back from the newest row).
///
/// NOAA leaves `v` empty for gaps; those rows are skipped rather than failing
/// the whole window.
pub fn parse_trend_window(body: &str, window: Duration) -> Result<TrendWindow, FetchError> {
    let response = parse_body(body)?;
    let readings: Vec<Reading> = response
        .data
        .iter()
        .filter_map(|row| parse_observation(row).ok())
        .collect();

    let newest = readings
        .iter()
        .map(|r| r.timestamp())
        .max()
        .ok_or(FetchError::NoData)?;
    let cutoff = newest - window;

    Ok(TrendWindow::new(
        readings
            .into_iter()
            .filter(|r| r.timestamp() >= cutoff)
            .collect(),
    ))
}

/// Every high-tide prediction in a `hilo` body, oldest first.
pub fn parse_high_tides(body: &str) -> Result<Vec<Prediction>, FetchError> {
    let response = parse_body(body)?;
    let mut highs = response
        .predictions
        .iter()
        .filter(|p| p.kind == PredictionKind::High)
        .map(|row| {
            let timestamp = parse_noaa_time(&row.t)?;
            let reading = Reading::parse(&row.v, timestamp, ReadingSource::TideGauge)?;
            Ok(Prediction {
                value_ft: reading.value_ft(),
                timestamp,
                kind: row.kind,
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;

    if highs.is_empty() {
        return Err(FetchError::NoData);
    }
    highs.sort_by_key(|p| p.timestamp);
    Ok(highs)
}

/// Client for one NOAA CO-OPS station.
#[derive(Clone, Debug)]
pub struct NoaaClient {
    http: reqwest::Client,
    base_url: String,
    station: String,
    application: String,
}

impl NoaaClient {
    pub fn new(http: reqwest::Client, station: &str, application: &str) -> Self {
        Self::with_base_url(http, NOAA_BASE_URL, station, application)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        base_url: &str,
        station: &str,
        application: &str,
    ) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            station: station.to_string(),
            application: application.to_string(),
        }
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<String, FetchError> {
        let mut query: Vec<(&str, String)> = vec![
            ("station", self.station.clone()),
            ("datum", "MLLW".to_string()),
            ("units", "english".to_string()),
            ("time_zone", "gmt".to_string()),
            ("format", "json".to_string()),
            ("application", self.application.clone()),
        ];
        query.extend(params.iter().cloned());

        let response = self.http.get(&self.base_url).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }
}

impl LevelSource for NoaaClient {
    async fn fetch_latest_reading(&self) -> Result<Reading, FetchError> {
        let body = self
            .get(&[
                ("product", "water_level".to_string()),
                ("date", "latest".to_string()),
            ])
            .await?;
        parse_water_level(&body)
    }

    async fn fetch_trend_window(&self, window: Duration) -> Result<TrendWindow, FetchError> {
        // `range` is whole hours back from now.
        let hours = ((window.num_minutes() + 59) / 60).max(1);
        let body = self
            .get(&[
                ("product", "water_level".to_string()),
                ("range", hours.to_string()),
            ])
            .await?;
        parse_trend_window(&body, window)
    }

    async fn fetch_high_tides(&self, since: DateTime<Utc>) -> Result<Vec<Prediction>, FetchError> {
        let end = Utc::now().max(since) + Duration::hours(24);
        let body = self
            .get(&[
                ("product", "predictions".to_string()),
                ("interval", "hilo".to_string()),
                ("begin_date", since.format(NOAA_QUERY_FORMAT).to_string()),
                ("end_date", end.format(NOAA_QUERY_FORMAT).to_string()),
            ])
            .await?;
        parse_high_tides(&body)
    }
}

// -- OneRain --

/// First `<digits>.<digits>` followed by optional whitespace and `ft`
/// (any case).
fn find_feet_value(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let dot = digits_from(start);
        if bytes.get(dot) == Some(&b'.') {
            let end = digits_from(dot + 1);
            if end > dot + 1 && followed_by_ft(&text[end..]) {
                return text[start..end].parse().ok();
            }
        }
        // Any later start in the same digit run hits the same `dot`.
        start = dot;
    }
    None
}

fn followed_by_ft(rest: &str) -> bool {
    let mut chars = rest.trim_start().chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('f' | 'F'), Some('t' | 'T'))
    )
}

/// Current stage from the OneRain sensor page.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use flood_watch_lib::tide_data::parse_sensor_html;
///
/// let html = "<div class='reading'><span>5.42</span> ft</div>";
/// let reading = parse_sensor_html(html, Utc::now()).unwrap();
/// assert_eq!(reading.value_ft(), 5.42);
/// ```
pub fn parse_sensor_html(html: &str, now: DateTime<Utc>) -> Result<Reading, FetchError> {
    let doc = Html::parse_document(html);
    let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
    let value = find_feet_value(&text).ok_or(FetchError::Scrape)?;
    Ok(Reading::new(value, now, ReadingSource::SensorScrape)?)
}

/// Scraper for a OneRain sensor page.
#[derive(Clone, Debug)]
pub struct OneRainClient {
    http: reqwest::Client,
    url: String,
}

impl OneRainClient {
    pub fn new(http: reqwest::Client, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }
}

impl LevelSource for OneRainClient {
    async fn fetch_latest_reading(&self) -> Result<Reading, FetchError> {
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        let html = response.text().await?;
        parse_sensor_html(&html, Utc::now())
    }

    async fn fetch_trend_window(&self, _window: Duration) -> Result<TrendWindow, FetchError> {
        Err(FetchError::Unsupported("trend window"))
    }

    async fn fetch_high_tides(&self, _since: DateTime<Utc>) -> Result<Vec<Prediction>, FetchError> {
        Err(FetchError::Unsupported("tide prediction"))
    }
}

/// The source chosen in configuration.
#[derive(Clone, Debug)]
pub enum AnySource {
    Noaa(NoaaClient),
    OneRain(OneRainClient),
}

impl LevelSource for AnySource {
    async fn fetch_latest_reading(&self) -> Result<Reading, FetchError> {
        match self {
            AnySource::Noaa(s) => s.fetch_latest_reading().await,
            AnySource::OneRain(s) => s.fetch_latest_reading().await,
        }
    }

    async fn fetch_trend_window(&self, window: Duration) -> Result<TrendWindow, FetchError> {
        match self {
            AnySource::Noaa(s) => s.fetch_trend_window(window).await,
            AnySource::OneRain(s) => s.fetch_trend_window(window).await,
        }
    }

    async fn fetch_high_tides(&self, since: DateTime<Utc>) -> Result<Vec<Prediction>, FetchError> {
        match self {
            AnySource::Noaa(s) => s.fetch_high_tides(since).await,
            AnySource::OneRain(s) => s.fetch_high_tides(since).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WATER_LEVEL_BODY: &str = r#"{
        "metadata": {"id": "9414290", "name": "San Francisco", "lat": "37.8063", "lon": "-122.4659"},
        "data": [
            {"t": "2025-01-04 15:06", "v": "6.512", "s": "0.020", "f": "0,0,0,0", "q": "p"},
            {"t": "2025-01-04 15:30", "v": "", "s": "", "f": "1,1,1,1", "q": "p"},
            {"t": "2025-01-04 15:36", "v": "6.874", "s": "0.030", "f": "0,0,0,0", "q": "p"},
            {"t": "2025-01-04 16:06", "v": "7.126", "s": "0.030", "f": "0,0,0,0", "q": "p"}
        ]
    }"#;

    const PREDICTIONS_BODY: &str = r#"{"predictions": [
        {"t": "2025-01-04 10:12", "v": "0.911", "type": "L"},
        {"t": "2025-01-04 16:24", "v": "6.800", "type": "H"},
        {"t": "2025-01-04 22:51", "v": "1.204", "type": "L"},
        {"t": "2025-01-05 05:02", "v": "6.102", "type": "H"}
    ]}"#;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 4, h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_water_level_takes_last_row() {
        let reading = parse_water_level(WATER_LEVEL_BODY).unwrap();
        assert_eq!(reading.value_ft(), 7.126);
        assert_eq!(reading.timestamp(), utc(16, 6));
        assert_eq!(reading.source(), ReadingSource::TideGauge);
    }

    #[test]
    fn test_parse_water_level_api_error() {
        let body = r#"{"error": {"message": "No data was found. This product may not be offered at this station at the requested time."}}"#;
        assert!(matches!(
            parse_water_level(body),
            Err(FetchError::Api(msg)) if msg.starts_with("No data was found")
        ));
    }

    #[test]
    fn test_parse_water_level_empty_and_garbage() {
        assert!(matches!(
            parse_water_level(r#"{"data": []}"#),
            Err(FetchError::NoData)
        ));
        assert!(matches!(
            parse_water_level("<html>maintenance</html>"),
            Err(FetchError::Json(_))
        ));
        assert!(matches!(
            parse_water_level(r#"{"data": [{"t": "2025-01-04 16:06", "v": "-99.0"}]}"#),
            Err(FetchError::Invalid(InvalidReading::OutOfRange { .. }))
        ));
        assert!(matches!(
            parse_water_level(r#"{"data": [{"t": "yesterday", "v": "6.0"}]}"#),
            Err(FetchError::Timestamp(_))
        ));
    }

    #[test]
    fn test_parse_trend_window_skips_gaps_and_trims() {
        let window = parse_trend_window(WATER_LEVEL_BODY, Duration::minutes(60)).unwrap();
        assert_eq!(window.readings.len(), 3);

        let short = parse_trend_window(WATER_LEVEL_BODY, Duration::minutes(30)).unwrap();
        assert_eq!(short.readings.len(), 2);
        assert!((short.rise_rate().unwrap() - 0.252).abs() < 1e-9);
    }

    #[test]
    fn test_parse_high_tides_drops_lows() {
        let highs = parse_high_tides(PREDICTIONS_BODY).unwrap();
        assert_eq!(highs.len(), 2);
        assert!(highs.iter().all(|p| p.kind == PredictionKind::High));
        assert_eq!(highs[0].value_ft, 6.8);
        assert_eq!(highs[0].timestamp, utc(16, 24));
        assert_eq!(highs[1].value_ft, 6.102);
    }

    #[test]
    fn test_parse_high_tides_without_highs() {
        let lows_only = r#"{"predictions": [{"t": "2025-01-04 10:12", "v": "0.911", "type": "L"}]}"#;
        assert!(matches!(
            parse_high_tides(lows_only),
            Err(FetchError::NoData)
        ));
        let bad = r#"{"predictions": [{"t": "2025-01-04 16:24", "v": "NaN", "type": "H"}]}"#;
        assert!(matches!(
            parse_high_tides(bad),
            Err(FetchError::Invalid(_))
        ));
    }

    #[test]
    fn test_find_feet_value() {
        assert_eq!(find_feet_value("Stage 5.42 ft"), Some(5.42));
        assert_eq!(find_feet_value("Stage 5.42ft"), Some(5.42));
        assert_eq!(find_feet_value("Stage 5.42 FT"), Some(5.42));
        assert_eq!(find_feet_value("Rain 0.04 in, stage 12.10 ft"), Some(12.10));
        assert_eq!(find_feet_value("v1.2.3 ft"), Some(2.3));
        assert_eq!(find_feet_value("5 ft and 6. ft"), None);
        assert_eq!(find_feet_value("no numbers"), None);
        assert_eq!(find_feet_value("Stage\u{a0}5.42\u{a0}ft"), Some(5.42));
    }

    #[test]
    fn test_find_feet_value_long_digit_runs() {
        let noise = "7".repeat(200_000);
        assert_eq!(find_feet_value(&noise), None);

        let text = format!("{noise}.{noise} in, stage 6.25 ft");
        assert_eq!(find_feet_value(&text), Some(6.25));
    }

    #[test]
    fn test_parse_sensor_html_reads_across_tags() {
        let html = r#"<html><body>
            <h2>Tam Valley</h2>
            <table><tr><td>Last reading</td><td><b>4.87</b>&nbsp;ft</td></tr></table>
        </body></html>"#;
        let reading = parse_sensor_html(html, utc(12, 0)).unwrap();
        assert_eq!(reading.value_ft(), 4.87);
        assert_eq!(reading.source(), ReadingSource::SensorScrape);
        assert_eq!(reading.timestamp(), utc(12, 0));
    }

    #[test]
    fn test_parse_sensor_html_without_value_is_scrape_error() {
        let html = "<html><body><p>Sensor offline</p></body></html>";
        assert!(matches!(
            parse_sensor_html(html, utc(12, 0)),
            Err(FetchError::Scrape)
        ));
    }

    #[tokio::test]
    async fn test_onerain_has_no_history() {
        let client = OneRainClient::new(reqwest::Client::new(), ONERAIN_SENSOR_URL);
        assert!(matches!(
            client.fetch_trend_window(Duration::minutes(60)).await,
            Err(FetchError::Unsupported(_))
        ));
        assert!(matches!(
            client.fetch_high_tides(utc(12, 0)).await,
            Err(FetchError::Unsupported(_))
        ));
    }
}
