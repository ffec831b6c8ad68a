//! carbonfeed forecast client: fetch raw carbon-intensity forecast points for a location.
//!
//! The endpoint is a URL template with a single `{}` placeholder that receives the
//! location code. The provider answers with a JSON array of
//! `{ "time": <RFC 3339>, "duration": <span>, "rating": <number> }` where `<span>` is
//! either a `"[d.]hh:mm:ss[.fffffff]"` string or a number of seconds.

#![forbid(unsafe_code)]

use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use carbonfeed_core::{Location, RawForecastPoint};
use chrono::{DateTime, Duration};
use metrics::{counter, histogram};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const PLACEHOLDER: &str = "{}";

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("url template must contain exactly one `{{}}` placeholder (found {found}): {template}")]
    Template { template: String, found: usize },
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("decoding forecast from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: PayloadError,
    },
}

/// Reasons a provider body is rejected.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("point {index}: invalid time {value:?}: {source}")]
    Time {
        index: usize,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("point {index}: invalid duration {value}")]
    Span { index: usize, value: String },
}

/// Capability the pipeline needs from a forecast provider.
#[async_trait]
pub trait ForecastClient: Send + Sync {
    async fn fetch(&self, location: &Location, url_template: &str) -> Result<Vec<RawForecastPoint>, ForecastError>;
}

/// Substitute the location code into the template's single placeholder.
pub fn render_url(template: &str, code: &str) -> Result<String, ForecastError> {
    let found = template.matches(PLACEHOLDER).count();
    if found != 1 {
        return Err(ForecastError::Template { template: template.to_string(), found });
    }
    Ok(template.replacen(PLACEHOLDER, code, 1))
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    time: String,
    duration: WireSpan,
    rating: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireSpan {
    Seconds(f64),
    Text(String),
}

impl WireSpan {
    fn to_duration(&self) -> Option<Duration> {
        match self {
            WireSpan::Seconds(s) => {
                let ms = (s * 1000.0).round();
                // Rejects NaN and infinities too; the cast would saturate instead of failing.
                if !(ms.abs() < i64::MAX as f64) {
                    return None;
                }
                Duration::try_milliseconds(ms as i64)
            }
            WireSpan::Text(t) => parse_timespan(t),
        }
    }

    fn render(&self) -> String {
        match self {
            WireSpan::Seconds(s) => s.to_string(),
            WireSpan::Text(t) => format!("{:?}", t),
        }
    }
}

/// Parse `[-][d.]hh:mm:ss[.fffffff]`.
pub fn parse_timespan(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    // A '.' before the first ':' separates days; after it, fractional seconds.
    let (days, clock) = match s.split_once('.') {
        Some((d, rest)) if !d.contains(':') => (d.parse::<i64>().ok()?, rest),
        _ => (0, s),
    };
    let mut parts = clock.splitn(3, ':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let sec_part = parts.next()?;
    let (whole, frac) = sec_part.split_once('.').unwrap_or((sec_part, ""));
    let seconds: i64 = whole.parse().ok()?;
    if hours < 0 || minutes < 0 || seconds < 0 || minutes >= 60 || seconds >= 60 {
        return None;
    }
    let nanos = if frac.is_empty() {
        0
    } else {
        if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        format!("{:0<9}", frac).parse::<i64>().ok()?
    };
    let total = Duration::try_days(days)?
        .checked_add(&Duration::try_hours(hours)?)?
        .checked_add(&Duration::try_minutes(minutes)?)?
        .checked_add(&Duration::try_seconds(seconds)?)?
        .checked_add(&Duration::nanoseconds(nanos))?;
    Some(if neg { -total } else { total })
}

/// Decode a provider body into forecast points, keeping the provider's order.
pub fn parse_points(body: &[u8]) -> Result<Vec<RawForecastPoint>, PayloadError> {
    let wire: Vec<WirePoint> = serde_json::from_slice(body)?;
    wire.into_iter()
        .enumerate()
        .map(|(index, w)| -> Result<RawForecastPoint, PayloadError> {
            let time = DateTime::parse_from_rfc3339(&w.time)
                .map_err(|source| PayloadError::Time { index, value: w.time.clone(), source })?;
            let duration = w
                .duration
                .to_duration()
                .ok_or_else(|| PayloadError::Span { index, value: w.duration.render() })?;
            Ok(RawForecastPoint { time, duration, rating: w.rating })
        })
        .collect()
}

fn http_timeout() -> StdDuration {
    let secs = std::env::var("CARBONFEED_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(30);
    StdDuration::from_secs(secs)
}

/// reqwest-backed provider client.
pub struct HttpForecastClient {
    client: reqwest::Client,
}

impl HttpForecastClient {
    /// Client with the request timeout from `CARBONFEED_HTTP_TIMEOUT_SECS` (default 30s).
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout())
            .user_agent(concat!("carbonfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self { Self { client } }

    async fn request(&self, url: &str) -> Result<Vec<RawForecastPoint>, ForecastError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| ForecastError::Fetch { url: url.to_string(), source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ForecastError::Status { url: url.to_string(), status: status.as_u16() });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| ForecastError::Fetch { url: url.to_string(), source })?;
        parse_points(&body).map_err(|source| ForecastError::Parse { url: url.to_string(), source })
    }
}

#[async_trait]
impl ForecastClient for HttpForecastClient {
    #[instrument(skip(self, location, url_template), fields(location = %location.code))]
    async fn fetch(&self, location: &Location, url_template: &str) -> Result<Vec<RawForecastPoint>, ForecastError> {
        let url = render_url(url_template, location.code)?;
        let t0 = Instant::now();
        counter!("forecast_fetch_total", 1u64);
        debug!(url = %url, "fetching forecast");

        let result = self.request(&url).await;

        histogram!("forecast_fetch_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(points) => {
                counter!("forecast_points_total", points.len() as u64);
                info!(url = %url, points = points.len(), "forecast fetched");
                Ok(points)
            }
            Err(e) => {
                counter!("forecast_fetch_err", 1u64);
                Err(e)
            }
        }
    }
}
