//! One exporter run: resolve → fetch → transform → publish.

use carbonfeed_core::{resolve, transform, Location, LocationError};
use carbonfeed_forecast::{render_url, ForecastClient, ForecastError};
use carbonfeed_kubehub::{ConfigStore, StoreError};
use chrono::{DateTime, FixedOffset};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{publish, PublishOutcome, Target};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub location: String,
    pub url_template: String,
    pub target: Target,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidLocation,
    InvalidConfig,
    Fetch,
    Parse,
    Store,
}

impl RunError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RunError::Location(_) => FailureKind::InvalidLocation,
            RunError::Forecast(ForecastError::Template { .. }) => FailureKind::InvalidConfig,
            RunError::Forecast(ForecastError::Fetch { .. } | ForecastError::Status { .. }) => FailureKind::Fetch,
            RunError::Forecast(ForecastError::Parse { .. }) => FailureKind::Parse,
            RunError::Store(_) => FailureKind::Store,
        }
    }

    /// Process exit code for this failure. 1 is left for untyped failures and
    /// 2 for command-line usage errors reported by the argument parser.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            FailureKind::InvalidLocation | FailureKind::InvalidConfig => 3,
            FailureKind::Fetch => 4,
            FailureKind::Parse => 5,
            FailureKind::Store => 6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub location: Location,
    /// Points returned by the provider before filtering.
    pub fetched: usize,
    pub published: usize,
    pub first_timestamp: Option<DateTime<FixedOffset>>,
    pub last_timestamp: Option<DateTime<FixedOffset>>,
    pub outcome: PublishOutcome,
}

/// Check the location and URL template without touching the network or the store.
pub fn validate(cfg: &RunConfig) -> Result<Location, RunError> {
    let location = resolve(&cfg.location)?;
    render_url(&cfg.url_template, location.code)?;
    Ok(location)
}

/// Run the exporter once. Stages run strictly in sequence and nothing is retried.
pub async fn run(cfg: &RunConfig, forecast: &dyn ForecastClient, store: &dyn ConfigStore) -> Result<RunReport, RunError> {
    counter!("runs_total", 1u64);
    let location = validate(cfg)?;
    info!(location = location.code, name = location.name, "location resolved");

    let points = forecast.fetch(&location, &cfg.url_template).await?;
    let batch = transform(&points);
    let dropped = points.len() - batch.count;
    if dropped > 0 {
        counter!("transform_dropped_total", dropped as u64);
    }
    debug!(fetched = points.len(), kept = batch.count, dropped, "forecast transformed");

    let outcome = publish(store, &cfg.target, &batch).await?;
    Ok(RunReport {
        location,
        fetched: points.len(),
        published: batch.count,
        first_timestamp: batch.first_timestamp,
        last_timestamp: batch.last_timestamp,
        outcome,
    })
}
