//! carbonfeed publish: upsert a forecast batch into the shared config document,
//! plus the one-shot resolve → fetch → transform → publish run.

#![forbid(unsafe_code)]

mod pipeline;

use std::time::Instant;

use carbonfeed_core::{format_timestamp, ConfigDocument, PublishBatch};
use carbonfeed_kubehub::{ConfigStore, StoreError};
use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

pub use pipeline::{run, validate, FailureKind, RunConfig, RunError, RunReport};

pub const HEARTBEAT_KEY: &str = "lastHeartbeatTime";
pub const COUNT_KEY: &str = "numOfRecords";
pub const MIN_FORECAST_KEY: &str = "minForecast";
pub const MAX_FORECAST_KEY: &str = "maxForecast";

/// Where a batch is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub namespace: String,
    pub name: String,
    pub payload_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// The document did not exist and was created by this publish.
    pub created: bool,
    pub records: usize,
    /// Document as persisted, including the store's new version.
    pub document: ConfigDocument,
}

/// Write `batch` and its bookkeeping into `doc`. Other metadata and payload keys are kept.
pub fn apply_batch(
    doc: &mut ConfigDocument,
    payload_key: &str,
    batch: &PublishBatch,
    now: &DateTime<FixedOffset>,
) -> serde_json::Result<()> {
    let payload = batch.payload_bytes()?;
    let bound = |ts: &Option<DateTime<FixedOffset>>| ts.as_ref().map(format_timestamp).unwrap_or_default();
    doc.metadata.insert(HEARTBEAT_KEY.to_string(), format_timestamp(now));
    doc.metadata.insert(COUNT_KEY.to_string(), batch.count.to_string());
    doc.metadata.insert(MIN_FORECAST_KEY.to_string(), bound(&batch.first_timestamp));
    doc.metadata.insert(MAX_FORECAST_KEY.to_string(), bound(&batch.last_timestamp));
    doc.payload.insert(payload_key.to_string(), payload);
    Ok(())
}

/// Publish with the current time as heartbeat.
pub async fn publish(store: &dyn ConfigStore, target: &Target, batch: &PublishBatch) -> Result<PublishOutcome, StoreError> {
    publish_at(store, target, batch, Utc::now().into()).await
}

/// Get-or-create the target document, apply `batch`, persist in one update.
///
/// The update carries the version read (or created) here, so a concurrent writer
/// makes this call fail with `StoreError::Conflict` instead of being overwritten.
#[instrument(skip(store, batch), fields(ns = %target.namespace, name = %target.name, records = batch.count))]
pub async fn publish_at(
    store: &dyn ConfigStore,
    target: &Target,
    batch: &PublishBatch,
    now: DateTime<FixedOffset>,
) -> Result<PublishOutcome, StoreError> {
    let t0 = Instant::now();
    counter!("publish_attempts", 1u64);
    let res = upsert(store, target, batch, &now).await;
    histogram!("publish_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    match &res {
        Ok(outcome) => {
            counter!("publish_ok", 1u64);
            if outcome.created {
                counter!("publish_created_total", 1u64);
            }
            info!(version = ?outcome.document.version, created = outcome.created, "forecast published");
        }
        Err(e) => {
            counter!("publish_err", 1u64);
            warn!(error = %e, "publish failed");
        }
    }
    res
}

async fn upsert(
    store: &dyn ConfigStore,
    target: &Target,
    batch: &PublishBatch,
    now: &DateTime<FixedOffset>,
) -> Result<PublishOutcome, StoreError> {
    let (mut doc, created) = match store.get_document(&target.namespace, &target.name).await? {
        Some(doc) => (doc, false),
        None => {
            info!("document not found; creating");
            let empty = ConfigDocument::empty(&target.namespace, &target.name);
            (store.create_document(&empty).await?, true)
        }
    };
    apply_batch(&mut doc, &target.payload_key, batch, now)
        .map_err(|source| StoreError::Encode { key: doc.key(), source })?;
    let document = store.update_document(&doc).await?;
    Ok(PublishOutcome { created, records: batch.count, document })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonfeed_core::PublishedRecord;

    fn ts(s: &str) -> DateTime<FixedOffset> { DateTime::parse_from_rfc3339(s).unwrap() }

    #[test]
    fn apply_batch_writes_bookkeeping_and_payload() {
        let mut doc = ConfigDocument::empty("ns", "n");
        doc.metadata.insert("owner".into(), "scheduler".into());
        doc.payload.insert("other".into(), b"keep".to_vec());
        let batch = PublishBatch::from_records(vec![
            PublishedRecord { timestamp: ts("2023-01-01T00:00:00Z"), duration_minutes: 30, value: 120.0 },
            PublishedRecord { timestamp: ts("2023-01-01T01:00:00Z"), duration_minutes: 30, value: 95.5 },
        ]);
        apply_batch(&mut doc, "data", &batch, &ts("2024-05-05T10:00:00+02:00")).unwrap();

        assert_eq!(doc.metadata[HEARTBEAT_KEY], "2024-05-05T10:00:00+02:00");
        assert_eq!(doc.metadata[COUNT_KEY], "2");
        assert_eq!(doc.metadata[MIN_FORECAST_KEY], "2023-01-01T00:00:00Z");
        assert_eq!(doc.metadata[MAX_FORECAST_KEY], "2023-01-01T01:00:00Z");
        assert_eq!(doc.metadata["owner"], "scheduler");
        assert_eq!(doc.payload["other"], b"keep".to_vec());

        let payload: serde_json::Value = serde_json::from_slice(&doc.payload["data"]).unwrap();
        assert_eq!(
            payload,
            serde_json::json!([
                { "timestamp": "2023-01-01T00:00:00Z", "duration": 30, "value": 120.0 },
                { "timestamp": "2023-01-01T01:00:00Z", "duration": 30, "value": 95.5 }
            ])
        );
    }

    #[test]
    fn empty_batch_clears_bounds_and_overwrites_payload() {
        let mut doc = ConfigDocument::empty("ns", "n");
        doc.metadata.insert(MIN_FORECAST_KEY.into(), "2020-01-01T00:00:00Z".into());
        doc.payload.insert("data".into(), b"[{\"old\":1}]".to_vec());
        apply_batch(&mut doc, "data", &PublishBatch::default(), &ts("2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(doc.metadata[COUNT_KEY], "0");
        assert_eq!(doc.metadata[MIN_FORECAST_KEY], "");
        assert_eq!(doc.metadata[MAX_FORECAST_KEY], "");
        assert_eq!(doc.payload["data"], b"[]".to_vec());
    }
}
