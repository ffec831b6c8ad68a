//! carbonfeed core types: forecast points, published records and config documents.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

pub mod location;
pub mod transform;

pub use location::{catalog, resolve, Location, LocationError, DEFAULT_LOCATION};
pub use transform::transform;

/// One sample as returned by the forecast provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RawForecastPoint {
    pub time: DateTime<FixedOffset>,
    pub duration: Duration,
    /// Carbon intensity; zero or negative means "no data".
    pub rating: f64,
}

/// Filtered, unit-normalized forecast point as written to the config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRecord {
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<FixedOffset>,
    #[serde(rename = "duration")]
    pub duration_minutes: i64,
    pub value: f64,
}

/// Records of one run plus positional summary.
///
/// `first_timestamp` / `last_timestamp` are taken from the first and last
/// element, not min/max: the provider is expected to return points in
/// chronological order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishBatch {
    pub records: Vec<PublishedRecord>,
    pub count: usize,
    pub first_timestamp: Option<DateTime<FixedOffset>>,
    pub last_timestamp: Option<DateTime<FixedOffset>>,
}

impl PublishBatch {
    pub fn from_records(records: Vec<PublishedRecord>) -> Self {
        let first_timestamp = records.first().map(|r| r.timestamp);
        let last_timestamp = records.last().map(|r| r.timestamp);
        Self { count: records.len(), records, first_timestamp, last_timestamp }
    }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    /// Canonical JSON array of the records, UTF-8 encoded.
    pub fn payload_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.records)
    }
}

/// In-memory copy of a key-value config document (a ConfigMap on the cluster).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub namespace: String,
    pub name: String,
    /// String values (ConfigMap `data`).
    pub metadata: BTreeMap<String, String>,
    /// Binary values (ConfigMap `binaryData`). Serialized as UTF-8 text.
    #[serde(with = "payload_text")]
    pub payload: BTreeMap<String, Vec<u8>>,
    /// Store-issued version token; `None` until the document has been persisted.
    pub version: Option<String>,
}

impl ConfigDocument {
    pub fn empty(namespace: &str, name: &str) -> Self {
        Self { namespace: namespace.to_string(), name: name.to_string(), ..Default::default() }
    }

    pub fn key(&self) -> String { format!("{}/{}", self.namespace, self.name) }
}

/// RFC 3339 with the original offset; `Z` for UTC.
pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub mod rfc3339 {
    use chrono::{DateTime, FixedOffset};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<FixedOffset>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<FixedOffset>, D::Error> {
        let s = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&s).map_err(de::Error::custom)
    }
}

/// Payload maps as text, so a serialized document reads like the JSON it carries
/// rather than arrays of byte values. Invalid UTF-8 is replaced, not rejected.
pub mod payload_text {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &BTreeMap<String, Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_map(payload.iter().map(|(k, v)| (k, String::from_utf8_lossy(v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let text = BTreeMap::<String, String>::deserialize(d)?;
        Ok(text.into_iter().map(|(k, v)| (k, v.into_bytes())).collect())
    }
}

pub mod prelude {
    pub use super::{
        format_timestamp, ConfigDocument, Location, LocationError, PublishBatch, PublishedRecord, RawForecastPoint,
    };
}
