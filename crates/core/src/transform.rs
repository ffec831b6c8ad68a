//! Raw forecast points -> publishable batch.

use crate::{PublishBatch, PublishedRecord, RawForecastPoint};

/// Drop points without a positive rating and normalize the rest.
///
/// Input order is kept as-is. Durations are truncated toward zero to whole minutes.
pub fn transform(points: &[RawForecastPoint]) -> PublishBatch {
    let records = points
        .iter()
        .filter(|p| p.rating > 0.0)
        .map(|p| PublishedRecord {
            timestamp: p.time,
            duration_minutes: p.duration.num_minutes(),
            value: p.rating,
        })
        .collect();
    PublishBatch::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, FixedOffset};

    fn ts(s: &str) -> DateTime<FixedOffset> { DateTime::parse_from_rfc3339(s).unwrap() }

    fn pt(t: &str, dur: Duration, rating: f64) -> RawForecastPoint {
        RawForecastPoint { time: ts(t), duration: dur, rating }
    }

    #[test]
    fn drops_non_positive_and_keeps_order() {
        let points = vec![
            pt("2023-01-01T00:00:00Z", Duration::minutes(30), 120.0),
            pt("2023-01-01T00:30:00Z", Duration::minutes(30), 0.0),
            pt("2023-01-01T01:00:00Z", Duration::minutes(30), 95.5),
        ];
        let batch = transform(&points);
        assert_eq!(batch.count, 2);
        assert_eq!(batch.records[0].timestamp, ts("2023-01-01T00:00:00Z"));
        assert_eq!(batch.records[0].duration_minutes, 30);
        assert_eq!(batch.records[0].value, 120.0);
        assert_eq!(batch.records[1].timestamp, ts("2023-01-01T01:00:00Z"));
        assert_eq!(batch.records[1].value, 95.5);
        assert_eq!(batch.first_timestamp, Some(ts("2023-01-01T00:00:00Z")));
        assert_eq!(batch.last_timestamp, Some(ts("2023-01-01T01:00:00Z")));
    }

    #[test]
    fn empty_input_has_no_bounds() {
        let batch = transform(&[]);
        assert_eq!(batch.count, 0);
        assert!(batch.records.is_empty());
        assert_eq!(batch.first_timestamp, None);
        assert_eq!(batch.last_timestamp, None);
    }

    #[test]
    fn negative_and_nan_ratings_are_dropped() {
        let points = vec![
            pt("2023-01-01T00:00:00Z", Duration::minutes(5), -1.0),
            pt("2023-01-01T00:05:00Z", Duration::minutes(5), f64::NAN),
        ];
        let batch = transform(&points);
        assert!(batch.is_empty());
        assert_eq!(batch.first_timestamp, None);
    }

    #[test]
    fn durations_truncate_to_whole_minutes() {
        let points = vec![
            pt("2023-01-01T00:00:00Z", Duration::seconds(59), 1.0),
            pt("2023-01-01T00:01:00Z", Duration::seconds(89), 1.0),
            pt("2023-01-01T00:02:00Z", Duration::seconds(3599), 1.0),
            pt("2023-01-01T00:03:00Z", Duration::milliseconds(300_999), 1.0),
        ];
        let mins: Vec<_> = transform(&points).records.iter().map(|r| r.duration_minutes).collect();
        assert_eq!(mins, vec![0, 1, 59, 5]);
    }

    #[test]
    fn offsets_are_preserved_verbatim() {
        let points = vec![pt("2023-06-01T12:00:00+02:00", Duration::hours(1), 10.0)];
        let batch = transform(&points);
        assert_eq!(batch.records[0].timestamp.offset().local_minus_utc(), 7200);
        assert_eq!(crate::format_timestamp(&batch.records[0].timestamp), "2023-06-01T12:00:00+02:00");
    }

    #[test]
    fn bounds_are_positional_not_sorted() {
        let points = vec![
            pt("2023-01-01T02:00:00Z", Duration::minutes(60), 3.0),
            pt("2023-01-01T00:00:00Z", Duration::minutes(60), 1.0),
        ];
        let batch = transform(&points);
        assert_eq!(batch.first_timestamp, Some(ts("2023-01-01T02:00:00Z")));
        assert_eq!(batch.last_timestamp, Some(ts("2023-01-01T00:00:00Z")));
    }
}
