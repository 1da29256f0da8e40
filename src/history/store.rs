//! Data point store
//!
//! One JSON record per measurement, written with an expiry so retention is
//! enforced by the backend alone.

use super::keys::{day_pattern, parse_point_key, point_key};
use crate::backend::KvBackend;
use crate::clock::Clock;
use crate::error::StoreError;
use crate::types::{HistoricalDataPoint, NewDataPoint, RenderingStrategy};

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

/// Default retention: 90 days
pub const DEFAULT_RETENTION_SECS: u64 = 90 * 24 * 60 * 60;

/// Reads and writes individual data points
pub struct DataPointStore {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    retention_secs: u64,
    default_project_id: String,
}

impl DataPointStore {
    /// Create a store writing with `retention_secs` expiry
    pub fn new(
        backend: Arc<dyn KvBackend>,
        clock: Arc<dyn Clock>,
        retention_secs: u64,
        default_project_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            clock,
            retention_secs,
            default_project_id: default_project_id.into(),
        }
    }

    /// Expiry applied to every write, in seconds
    pub fn retention_secs(&self) -> u64 {
        self.retention_secs
    }

    /// Persist a point, stamping it with `timestamp` or the current time
    ///
    /// Returns the record as written.
    pub async fn try_save(
        &self,
        point: NewDataPoint,
        timestamp: Option<i64>,
    ) -> Result<HistoricalDataPoint, StoreError> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now_millis());
        let record = point.into_historical(timestamp, &self.default_project_id);

        // serde_json writes NaN and infinities as null, which never decodes
        if let Some(metric) = record.metrics.first_non_finite() {
            return Err(StoreError::Serialization(format!(
                "{} is not a finite number",
                metric
            )));
        }

        let key = point_key(record.strategy, &record.project_id, record.timestamp);
        let json = serde_json::to_string(&record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.backend.set(&key, &json, self.retention_secs).await?;

        debug!(key = %key, bytes = json.len(), "Saved data point");
        Ok(record)
    }

    /// Latest point of one strategy/project/day
    ///
    /// `date` defaults to today (UTC); `project_id` to the default project.
    pub async fn try_get(
        &self,
        strategy: RenderingStrategy,
        project_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Option<HistoricalDataPoint>, StoreError> {
        let project_id = project_id.unwrap_or(&self.default_project_id);
        let date = date.unwrap_or_else(|| self.clock.now().date_naive());

        let mut keys = self
            .backend
            .list_keys(&day_pattern(strategy, project_id, date))
            .await?;
        // `a:ssr:2024-01-01*` also matches keys of project `a:ssr:2024-01-01`
        keys.retain(|key| {
            parse_point_key(key).map_or(true, |parsed| {
                parsed.project_id == project_id
                    && parsed.strategy == strategy
                    && parsed.date == date
            })
        });

        if keys.is_empty() {
            return Ok(None);
        }

        let values = match keys.as_slice() {
            [key] => vec![self.backend.get(key).await?],
            _ => self.backend.multi_get(&keys).await?,
        };
        if values.len() != keys.len() {
            return Err(StoreError::Backend(format!(
                "multi-get returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        let mut latest: Option<HistoricalDataPoint> = None;
        for (key, value) in keys.iter().zip(values) {
            let Some(value) = value else { continue };
            let point = decode_point(key, &value)?;
            if latest.as_ref().map_or(true, |l| point.timestamp >= l.timestamp) {
                latest = Some(point);
            }
        }
        Ok(latest)
    }
}

/// Decode a stored record
pub(crate) fn decode_point(key: &str, raw: &str) -> Result<HistoricalDataPoint, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Deserialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, InMemoryBackend};
    use crate::clock::ManualClock;
    use crate::types::{CoreMetrics, MetricName};

    // 2024-01-01T10:00:00Z
    const TS: i64 = 1_704_103_200_000;

    fn setup() -> (Arc<InMemoryBackend>, DataPointStore) {
        let clock = Arc::new(ManualClock::new(TS));
        let backend = Arc::new(InMemoryBackend::with_clock(clock.clone()));
        let store = DataPointStore::new(backend.clone(), clock, DEFAULT_RETENTION_SECS, "default");
        (backend, store)
    }

    fn point(lcp: f64) -> NewDataPoint {
        NewDataPoint::new(
            RenderingStrategy::Ssr,
            CoreMetrics::from_values("2024-01-01T10:00:00Z", [1000.0, lcp, 0.1, 100.0, 300.0]),
        )
    }

    fn jan(day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, day)
    }

    #[test]
    fn test_default_retention_is_90_days() {
        assert_eq!(DEFAULT_RETENTION_SECS, 7_776_000);
    }

    #[tokio::test]
    async fn test_save_defaults() {
        let (backend, store) = setup();

        let saved = store.try_save(point(1800.0), None).await.unwrap();
        assert_eq!(saved.timestamp, TS);
        assert_eq!(saved.project_id, "default");

        let key = "historical:default:ssr:2024-01-01:1704103200000";
        assert_eq!(backend.ttl_secs(key), Some(7_776_000));

        let raw = backend.get(key).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["projectId"], "default");
        assert_eq!(json["timestamp"], TS);
        assert_eq!(json["strategy"], "SSR");
    }

    #[tokio::test]
    async fn test_get_returns_latest_of_day() {
        let (_, store) = setup();
        store.try_save(point(1800.0), Some(TS)).await.unwrap();
        store.try_save(point(2000.0), Some(TS + 3_600_000)).await.unwrap();
        store.try_save(point(1500.0), Some(TS - 3_600_000)).await.unwrap();

        let found = store
            .try_get(RenderingStrategy::Ssr, None, jan(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.timestamp, TS + 3_600_000);
        assert_eq!(found.metrics.value(MetricName::Lcp), 2000.0);
    }

    #[tokio::test]
    async fn test_get_single_key_uses_point_read() {
        let (backend, store) = setup();
        store.try_save(point(1800.0), Some(TS)).await.unwrap();

        let found = store.try_get(RenderingStrategy::Ssr, None, None).await.unwrap();
        assert!(found.is_some());

        let calls = backend.calls();
        assert_eq!(calls.get, 1);
        assert_eq!(calls.multi_get, 0);
    }

    #[tokio::test]
    async fn test_get_miss() {
        let (_, store) = setup();
        store.try_save(point(1800.0), Some(TS)).await.unwrap();

        assert!(store
            .try_get(RenderingStrategy::Ssr, None, jan(2))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .try_get(RenderingStrategy::Csr, None, jan(1))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .try_get(RenderingStrategy::Ssr, Some("other"), jan(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_reads_legacy_day_key() {
        let (backend, store) = setup();
        let legacy = point(2100.0).into_historical(TS, "default");
        backend.insert_raw(
            "historical:default:ssr:2024-01-01",
            serde_json::to_string(&legacy).unwrap(),
        );

        let found = store
            .try_get(RenderingStrategy::Ssr, None, jan(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, legacy);
    }

    #[tokio::test]
    async fn test_get_malformed_record_is_error() {
        let (backend, store) = setup();
        backend.insert_raw("historical:default:ssr:2024-01-01:1", "{not json");

        let err = store
            .try_get(RenderingStrategy::Ssr, None, jan(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Deserialization { .. }));
    }

    #[tokio::test]
    async fn test_save_propagates_backend_error() {
        let (backend, store) = setup();
        backend.fail_next(BackendOp::Set);

        let err = store.try_save(point(1800.0), None).await.unwrap_err();
        assert!(err.is_transport());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_non_finite_metrics() {
        let (backend, store) = setup();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = store.try_save(point(bad), None).await.unwrap_err();
            assert!(matches!(err, StoreError::Serialization(ref msg) if msg.contains("lcp")));
        }
        assert!(backend.is_empty());
        assert_eq!(backend.calls().set, 0);
    }

    #[tokio::test]
    async fn test_get_ignores_projects_sharing_the_prefix() {
        let (_, store) = setup();
        let nested = point(2500.0).with_project("a:ssr:2024-01-01");
        store.try_save(nested, Some(TS + 1)).await.unwrap();
        store.try_save(point(1800.0).with_project("a"), Some(TS)).await.unwrap();

        let found = store
            .try_get(RenderingStrategy::Ssr, Some("a"), jan(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.project_id, "a");
        assert_eq!(found.metrics.value(MetricName::Lcp), 1800.0);

        assert!(store
            .try_get(RenderingStrategy::Ssr, Some("a"), jan(2))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_partial_record_fails() {
        let raw = r#"{"timestamp":1,"strategy":"SSR","metrics":{"timestamp":"x"}}"#;
        assert!(decode_point("k", raw).is_err());
    }
}
