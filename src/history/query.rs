//! Range query engine
//!
//! Discovery by pattern listing, one batched read, then exact filtering and
//! ordering in process. The backend is never asked to filter.

use super::keys::{parse_point_key, point_pattern};
use super::store::decode_point;
use crate::backend::KvBackend;
use crate::error::StoreError;
use crate::types::{HistoricalDataPoint, RenderingStrategy, TimeRange, TimeRangeQuery};

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

/// Executes time range queries over stored data points
pub struct RangeQueryEngine {
    backend: Arc<dyn KvBackend>,
    default_project_id: String,
}

impl RangeQueryEngine {
    /// Create an engine over `backend`
    pub fn new(backend: Arc<dyn KvBackend>, default_project_id: impl Into<String>) -> Self {
        Self {
            backend,
            default_project_id: default_project_id.into(),
        }
    }

    /// Points whose timestamp lies in `[query.start, query.end]`, oldest first
    ///
    /// Without a strategy every known strategy is listed, one pattern each.
    pub async fn try_query(
        &self,
        query: &TimeRangeQuery,
    ) -> Result<Vec<HistoricalDataPoint>, StoreError> {
        let range = TimeRange::new(query.start, query.end)?;
        let project_id = query
            .project_id
            .as_deref()
            .unwrap_or(&self.default_project_id);

        let strategies: &[RenderingStrategy] = match &query.strategy {
            Some(strategy) => std::slice::from_ref(strategy),
            None => &RenderingStrategy::ALL,
        };

        let mut keys = Vec::new();
        for &strategy in strategies {
            let found = self
                .backend
                .list_keys(&point_pattern(strategy, project_id))
                .await?;
            keys.extend(found);
        }

        let listed = keys.len();
        let (first_day, last_day) = range.days();
        keys.retain(|key| key_may_match(key, project_id, first_day, last_day));

        debug!(
            project_id,
            listed,
            candidates = keys.len(),
            start = range.start,
            end = range.end,
            "Resolved candidate keys"
        );

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.backend.multi_get(&keys).await?;
        if values.len() != keys.len() {
            return Err(StoreError::Backend(format!(
                "multi-get returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        let mut points = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            // Expired or deleted between listing and fetching
            let Some(raw) = value else { continue };
            let point = decode_point(key, &raw)?;
            if range.contains(point.timestamp) {
                points.push(point);
            }
        }

        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }
}

/// Cheap pre-filter on the key alone; unparsable keys are kept
fn key_may_match(key: &str, project_id: &str, first_day: NaiveDate, last_day: NaiveDate) -> bool {
    match parse_point_key(key) {
        Some(parsed) => {
            parsed.project_id == project_id && parsed.date >= first_day && parsed.date <= last_day
        },
        None => true,
    }
}
