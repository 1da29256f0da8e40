//! Split-window regression heuristic
//!
//! The points of a trailing window, oldest first, are cut in half by
//! position: the first half is the baseline, the second half is current.
//! A metric regresses when its mean grew by more than the threshold. All
//! metrics are "lower is better", so only increases are reported.

use crate::types::{HistoricalDataPoint, MetricName, MetricStats, RegressionFinding};

/// Default fractional increase that counts as a regression
pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 0.2;

/// Default trailing window
pub const DEFAULT_REGRESSION_WINDOW_DAYS: u32 = 7;

/// Compare the newer half of `points` against the older half
///
/// `points` must be sorted by timestamp. Fewer than two points yield no
/// findings; a metric with a zero baseline is skipped.
pub fn find_regressions(points: &[HistoricalDataPoint], threshold: f64) -> Vec<RegressionFinding> {
    if points.len() < 2 {
        return vec![];
    }

    let (baseline_half, current_half) = points.split_at(points.len() / 2);

    MetricName::ALL
        .iter()
        .filter_map(|&metric| {
            let baseline = mean(baseline_half, metric);
            let current = mean(current_half, metric);
            if baseline == 0.0 {
                return None;
            }

            let change = (current - baseline) / baseline;
            (change > threshold).then_some(RegressionFinding {
                metric,
                baseline,
                current,
                change,
            })
        })
        .collect()
}

fn mean(points: &[HistoricalDataPoint], metric: MetricName) -> f64 {
    let values: Vec<f64> = points.iter().map(|p| p.metrics.value(metric)).collect();
    MetricStats::from_values(&values).avg
}
