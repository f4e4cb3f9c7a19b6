//! Baseline & Anomaly Detector
//!
//! Each day is compared against the mean and sample standard deviation of the
//! same restaurant's earlier days. Thresholds are expressed relative to the
//! mean, so `deviation_percent` and the σ/μ bands share a unit.

use crate::config::BaselineConfig;
use crate::models::DailyMetricRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Relative tolerance under which a gap or spread counts as float noise
const FLAT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Watch,
    Bad,
    Critical,
    /// Not enough history to judge
    Unclassified,
}

impl Severity {
    /// Days that go on to attribution
    pub fn is_flagged(&self) -> bool {
        matches!(self, Severity::Watch | Severity::Bad | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Normal => "normal",
            Severity::Watch => "watch",
            Severity::Bad => "bad",
            Severity::Critical => "critical",
            Severity::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub observations: usize,
}

impl Baseline {
    /// Mean and sample (n-1) standard deviation
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self::default();
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std_dev = if n < 2 {
            0.0
        } else {
            let m2: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (m2 / (n - 1) as f64).sqrt()
        };
        Self {
            mean,
            std_dev,
            observations: n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub actual_sales: f64,
    /// Filled in at attribution time
    pub expected_sales: Option<f64>,
    pub baseline_mean: f64,
    pub deviation_percent: f64,
    pub severity: Severity,
}

/// Linear-interpolated percentile, `p` in [0, 100]
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Severity of `actual` against `baseline`; returns `(deviation_percent, severity)`.
///
/// `floor` is the low-percentile cut of the full series: anything under it
/// is critical regardless of σ.
pub fn classify(
    actual: f64,
    baseline: &Baseline,
    floor: Option<f64>,
    config: &BaselineConfig,
) -> (f64, Severity) {
    if baseline.mean <= 0.0 {
        let severity = if baseline.observations < config.min_observations {
            Severity::Unclassified
        } else {
            Severity::Normal
        };
        return (0.0, severity);
    }

    let tolerance = FLAT_TOLERANCE * baseline.mean;
    let deviation = if (actual - baseline.mean).abs() <= tolerance {
        0.0
    } else {
        (actual - baseline.mean) / baseline.mean * 100.0
    };
    if baseline.observations < config.min_observations {
        return (deviation, Severity::Unclassified);
    }
    if deviation >= 0.0 {
        return (deviation, Severity::Normal);
    }
    // Any drop below a flat history
    if baseline.std_dev <= tolerance {
        return (deviation, Severity::Critical);
    }

    let band = baseline.std_dev / baseline.mean * 100.0;
    let severity = if deviation <= -config.critical_sigma * band || floor.is_some_and(|p| actual < p) {
        Severity::Critical
    } else if deviation <= -config.bad_sigma * band {
        Severity::Bad
    } else if deviation <= -config.watch_sigma * band {
        Severity::Watch
    } else {
        Severity::Normal
    };
    (deviation, severity)
}

/// Classify every day of one restaurant's series (sorted by date) against
/// its trailing baseline.
pub fn detect(records: &[DailyMetricRecord], config: &BaselineConfig) -> Vec<AnomalyRecord> {
    let sales: Vec<f64> = records.iter().map(|r| r.total_sales()).collect();
    let floor = percentile(&sales, config.critical_percentile);

    let anomalies: Vec<AnomalyRecord> = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let start = config.window.map(|w| i.saturating_sub(w)).unwrap_or(0);
            let baseline = Baseline::from_values(&sales[start..i]);
            let (deviation_percent, severity) = classify(sales[i], &baseline, floor, config);
            AnomalyRecord {
                restaurant_id: record.restaurant_id,
                date: record.date,
                actual_sales: sales[i],
                expected_sales: None,
                baseline_mean: baseline.mean,
                deviation_percent,
                severity,
            }
        })
        .collect();

    debug!(
        days = anomalies.len(),
        flagged = anomalies.iter().filter(|a| a.severity.is_flagged()).count(),
        "Classified sales series"
    );
    anomalies
}
