//! Attribution Engine
//!
//! Splits a prediction into per-feature contributions with sampled
//! permutation Shapley values. For each sampled ordering, features are
//! switched one at a time from a reference row to the explained row, and
//! each feature is credited with the change in prediction it caused. Within
//! one ordering the credits telescope, so the contributions always add up
//! to `prediction - base_value` exactly.

use crate::anomaly::AnomalyRecord;
use crate::config::AttributionConfig;
use crate::error::Result;
use crate::features::FeatureVector;
use crate::model::SalesModel;
use crate::models::ExternalFactorSnapshot;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub feature: String,
    pub value: f64,
    pub amount: f64,
}

/// Everything that lowers trust in a result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttributionFlags {
    pub low_confidence: bool,
    pub prediction_unreliable: bool,
    pub weather_estimated: bool,
    pub location_estimated: bool,
    pub lag_features_imputed: bool,
    pub rule_based: bool,
}

impl AttributionFlags {
    pub fn with_snapshot(mut self, snapshot: &ExternalFactorSnapshot) -> Self {
        self.weather_estimated |= snapshot.weather_estimated;
        self.location_estimated |= snapshot.location_estimated;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionResult {
    /// `expected_sales` is always set here
    pub anomaly: AnomalyRecord,
    /// Largest absolute amount first
    pub contributions: Vec<Contribution>,
    pub unexplained_residual: f64,
    /// Mean prediction over the reference rows
    pub base_value: f64,
    pub flags: AttributionFlags,
}

impl AttributionResult {
    pub fn expected_sales(&self) -> f64 {
        self.anomaly
            .expected_sales
            .unwrap_or(self.anomaly.baseline_mean)
    }

    pub fn gap(&self) -> f64 {
        self.anomaly.actual_sales - self.expected_sales()
    }

    pub fn explained(&self) -> f64 {
        self.contributions.iter().map(|c| c.amount).sum()
    }

    pub fn confidence(&self) -> Confidence {
        let f = &self.flags;
        if f.low_confidence || f.prediction_unreliable || f.rule_based {
            Confidence::Low
        } else if f.weather_estimated || f.location_estimated || f.lag_features_imputed {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }
}

/// Deterministic subset of at most `n` rows to use as Shapley references
pub fn select_references(history: &[FeatureVector], n: usize, seed: u64) -> Vec<FeatureVector> {
    if history.len() <= n {
        return history.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked: Vec<usize> = index::sample(&mut rng, history.len(), n).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| history[i].clone()).collect()
}

/// Sampled Shapley values of `model` at `x`. Permutation `m` uses reference
/// row `m % references.len()`. Returns `(per-feature values, base_value)`.
pub fn shapley_values(
    model: &SalesModel,
    x: &[f64],
    references: &[Vec<f64>],
    permutations: usize,
    seed: u64,
) -> (Vec<f64>, f64) {
    let d = x.len();
    let mut phi = vec![0.0; d];
    if references.is_empty() || permutations == 0 {
        return (phi, model.predict_values(x));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..d).collect();
    let mut base_sum = 0.0;

    for m in 0..permutations {
        let reference = &references[m % references.len()];
        order.shuffle(&mut rng);

        let mut z = reference.clone();
        let mut previous = model.predict_values(&z);
        base_sum += previous;
        for &j in &order {
            if z[j] == x[j] {
                continue;
            }
            z[j] = x[j];
            let current = model.predict_values(&z);
            phi[j] += current - previous;
            previous = current;
        }
    }

    let m = permutations as f64;
    for v in phi.iter_mut() {
        *v /= m;
    }
    (phi, base_sum / m)
}

/// Decompose one flagged day.
///
/// `references` are historical vectors of the same restaurant. The expected
/// value is the model prediction, clamped to `prediction_floor` when it is
/// not a positive finite number.
pub fn attribute(
    anomaly: &AnomalyRecord,
    vector: &FeatureVector,
    model: &SalesModel,
    references: &[FeatureVector],
    config: &AttributionConfig,
) -> Result<AttributionResult> {
    model.check_schema(vector)?;
    for reference in references {
        model.check_schema(reference)?;
    }

    let mut flags = AttributionFlags {
        low_confidence: model.quality().low_confidence,
        lag_features_imputed: vector.lag_imputed(),
        ..Default::default()
    };

    let raw = model.predict(vector)?;
    let expected = if raw.is_finite() && raw > 0.0 {
        raw
    } else {
        warn!(date = %anomaly.date, prediction = raw, "Prediction unreliable, clamping");
        flags.prediction_unreliable = true;
        config.prediction_floor
    };

    let reference_rows: Vec<Vec<f64>> = references.iter().map(|r| r.values().to_vec()).collect();
    if reference_rows.is_empty() {
        flags.low_confidence = true;
    }
    let (phi, base_value) = shapley_values(
        model,
        vector.values(),
        &reference_rows,
        config.permutations,
        config.seed,
    );

    let mut contributions: Vec<Contribution> = vector
        .iter()
        .zip(phi)
        .filter(|(_, amount)| *amount != 0.0)
        .map(|((feature, value), amount)| Contribution {
            feature: feature.to_string(),
            value,
            amount,
        })
        .collect();
    contributions.sort_by(|a, b| b.amount.abs().total_cmp(&a.amount.abs()));
    contributions.truncate(config.top_n);

    let mut anomaly = anomaly.clone();
    anomaly.expected_sales = Some(expected);
    let reported: f64 = contributions.iter().map(|c| c.amount).sum();
    let unexplained_residual = anomaly.actual_sales - expected - reported;

    debug!(
        date = %anomaly.date,
        expected,
        base_value,
        reported,
        residual = unexplained_residual,
        "Attributed anomaly"
    );

    Ok(AttributionResult {
        anomaly,
        contributions,
        unexplained_residual,
        base_value,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::Severity;
    use crate::config::ModelConfig;
    use chrono::NaiveDate;

    static SCHEMA: [&str; 3] = ["closed", "precipitation", "marketing_spend"];

    fn vector(closed: f64, rain: f64, spend: f64) -> FeatureVector {
        FeatureVector::with_schema(&SCHEMA, vec![closed, rain, spend]).unwrap()
    }

    fn sales(closed: f64, rain: f64, spend: f64) -> f64 {
        if closed == 1.0 {
            0.0
        } else {
            1_000_000.0 - rain * 10_000.0 + spend * 2.0
        }
    }

    fn trained(targets_scale: f64) -> (SalesModel, Vec<FeatureVector>) {
        let mut vectors = Vec::new();
        let mut targets = Vec::new();
        for i in 0..160 {
            let closed = if i % 23 == 0 { 1.0 } else { 0.0 };
            let rain = (i % 8) as f64 * 3.0;
            let spend = (i % 5) as f64 * 20_000.0;
            vectors.push(vector(closed, rain, spend));
            targets.push(sales(closed, rain, spend) * targets_scale);
        }
        let config = ModelConfig {
            n_trees: 25,
            feature_fraction: 1.0,
            ..Default::default()
        };
        let model = SalesModel::train(&vectors, &targets, &config).unwrap();
        (model, vectors)
    }

    fn anomaly(actual: f64) -> AnomalyRecord {
        AnomalyRecord {
            restaurant_id: 1,
            date: NaiveDate::from_ymd_opt(2025, 5, 18).unwrap(),
            actual_sales: actual,
            expected_sales: None,
            baseline_mean: 1_000_000.0,
            deviation_percent: (actual - 1_000_000.0) / 10_000.0,
            severity: Severity::Critical,
        }
    }

    #[test]
    fn test_contributions_plus_residual_close_the_gap() {
        let (model, history) = trained(1.0);
        let refs = select_references(&history, 32, 7);
        let x = vector(0.0, 21.0, 0.0);
        let result = attribute(&anomaly(700_000.0), &x, &model, &refs, &AttributionConfig::default()).unwrap();

        let lhs = result.explained() + result.unexplained_residual;
        assert!((lhs - result.gap()).abs() < 1e-6);
        assert_eq!(result.anomaly.expected_sales, Some(model.predict(&x).unwrap()));
    }

    #[test]
    fn test_shapley_sums_to_prediction_minus_base() {
        let (model, history) = trained(1.0);
        let refs: Vec<Vec<f64>> = select_references(&history, 16, 3)
            .iter()
            .map(|v| v.values().to_vec())
            .collect();
        let x = [1.0, 6.0, 40_000.0];
        let (phi, base) = shapley_values(&model, &x, &refs, 48, 11);
        let total: f64 = phi.iter().sum();
        assert!((total - (model.predict_values(&x) - base)).abs() < 1e-6);
    }

    #[test]
    fn test_closure_dominates_closed_day() {
        let (model, history) = trained(1.0);
        let refs = select_references(&history, 32, 7);
        let result = attribute(&anomaly(0.0), &vector(1.0, 0.0, 0.0), &model, &refs, &AttributionConfig::default()).unwrap();
        assert_eq!(result.contributions[0].feature, "closed");
        assert!(result.contributions[0].amount < 0.0);
    }

    #[test]
    fn test_non_positive_prediction_is_clamped() {
        let (model, history) = trained(0.0);
        let refs = select_references(&history, 8, 1);
        let config = AttributionConfig::default();
        let result = attribute(&anomaly(500.0), &vector(0.0, 3.0, 0.0), &model, &refs, &config).unwrap();
        assert!(result.flags.prediction_unreliable);
        assert_eq!(result.expected_sales(), config.prediction_floor);
        assert_eq!(result.confidence(), Confidence::Low);
        assert!((result.explained() + result.unexplained_residual - result.gap()).abs() < 1e-9);
    }

    #[test]
    fn test_truncation_keeps_invariant() {
        let (model, history) = trained(1.0);
        let refs = select_references(&history, 32, 7);
        let config = AttributionConfig {
            top_n: 1,
            ..Default::default()
        };
        let result = attribute(&anomaly(650_000.0), &vector(0.0, 21.0, 80_000.0), &model, &refs, &config).unwrap();
        assert!(result.contributions.len() <= 1);
        assert!((result.explained() + result.unexplained_residual - result.gap()).abs() < 1e-6);
    }

    #[test]
    fn test_reference_selection_is_deterministic() {
        let (_, history) = trained(1.0);
        let a = select_references(&history, 10, 5);
        let b = select_references(&history, 10, 5);
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
        assert_eq!(select_references(&history[..4], 10, 5).len(), 4);
    }

    #[test]
    fn test_confidence_levels() {
        let (model, history) = trained(1.0);
        let refs = select_references(&history, 8, 7);
        let mut result = attribute(&anomaly(800_000.0), &vector(0.0, 9.0, 0.0), &model, &refs, &AttributionConfig::default()).unwrap();
        result.flags.low_confidence = false;
        assert_eq!(result.confidence(), Confidence::High);
        result.flags.weather_estimated = true;
        assert_eq!(result.confidence(), Confidence::Medium);
        result.flags.rule_based = true;
        assert_eq!(result.confidence(), Confidence::Low);
    }
}
