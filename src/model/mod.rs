//! Predictive Model
//!
//! Expected sales from a feature vector. Quality is measured on a seeded
//! 80/20 holdout; the model that is kept is refit on every row.

pub mod forest;

use crate::config::{ModelConfig, ModelScope};
use crate::error::{AnalysisError, Result};
use crate::features::FeatureVector;
use forest::RandomForest;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelQuality {
    pub r2: f64,
    pub mean_absolute_error: f64,
    pub training_rows: usize,
    pub validation_rows: usize,
    pub low_confidence: bool,
    pub scope: ModelScope,
}

#[derive(Debug, Clone)]
pub struct SalesModel {
    forest: RandomForest,
    feature_names: &'static [&'static str],
    quality: ModelQuality,
}

fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

impl SalesModel {
    /// Train on `vectors[i] -> targets[i]`.
    ///
    /// Fails with `InsufficientTrainingData` below `config.min_training_rows`.
    /// Not re-entrant: each call builds a fresh model.
    pub fn train(vectors: &[FeatureVector], targets: &[f64], config: &ModelConfig) -> Result<Self> {
        let available = vectors.len().min(targets.len());
        if available < config.min_training_rows.max(2) {
            return Err(AnalysisError::InsufficientTrainingData {
                available,
                required: config.min_training_rows.max(2),
            });
        }
        if vectors.len() != targets.len() {
            return Err(AnalysisError::FeatureSchemaMismatch {
                expected: vectors.len(),
                actual: targets.len(),
            });
        }

        let feature_names = vectors[0].names();
        if let Some(bad) = vectors.iter().find(|v| v.names() != feature_names) {
            return Err(AnalysisError::FeatureSchemaMismatch {
                expected: feature_names.len(),
                actual: bad.len(),
            });
        }

        let x: Vec<Vec<f64>> = vectors.iter().map(|v| v.values().to_vec()).collect();

        // Holdout evaluation
        let mut order: Vec<usize> = (0..x.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(config.seed));
        let validation_rows = ((x.len() as f64 * config.validation_fraction).round() as usize)
            .clamp(1, x.len() - 1);
        let (val_idx, train_idx) = order.split_at(validation_rows);

        let train_x: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
        let train_y: Vec<f64> = train_idx.iter().map(|&i| targets[i]).collect();
        let holdout = RandomForest::fit(&train_x, &train_y, config);

        let val_y: Vec<f64> = val_idx.iter().map(|&i| targets[i]).collect();
        let val_pred: Vec<f64> = val_idx.iter().map(|&i| holdout.predict(&x[i])).collect();
        let r2 = r_squared(&val_y, &val_pred);
        let mae = mean_absolute_error(&val_y, &val_pred);

        let forest = RandomForest::fit(&x, targets, config);
        let quality = ModelQuality {
            r2,
            mean_absolute_error: mae,
            training_rows: train_idx.len(),
            validation_rows,
            low_confidence: r2 < config.low_confidence_r2,
            scope: config.scope,
        };

        if quality.low_confidence {
            warn!(r2, threshold = config.low_confidence_r2, "Model flagged low confidence");
        }
        info!(
            rows = x.len(),
            r2,
            mae,
            trees = config.n_trees,
            "Sales model trained"
        );

        let model = Self {
            forest,
            feature_names,
            quality,
        };
        for (name, importance) in model.feature_importances().iter().take(5) {
            debug!(feature = name, importance, "Feature importance");
        }
        Ok(model)
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<f64> {
        self.check_schema(vector)?;
        Ok(self.forest.predict(vector.values()))
    }

    /// Prediction on raw values already known to follow the model schema
    pub(crate) fn predict_values(&self, values: &[f64]) -> f64 {
        self.forest.predict(values)
    }

    pub fn check_schema(&self, vector: &FeatureVector) -> Result<()> {
        if vector.names() != self.feature_names {
            return Err(AnalysisError::FeatureSchemaMismatch {
                expected: self.feature_names.len(),
                actual: vector.len(),
            });
        }
        Ok(())
    }

    pub fn quality(&self) -> &ModelQuality {
        &self.quality
    }

    pub fn feature_names(&self) -> &'static [&'static str] {
        self.feature_names
    }

    /// Impurity importances, most important first
    pub fn feature_importances(&self) -> Vec<(&'static str, f64)> {
        let mut ranked: Vec<(&'static str, f64)> = self
            .feature_names
            .iter()
            .copied()
            .zip(self.forest.importances().iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Train on the blocking pool and hand back a shareable model
pub async fn train_shared(
    vectors: Vec<FeatureVector>,
    targets: Vec<f64>,
    config: ModelConfig,
) -> Result<Arc<SalesModel>> {
    let model =
        tokio::task::spawn_blocking(move || SalesModel::train(&vectors, &targets, &config)).await??;
    Ok(Arc::new(model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_NAMES;

    static TOY_SCHEMA: [&str; 3] = ["marketing_spend", "closed", "noise"];

    fn toy_rows(n: usize) -> (Vec<FeatureVector>, Vec<f64>) {
        let mut vectors = Vec::new();
        let mut targets = Vec::new();
        for i in 0..n {
            let spend = (i % 20) as f64 * 10.0;
            let closed = if i % 17 == 0 { 1.0 } else { 0.0 };
            let noise = ((i * 31) % 7) as f64;
            let sales = if closed == 1.0 { 0.0 } else { 1_000.0 + spend * 5.0 };
            vectors.push(FeatureVector::with_schema(&TOY_SCHEMA, vec![spend, closed, noise]).unwrap());
            targets.push(sales);
        }
        (vectors, targets)
    }

    fn fast_config() -> ModelConfig {
        ModelConfig {
            n_trees: 30,
            feature_fraction: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_too_few_rows_rejected() {
        let (vectors, targets) = toy_rows(99);
        let err = SalesModel::train(&vectors, &targets, &fast_config()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientTrainingData { available: 99, required: 100 }
        ));
    }

    #[test]
    fn test_fits_learnable_signal() {
        let (vectors, targets) = toy_rows(400);
        let model = SalesModel::train(&vectors, &targets, &fast_config()).unwrap();
        let quality = model.quality();
        assert!(quality.r2 > 0.8, "r2 = {}", quality.r2);
        assert!(!quality.low_confidence);
        assert_eq!(quality.validation_rows, 80);
        assert_eq!(quality.training_rows, 320);

        let closed = FeatureVector::with_schema(&TOY_SCHEMA, vec![100.0, 1.0, 3.0]).unwrap();
        assert!(model.predict(&closed).unwrap() < 200.0);
        assert_eq!(model.feature_importances()[2].0, "noise");
    }

    #[test]
    fn test_noise_target_is_low_confidence() {
        let (vectors, _) = toy_rows(200);
        // Target unrelated to any feature
        let targets: Vec<f64> = (0..200).map(|i| ((i * 7_919) % 1_000) as f64).collect();
        let model = SalesModel::train(&vectors, &targets, &fast_config()).unwrap();
        assert!(model.quality().low_confidence);
    }

    #[test]
    fn test_schema_mismatch_on_predict() {
        let (vectors, targets) = toy_rows(150);
        let model = SalesModel::train(&vectors, &targets, &fast_config()).unwrap();
        let other = FeatureVector::new(vec![0.0; FEATURE_NAMES.len()]).unwrap();
        assert!(matches!(
            model.predict(&other),
            Err(AnalysisError::FeatureSchemaMismatch { expected: 3, actual: 22 })
        ));
    }

    #[tokio::test]
    async fn test_train_shared_runs_off_runtime() {
        let (vectors, targets) = toy_rows(120);
        let model = train_shared(vectors, targets, fast_config()).await.unwrap();
        assert_eq!(model.feature_names().len(), 3);
    }
}
