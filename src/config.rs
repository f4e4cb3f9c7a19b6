//! Analysis configuration
//!
//! One `AnalysisConfig` drives every stage. All fields have defaults, so a
//! TOML file only needs the values it overrides.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub baseline: BaselineConfig,
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub attribution: AttributionConfig,
    pub recommendations: RecommendationConfig,
    pub enrichment: EnrichmentConfig,
    pub pipeline: PipelineConfig,
}

/// Severity thresholds, expressed as multiples of σ/μ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub min_observations: usize,
    /// Trailing window length in days; `None` uses all prior history.
    pub window: Option<usize>,
    pub watch_sigma: f64,
    pub bad_sigma: f64,
    pub critical_sigma: f64,
    pub critical_percentile: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_observations: 10,
            window: None,
            watch_sigma: 0.5,
            bad_sigma: 1.0,
            critical_sigma: 2.0,
            critical_percentile: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub min_history_days: usize,
    pub short_window: usize,
    pub long_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_history_days: 7,
            short_window: 7,
            long_window: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelScope {
    /// One model per restaurant.
    Restaurant,
    /// One model across every restaurant in the run.
    Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub feature_fraction: f64,
    pub seed: u64,
    pub validation_fraction: f64,
    pub min_training_rows: usize,
    pub low_confidence_r2: f64,
    pub scope: ModelScope,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_split: 5,
            min_samples_leaf: 2,
            feature_fraction: 0.6,
            seed: 42,
            validation_fraction: 0.2,
            min_training_rows: 100,
            low_confidence_r2: 0.3,
            scope: ModelScope::Market,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub permutations: usize,
    pub reference_rows: usize,
    pub top_n: usize,
    pub prediction_floor: f64,
    pub seed: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            permutations: 64,
            reference_rows: 32,
            top_n: 10,
            prediction_floor: 1.0,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub top_features: usize,
    /// Fraction of expected sales a contribution must exceed to be actionable.
    pub materiality: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            top_features: 3,
            materiality: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub default_latitude: f64,
    pub default_longitude: f64,
    pub default_zone: String,
    /// Decimal places kept when building weather cache keys.
    pub coordinate_precision: u32,
    pub neutral_temperature: f64,
    pub neutral_precipitation: f64,
    pub neutral_wind_speed: f64,
    pub requests_per_window: u32,
    pub window_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub request_timeout_secs: u64,
    pub weather_base_url: String,
    pub timezone: String,
    /// Skip outbound weather calls entirely; cache hits or neutral defaults only.
    pub offline: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            default_latitude: -8.4095,
            default_longitude: 115.1889,
            default_zone: "central".to_string(),
            coordinate_precision: 2,
            neutral_temperature: 28.0,
            neutral_precipitation: 0.0,
            neutral_wind_speed: 5.0,
            requests_per_window: 5,
            window_ms: 1000,
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            request_timeout_secs: 20,
            weather_base_url: "https://archive-api.open-meteo.com/v1/archive".to_string(),
            timezone: "Asia/Makassar".to_string(),
            offline: false,
        }
    }
}

impl EnrichmentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Days of history loaded before the analysed range for baselines,
    /// lag features and training.
    pub lookback_days: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lookback_days: 365,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AnalysisConfig =
            toml::from_str(raw).map_err(|e| AnalysisError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.baseline;
        if b.min_observations < 2 {
            return Err(AnalysisError::Config(
                "baseline.min_observations must be at least 2".into(),
            ));
        }
        if b.window.is_some_and(|w| w < b.min_observations) {
            return Err(AnalysisError::Config(
                "baseline.window must cover baseline.min_observations".into(),
            ));
        }
        if !(0.0 < b.watch_sigma && b.watch_sigma < b.bad_sigma && b.bad_sigma < b.critical_sigma) {
            return Err(AnalysisError::Config(
                "severity multipliers must satisfy 0 < watch < bad < critical".into(),
            ));
        }
        if !(0.0..100.0).contains(&b.critical_percentile) {
            return Err(AnalysisError::Config(
                "baseline.critical_percentile must be in [0, 100)".into(),
            ));
        }

        let f = &self.features;
        if f.short_window == 0 || f.long_window < f.short_window {
            return Err(AnalysisError::Config(
                "features windows must satisfy 0 < short_window <= long_window".into(),
            ));
        }

        let m = &self.model;
        if m.n_trees == 0 || m.max_depth == 0 || m.min_samples_leaf == 0 {
            return Err(AnalysisError::Config(
                "model.n_trees, max_depth and min_samples_leaf must be positive".into(),
            ));
        }
        if !(m.feature_fraction > 0.0 && m.feature_fraction <= 1.0) {
            return Err(AnalysisError::Config(
                "model.feature_fraction must be in (0, 1]".into(),
            ));
        }
        if !(m.validation_fraction > 0.0 && m.validation_fraction < 1.0) {
            return Err(AnalysisError::Config(
                "model.validation_fraction must be in (0, 1)".into(),
            ));
        }

        let a = &self.attribution;
        if a.permutations == 0 || a.reference_rows == 0 || a.top_n == 0 {
            return Err(AnalysisError::Config(
                "attribution.permutations, reference_rows and top_n must be positive".into(),
            ));
        }
        if a.prediction_floor <= 0.0 {
            return Err(AnalysisError::Config(
                "attribution.prediction_floor must be positive".into(),
            ));
        }

        let r = &self.recommendations;
        if !(r.materiality > 0.0 && r.materiality < 1.0) {
            return Err(AnalysisError::Config(
                "recommendations.materiality must be in (0, 1)".into(),
            ));
        }

        let e = &self.enrichment;
        if e.requests_per_window == 0 || e.window_ms == 0 || e.max_attempts == 0 {
            return Err(AnalysisError::Config(
                "enrichment rate limit and attempts must be positive".into(),
            ));
        }

        if self.pipeline.workers == 0 {
            return Err(AnalysisError::Config("pipeline.workers must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.baseline.min_observations, 10);
        assert_eq!(config.model.min_training_rows, 100);
        assert_eq!(config.attribution.top_n, 10);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [model]
            n_trees = 25
            scope = "restaurant"

            [pipeline]
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.model.n_trees, 25);
        assert_eq!(config.model.scope, ModelScope::Restaurant);
        assert_eq!(config.model.max_depth, 12);
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.features.long_window, 30);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = AnalysisConfig::from_toml_str(
            r#"
            [baseline]
            bad_sigma = 3.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AnalysisConfig::default();
        config.pipeline.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.toml");
        std::fs::write(&path, "[recommendations]\nmateriality = 0.1\n").unwrap();
        let config = AnalysisConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.recommendations.materiality, 0.1);
    }
}
