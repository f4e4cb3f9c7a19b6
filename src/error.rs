//! Error taxonomy for the attribution pipeline.
//!
//! Data-sufficiency failures are typed so callers can pick a documented
//! fallback instead of crashing. Enrichment failures are recovered locally and
//! only show up as `*_estimated` flags on the snapshot.

use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Restaurant not found: {0}")]
    RestaurantNotFound(String),

    #[error("Insufficient history for {date}: {available} prior days, need {required}")]
    InsufficientHistory {
        date: NaiveDate,
        available: usize,
        required: usize,
    },

    #[error("Insufficient training data: {available} labeled rows, need {required}")]
    InsufficientTrainingData { available: usize, required: usize },

    #[error("Weather provider unavailable: {0}")]
    WeatherProviderUnavailable(String),

    #[error("Feature schema mismatch: expected {expected} features, got {actual}")]
    FeatureSchemaMismatch { expected: usize, actual: usize },

    #[error("Batch cancelled after {completed} of {total} units")]
    Cancelled { completed: usize, total: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AnalysisError {
    /// Errors the pipeline answers with a fallback rather than aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::InsufficientHistory { .. }
                | AnalysisError::InsufficientTrainingData { .. }
                | AnalysisError::WeatherProviderUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = AnalysisError::InsufficientTrainingData {
            available: 12,
            required: 100,
        };
        assert!(err.is_recoverable());
        assert!(!AnalysisError::RestaurantNotFound("Ika Canggu".into()).is_recoverable());
    }

    #[test]
    fn test_messages_carry_counts() {
        let err = AnalysisError::InsufficientTrainingData {
            available: 12,
            required: 100,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient training data: 12 labeled rows, need 100"
        );
    }
}
