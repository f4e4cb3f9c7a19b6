//! Recommendation Generator
//!
//! Maps the largest material contributions of an attribution onto a fixed
//! catalog of actions, one entry per feature category.

use crate::attribution::AttributionResult;
use crate::config::RecommendationConfig;
use crate::features::FeatureCategory;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// `None` for the "no dominant factor" entry
    pub category: Option<FeatureCategory>,
    pub feature: Option<String>,
    pub message: String,
    pub recoverable_value: f64,
}

struct CatalogEntry {
    action: &'static str,
    sustain: &'static str,
    recovery_rate: f64,
}

fn catalog(category: FeatureCategory) -> CatalogEntry {
    match category {
        FeatureCategory::Operational => CatalogEntry {
            action: "Fix store availability: keep the outlet open and online on every platform, restock menu items and add kitchen capacity at peak hours",
            sustain: "Operations supported sales; keep current opening hours and staffing",
            recovery_rate: 0.9,
        },
        FeatureCategory::Quality => CatalogEntry {
            action: "Review recent ratings and cancellations; address the most frequent complaint and tighten order acceptance",
            sustain: "Service quality lifted sales; keep current standards",
            recovery_rate: 0.6,
        },
        FeatureCategory::Marketing => CatalogEntry {
            action: "Rebalance ad spend toward campaigns with the best return on ad spend",
            sustain: "Marketing performed well; keep the current campaign mix",
            recovery_rate: 0.5,
        },
        FeatureCategory::Weather => CatalogEntry {
            action: "Run bad-weather promotions and delivery-fee discounts on rainy or windy days",
            sustain: "Weather favoured demand; staff up for similar days",
            recovery_rate: 0.2,
        },
        FeatureCategory::Holiday => CatalogEntry {
            action: "Plan holiday menus and promotions ahead of the calendar",
            sustain: "Holiday demand helped; repeat the preparation next year",
            recovery_rate: 0.1,
        },
        FeatureCategory::Seasonality => CatalogEntry {
            action: "Expect the seasonal and weekday pattern; adjust prep and staffing to the usual dip",
            sustain: "Seasonal pattern favoured sales; plan capacity for it",
            recovery_rate: 0.1,
        },
    }
}

const NO_DOMINANT_FACTOR: &str =
    "No dominant factor identified; the deviation is spread across many small effects";

pub fn recommend(result: &AttributionResult, config: &RecommendationConfig) -> Vec<Recommendation> {
    let threshold = config.materiality * result.expected_sales().abs();

    let recommendations: Vec<Recommendation> = result
        .contributions
        .iter()
        .take(config.top_features)
        .filter(|c| c.amount.abs() > threshold)
        .map(|c| {
            let category = FeatureCategory::of(&c.feature);
            let entry = catalog(category);
            let (message, recoverable_value) = if c.amount < 0.0 {
                (entry.action, -c.amount * entry.recovery_rate)
            } else {
                (entry.sustain, 0.0)
            };
            Recommendation {
                category: Some(category),
                feature: Some(c.feature.clone()),
                message: format!("{} [{}]", message, c.feature),
                recoverable_value,
            }
        })
        .collect();

    if recommendations.is_empty() {
        return vec![Recommendation {
            category: None,
            feature: None,
            message: NO_DOMINANT_FACTOR.to_string(),
            recoverable_value: 0.0,
        }];
    }
    recommendations
}
