//! Rule-based scoring used when no model could be trained.
//!
//! Expected sales is the baseline mean. Each rule that fires contributes a
//! fixed fraction of it. Results are always marked `rule_based` and
//! `low_confidence`.

use crate::anomaly::AnomalyRecord;
use crate::attribution::{AttributionFlags, AttributionResult, Contribution};
use crate::config::AttributionConfig;
use crate::features::DEFAULT_RATING;
use crate::models::{DailyMetricRecord, ExternalFactorSnapshot};
use tracing::debug;

/// (threshold in mm, fraction of expected sales lost)
const RAIN_RULES: [(f64, f64); 4] = [(15.0, 0.30), (10.0, 0.25), (5.0, 0.15), (1.0, 0.08)];
/// (threshold in m/s, fraction lost)
const WIND_RULES: [(f64, f64); 2] = [(15.0, 0.10), (10.0, 0.05)];

const CLOSED_IMPACT: f64 = 1.0;
const OUT_OF_STOCK_IMPACT: f64 = 0.15;
const OVERLOADED_IMPACT: f64 = 0.10;
const SINGLE_PLATFORM_IMPACT: f64 = 0.40;
const HOT_DAY_CELSIUS: f64 = 35.0;
const HOT_DAY_IMPACT: f64 = 0.05;
const COOL_DAY_CELSIUS: f64 = 20.0;
const COOL_DAY_IMPACT: f64 = 0.03;
const HOLIDAY_IMPACT: f64 = 0.10;
const CANCELLATION_TOLERANCE: f64 = 0.10;
const RATING_IMPACT_PER_POINT: f64 = 0.10;

fn first_band(value: f64, rules: &[(f64, f64)]) -> Option<f64> {
    rules.iter().find(|(limit, _)| value > *limit).map(|(_, f)| *f)
}

pub struct RuleBasedScorer {
    config: AttributionConfig,
}

impl RuleBasedScorer {
    pub fn new(config: AttributionConfig) -> Self {
        Self { config }
    }

    /// Fractions of expected sales lost, as (feature, feature value, fraction)
    fn fired_rules(
        &self,
        record: &DailyMetricRecord,
        snapshot: &ExternalFactorSnapshot,
        typical_platforms: usize,
    ) -> Vec<(&'static str, f64, f64)> {
        let flags = record.operational_flags;
        if flags.closed {
            return vec![("closed", 1.0, CLOSED_IMPACT)];
        }

        let mut fired = Vec::new();
        if flags.out_of_stock {
            fired.push(("out_of_stock", 1.0, OUT_OF_STOCK_IMPACT));
        }
        if flags.overloaded {
            fired.push(("overloaded", 1.0, OVERLOADED_IMPACT));
        }
        let active = record.platforms_active();
        if active == 1 && typical_platforms > 1 {
            fired.push(("platforms_active", active as f64, SINGLE_PLATFORM_IMPACT));
        }

        if let Some(f) = first_band(snapshot.precipitation, &RAIN_RULES) {
            let impact = f * snapshot.zone.weather_sensitivity();
            fired.push(("precipitation", snapshot.precipitation, impact));
        }
        if let Some(f) = first_band(snapshot.wind_speed, &WIND_RULES) {
            fired.push(("wind_speed", snapshot.wind_speed, f));
        }
        if snapshot.temperature > HOT_DAY_CELSIUS {
            fired.push(("temperature", snapshot.temperature, HOT_DAY_IMPACT));
        } else if snapshot.temperature < COOL_DAY_CELSIUS {
            fired.push(("temperature", snapshot.temperature, COOL_DAY_IMPACT));
        }

        if snapshot.is_holiday() {
            let weight = snapshot.holiday_weight();
            fired.push(("holiday_weight", weight, HOLIDAY_IMPACT * weight));
        }

        if record.cancellation_rate > CANCELLATION_TOLERANCE {
            fired.push((
                "cancellation_rate",
                record.cancellation_rate,
                record.cancellation_rate - CANCELLATION_TOLERANCE,
            ));
        }
        if let Some(rating) = record.rating.filter(|r| *r < DEFAULT_RATING) {
            fired.push((
                "rating",
                rating,
                (DEFAULT_RATING - rating) * RATING_IMPACT_PER_POINT,
            ));
        }
        fired
    }

    /// `typical_platforms` is how many platforms the restaurant usually
    /// sells on; a drop to one is treated as a platform outage.
    pub fn score(
        &self,
        anomaly: &AnomalyRecord,
        record: &DailyMetricRecord,
        snapshot: &ExternalFactorSnapshot,
        typical_platforms: usize,
    ) -> AttributionResult {
        let mut flags = AttributionFlags {
            rule_based: true,
            low_confidence: true,
            ..Default::default()
        }
        .with_snapshot(snapshot);

        let expected = if anomaly.baseline_mean.is_finite() && anomaly.baseline_mean > 0.0 {
            anomaly.baseline_mean
        } else {
            flags.prediction_unreliable = true;
            self.config.prediction_floor
        };

        let mut contributions: Vec<Contribution> = self
            .fired_rules(record, snapshot, typical_platforms)
            .into_iter()
            .map(|(feature, value, fraction)| Contribution {
                feature: feature.to_string(),
                value,
                amount: -fraction * expected,
            })
            .collect();
        contributions.sort_by(|a, b| b.amount.abs().total_cmp(&a.amount.abs()));
        contributions.truncate(self.config.top_n);

        let mut anomaly = anomaly.clone();
        anomaly.expected_sales = Some(expected);
        let reported: f64 = contributions.iter().map(|c| c.amount).sum();
        let unexplained_residual = anomaly.actual_sales - expected - reported;
        debug!(date = %anomaly.date, rules = contributions.len(), "Rule-based attribution");

        AttributionResult {
            anomaly,
            contributions,
            unexplained_residual,
            base_value: expected,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::Severity;
    use crate::attribution::Confidence;
    use crate::models::{HolidayType, OperationalFlags, Platform, Zone};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 18).unwrap()
    }

    fn record(grab: f64, gojek: f64) -> DailyMetricRecord {
        DailyMetricRecord {
            restaurant_id: 1,
            date: date(),
            sales_by_platform: BTreeMap::from([(Platform::Grab, grab), (Platform::Gojek, gojek)]),
            orders_by_platform: BTreeMap::new(),
            rating: Some(4.8),
            cancelled_orders: 0,
            operational_flags: OperationalFlags::default(),
            marketing_spend: 0.0,
            marketing_attributed_sales: 0.0,
            prep_time: None,
            delivery_time: None,
            average_order_value: None,
            cancellation_rate: 0.0,
            roas: 0.0,
        }
    }

    fn snapshot(precipitation: f64, zone: Zone) -> ExternalFactorSnapshot {
        ExternalFactorSnapshot {
            date: date(),
            latitude: -8.65,
            longitude: 115.13,
            temperature: 28.0,
            precipitation,
            wind_speed: 4.0,
            holiday_name: None,
            holiday_category: None,
            holiday_type: None,
            zone,
            location_estimated: false,
            weather_estimated: false,
        }
    }

    fn anomaly(actual: f64) -> AnomalyRecord {
        AnomalyRecord {
            restaurant_id: 1,
            date: date(),
            actual_sales: actual,
            expected_sales: None,
            baseline_mean: 1_000_000.0,
            deviation_percent: (actual - 1_000_000.0) / 10_000.0,
            severity: Severity::Bad,
        }
    }

    fn amount(result: &AttributionResult, feature: &str) -> Option<f64> {
        result
            .contributions
            .iter()
            .find(|c| c.feature == feature)
            .map(|c| c.amount)
    }

    #[test]
    fn test_closed_day_explains_everything() {
        let mut r = record(0.0, 0.0);
        r.operational_flags.closed = true;
        let scorer = RuleBasedScorer::new(AttributionConfig::default());
        let result = scorer.score(&anomaly(0.0), &r, &snapshot(20.0, Zone::Beach), 2);
        assert_eq!(result.contributions.len(), 1);
        assert_eq!(amount(&result, "closed"), Some(-1_000_000.0));
        assert_eq!(result.unexplained_residual, 0.0);
        assert_eq!(result.confidence(), Confidence::Low);
    }

    #[test]
    fn test_rain_scaled_by_zone() {
        let scorer = RuleBasedScorer::new(AttributionConfig::default());
        let beach = scorer.score(&anomaly(700_000.0), &record(400_000.0, 300_000.0), &snapshot(12.0, Zone::Beach), 2);
        let mountain = scorer.score(&anomaly(700_000.0), &record(400_000.0, 300_000.0), &snapshot(12.0, Zone::Mountain), 2);
        assert!((amount(&beach, "precipitation").unwrap() + 325_000.0).abs() < 1e-6);
        assert!((amount(&mountain, "precipitation").unwrap() + 200_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_platform_and_quality_rules() {
        let mut r = record(600_000.0, 0.0);
        r.cancellation_rate = 0.25;
        r.rating = Some(4.0);
        let mut snap = snapshot(0.0, Zone::Central);
        snap.holiday_name = Some("Nyepi".into());
        snap.holiday_type = Some(HolidayType::Balinese);

        let scorer = RuleBasedScorer::new(AttributionConfig::default());
        let result = scorer.score(&anomaly(600_000.0), &r, &snap, 2);
        assert_eq!(result.contributions[0].feature, "platforms_active");
        assert!((amount(&result, "cancellation_rate").unwrap() + 150_000.0).abs() < 1e-6);
        assert!((amount(&result, "rating").unwrap() + 50_000.0).abs() < 1e-6);
        assert!((amount(&result, "holiday_weight").unwrap() + 80_000.0).abs() < 1e-6);
        assert!(result.flags.rule_based);

        let gap = result.anomaly.actual_sales - result.expected_sales();
        assert!((result.explained() + result.unexplained_residual - gap).abs() < 1e-6);
    }

    #[test]
    fn test_single_platform_restaurant_not_penalised() {
        let scorer = RuleBasedScorer::new(AttributionConfig::default());
        let result = scorer.score(&anomaly(900_000.0), &record(900_000.0, 0.0), &snapshot(0.0, Zone::Central), 1);
        assert!(amount(&result, "platforms_active").is_none());
    }
}
