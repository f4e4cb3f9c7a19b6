//! Feature Builder
//!
//! Turns one restaurant-day plus its external context into a fixed-schema
//! numeric vector. The schema is `FEATURE_NAMES`; every vector has exactly
//! these names in exactly this order.
//!
//! Order counts and average order value are not features: they are
//! functions of the sales target itself.

use crate::config::FeatureConfig;
use crate::error::{AnalysisError, Result};
use crate::models::{DailyMetricRecord, ExternalFactorSnapshot};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;

/// Rating used when no platform rated the day
pub const DEFAULT_RATING: f64 = 4.5;

pub static FEATURE_NAMES: [&str; 22] = [
    "day_of_week",
    "month",
    "is_weekend",
    "closed",
    "out_of_stock",
    "overloaded",
    "platforms_active",
    "marketing_spend",
    "roas",
    "rating",
    "cancellation_rate",
    "prep_time",
    "delivery_time",
    "temperature",
    "precipitation",
    "wind_speed",
    "rain_zone_impact",
    "is_holiday",
    "holiday_weight",
    "sales_lag_7d_mean",
    "sales_lag_30d_mean",
    "lag_available",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureCategory {
    Operational,
    Marketing,
    Weather,
    Holiday,
    Quality,
    Seasonality,
}

impl FeatureCategory {
    pub fn of(feature: &str) -> Self {
        match feature {
            "closed" | "out_of_stock" | "overloaded" | "platforms_active" | "prep_time"
            | "delivery_time" => FeatureCategory::Operational,
            "marketing_spend" | "roas" => FeatureCategory::Marketing,
            "temperature" | "precipitation" | "wind_speed" | "rain_zone_impact" => {
                FeatureCategory::Weather
            }
            "is_holiday" | "holiday_weight" => FeatureCategory::Holiday,
            "rating" | "cancellation_rate" => FeatureCategory::Quality,
            _ => FeatureCategory::Seasonality,
        }
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureCategory::Operational => "operational",
            FeatureCategory::Marketing => "marketing",
            FeatureCategory::Weather => "weather",
            FeatureCategory::Holiday => "holiday",
            FeatureCategory::Quality => "quality",
            FeatureCategory::Seasonality => "seasonality",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    names: &'static [&'static str],
    values: Vec<f64>,
}

impl FeatureVector {
    /// Vector over the standard schema
    pub fn new(values: Vec<f64>) -> Result<Self> {
        Self::with_schema(&FEATURE_NAMES, values)
    }

    pub fn with_schema(names: &'static [&'static str], values: Vec<f64>) -> Result<Self> {
        if names.len() != values.len() {
            return Err(AnalysisError::FeatureSchemaMismatch {
                expected: names.len(),
                actual: values.len(),
            });
        }
        Ok(Self { names, values })
    }

    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }

    /// True when the lag features were zero-filled
    pub fn lag_imputed(&self) -> bool {
        self.get("lag_available") == Some(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.names.iter().copied().zip(self.values.iter().copied())
    }
}

/// Rolling sales aggregates over days strictly before a target date
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalesHistory {
    pub date: NaiveDate,
    pub available: usize,
    pub short_mean: f64,
    pub long_mean: f64,
}

impl SalesHistory {
    /// `records` must be sorted by date; only those before `date` are read.
    pub fn before(records: &[DailyMetricRecord], date: NaiveDate, config: &FeatureConfig) -> Self {
        let end = records.partition_point(|r| r.date < date);
        let prior: Vec<f64> = records[..end].iter().map(|r| r.total_sales()).collect();
        Self::from_prior_sales(date, &prior, config)
    }

    pub fn from_prior_sales(date: NaiveDate, prior: &[f64], config: &FeatureConfig) -> Self {
        Self {
            date,
            available: prior.len(),
            short_mean: tail_mean(prior, config.short_window),
            long_mean: tail_mean(prior, config.long_window),
        }
    }
}

fn tail_mean(values: &[f64], window: usize) -> f64 {
    let tail = &values[values.len().saturating_sub(window)..];
    if tail.is_empty() {
        0.0
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn assemble(
    record: &DailyMetricRecord,
    snapshot: &ExternalFactorSnapshot,
    lags: Option<(f64, f64)>,
) -> FeatureVector {
    let weekday = record.date.weekday().num_days_from_monday();
    let flags = record.operational_flags;
    let (lag_short, lag_long) = lags.unwrap_or((0.0, 0.0));

    let values = vec![
        weekday as f64,
        record.date.month() as f64,
        flag(weekday >= 5),
        flag(flags.closed),
        flag(flags.out_of_stock),
        flag(flags.overloaded),
        record.platforms_active() as f64,
        record.marketing_spend,
        record.roas,
        record.rating.unwrap_or(DEFAULT_RATING),
        record.cancellation_rate,
        record.prep_time.unwrap_or(0.0),
        record.delivery_time.unwrap_or(0.0),
        snapshot.temperature,
        snapshot.precipitation,
        snapshot.wind_speed,
        snapshot.precipitation * snapshot.zone.weather_sensitivity(),
        flag(snapshot.is_holiday()),
        snapshot.holiday_weight(),
        lag_short,
        lag_long,
        flag(lags.is_some()),
    ];

    FeatureVector {
        names: &FEATURE_NAMES,
        values,
    }
}

/// Build the vector for one restaurant-day.
///
/// Fails with `InsufficientHistory` when fewer than `min_history_days`
/// prior days exist; see [`build_or_impute`] for the zero-filled variant.
pub fn build(
    record: &DailyMetricRecord,
    snapshot: &ExternalFactorSnapshot,
    history: &SalesHistory,
    config: &FeatureConfig,
) -> Result<FeatureVector> {
    if history.available < config.min_history_days {
        return Err(AnalysisError::InsufficientHistory {
            date: record.date,
            available: history.available,
            required: config.min_history_days,
        });
    }
    Ok(assemble(
        record,
        snapshot,
        Some((history.short_mean, history.long_mean)),
    ))
}

/// Like [`build`], but short history zero-fills the lag features and sets
/// `lag_available = 0` so the schema stays fixed.
pub fn build_or_impute(
    record: &DailyMetricRecord,
    snapshot: &ExternalFactorSnapshot,
    history: &SalesHistory,
    config: &FeatureConfig,
) -> FeatureVector {
    match build(record, snapshot, history, config) {
        Ok(vector) => vector,
        Err(_) => assemble(record, snapshot, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HolidayType, OperationalFlags, Platform, Zone};
    use std::collections::BTreeMap;

    fn record(day: u32, sales: f64) -> DailyMetricRecord {
        let date = NaiveDate::from_ymd_opt(2025, 5, day).unwrap();
        DailyMetricRecord {
            restaurant_id: 1,
            date,
            sales_by_platform: BTreeMap::from([(Platform::Grab, sales), (Platform::Gojek, 0.0)]),
            orders_by_platform: BTreeMap::from([(Platform::Grab, 10), (Platform::Gojek, 0)]),
            rating: None,
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

    fn snapshot(date: NaiveDate) -> ExternalFactorSnapshot {
        ExternalFactorSnapshot {
            date,
            latitude: -8.65,
            longitude: 115.13,
            temperature: 27.0,
            precipitation: 10.0,
            wind_speed: 4.0,
            holiday_name: Some("Galungan".into()),
            holiday_category: Some("Hindu".into()),
            holiday_type: Some(HolidayType::Balinese),
            zone: Zone::Beach,
            location_estimated: false,
            weather_estimated: false,
        }
    }

    fn history(n: u32) -> Vec<DailyMetricRecord> {
        (1..=n).map(|d| record(d, d as f64 * 100.0)).collect()
    }

    #[test]
    fn test_schema_is_fixed() {
        let records = history(20);
        let target = &records[15];
        let config = FeatureConfig::default();
        let full = build_or_impute(target, &snapshot(target.date), &SalesHistory::before(&records, target.date, &config), &config);
        let early = build_or_impute(&records[2], &snapshot(records[2].date), &SalesHistory::before(&records, records[2].date, &config), &config);
        assert_eq!(full.names(), early.names());
        assert_eq!(full.len(), FEATURE_NAMES.len());
    }

    #[test]
    fn test_lags_use_strictly_prior_days() {
        let records = history(20);
        let config = FeatureConfig::default();
        // Target is May 10; prior days are 1..=9
        let h = SalesHistory::before(&records, records[9].date, &config);
        assert_eq!(h.available, 9);
        // Last 7 prior: days 3..=9 -> mean of 300..900
        assert_eq!(h.short_mean, 600.0);
        assert_eq!(h.long_mean, 500.0);
    }

    #[test]
    fn test_short_history_fails_then_imputes() {
        let records = history(10);
        let config = FeatureConfig::default();
        let target = &records[3];
        let h = SalesHistory::before(&records, target.date, &config);

        let err = build(target, &snapshot(target.date), &h, &config).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientHistory { available: 3, required: 7, .. }));

        let v = build_or_impute(target, &snapshot(target.date), &h, &config);
        assert!(v.lag_imputed());
        assert_eq!(v.get("sales_lag_7d_mean"), Some(0.0));
    }

    #[test]
    fn test_encodings() {
        let records = history(20);
        let config = FeatureConfig::default();
        // 2025-05-17 is a Saturday
        let mut target = records[16].clone();
        target.operational_flags.out_of_stock = true;
        let v = build(&target, &snapshot(target.date), &SalesHistory::before(&records, target.date, &config), &config).unwrap();

        assert_eq!(v.get("day_of_week"), Some(5.0));
        assert_eq!(v.get("is_weekend"), Some(1.0));
        assert_eq!(v.get("month"), Some(5.0));
        assert_eq!(v.get("out_of_stock"), Some(1.0));
        assert_eq!(v.get("closed"), Some(0.0));
        assert_eq!(v.get("rating"), Some(DEFAULT_RATING));
        assert_eq!(v.get("platforms_active"), Some(1.0));
        assert_eq!(v.get("is_holiday"), Some(1.0));
        assert_eq!(v.get("holiday_weight"), Some(0.8));
        assert_eq!(v.get("rain_zone_impact"), Some(13.0));
        assert_eq!(v.get("lag_available"), Some(1.0));
    }

    #[test]
    fn test_categories_cover_schema() {
        assert_eq!(FeatureCategory::of("closed"), FeatureCategory::Operational);
        assert_eq!(FeatureCategory::of("roas"), FeatureCategory::Marketing);
        assert_eq!(FeatureCategory::of("rain_zone_impact"), FeatureCategory::Weather);
        assert_eq!(FeatureCategory::of("rating"), FeatureCategory::Quality);
        assert_eq!(FeatureCategory::of("sales_lag_30d_mean"), FeatureCategory::Seasonality);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = FeatureVector::new(vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, AnalysisError::FeatureSchemaMismatch { expected: 22, actual: 2 }));
    }
}
