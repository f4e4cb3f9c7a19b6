//! Attribution pipeline
//!
//! Aggregate -> enrich -> features -> (anomalies, model) -> attribution ->
//! recommendations, for a set of restaurants over one date range.
//!
//! Records are loaded from `lookback_days` before the requested range so
//! baselines, lag features and training have history to work with. Only
//! flagged days inside the requested range are attributed.

use crate::aggregate::load_records;
use crate::anomaly::{detect, AnomalyRecord};
use crate::attribution::{attribute, select_references, AttributionResult};
use crate::config::{AnalysisConfig, ModelScope};
use crate::db::MetricStore;
use crate::enrichment::{enrich_batch, Enricher, SnapshotMap};
use crate::error::{AnalysisError, Result};
use crate::features::{build_or_impute, FeatureVector, SalesHistory};
use crate::model::{train_shared, ModelQuality, SalesModel};
use crate::models::{DailyMetricRecord, ExternalFactorSnapshot, Restaurant};
use crate::recommend::{recommend, Recommendation};
use crate::rules::RuleBasedScorer;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub restaurants: Vec<String>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// No model could be trained; rule tables were used instead
    RuleBased,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    /// `None` for a market-wide model
    pub restaurant_id: Option<i64>,
    pub quality: Option<ModelQuality>,
    pub fallback: Option<Fallback>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRestaurant {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedAnomaly {
    pub attribution: AttributionResult,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// One entry per flagged day in the range, by restaurant then date
    pub results: Vec<AnalyzedAnomaly>,
    pub models: Vec<ModelSummary>,
    pub skipped: Vec<SkippedRestaurant>,
}

impl PipelineReport {
    /// Quality of the model used for `restaurant_id`, market model included
    pub fn model_quality(&self, restaurant_id: i64) -> Option<&ModelQuality> {
        self.summary_for(restaurant_id)?.quality.as_ref()
    }

    pub fn fallback(&self, restaurant_id: i64) -> Option<Fallback> {
        self.summary_for(restaurant_id)?.fallback
    }

    fn summary_for(&self, restaurant_id: i64) -> Option<&ModelSummary> {
        self.models
            .iter()
            .find(|m| m.restaurant_id == Some(restaurant_id))
            .or_else(|| self.models.iter().find(|m| m.restaurant_id.is_none()))
    }
}

/// One restaurant's series with everything derived from it, index-aligned
struct Prepared {
    restaurant: Restaurant,
    records: Vec<DailyMetricRecord>,
    snapshots: Vec<ExternalFactorSnapshot>,
    vectors: Vec<FeatureVector>,
    anomalies: Vec<AnomalyRecord>,
}

impl Prepared {
    fn targets(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.total_sales()).collect()
    }

    /// Platforms the restaurant normally sells on
    fn typical_platforms(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.platforms_active())
            .max()
            .unwrap_or(0)
    }
}

pub struct Pipeline {
    config: AnalysisConfig,
    store: Arc<dyn MetricStore>,
    enricher: Arc<Enricher>,
}

impl Pipeline {
    pub fn new(config: AnalysisConfig, store: Arc<dyn MetricStore>, enricher: Arc<Enricher>) -> Self {
        Self {
            config,
            store,
            enricher,
        }
    }

    pub async fn run(&self, request: &PipelineRequest, cancel: &CancellationToken) -> Result<PipelineReport> {
        if request.to < request.from {
            return Err(AnalysisError::Config(format!(
                "empty date range: {} is after {}",
                request.from, request.to
            )));
        }
        let history_from = request
            .from
            .checked_sub_days(Days::new(self.config.pipeline.lookback_days))
            .unwrap_or(NaiveDate::MIN);
        info!(
            restaurants = request.restaurants.len(),
            from = %request.from,
            to = %request.to,
            history_from = %history_from,
            "Starting attribution run"
        );

        let mut loaded = Vec::new();
        let mut skipped = Vec::new();
        for (i, name) in request.restaurants.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled {
                    completed: i,
                    total: request.restaurants.len(),
                });
            }
            match load_records(self.store.as_ref(), name, history_from, request.to).await {
                Ok(pair) => loaded.push(pair),
                Err(e @ AnalysisError::RestaurantNotFound(_)) => {
                    warn!(restaurant = %name, "Skipping restaurant: {}", e);
                    skipped.push(SkippedRestaurant {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let units: Vec<(Restaurant, NaiveDate)> = loaded
            .iter()
            .flat_map(|(restaurant, records)| records.iter().map(move |r| (restaurant.clone(), r.date)))
            .collect();
        let mut snapshots =
            enrich_batch(self.enricher.clone(), units, self.config.pipeline.workers, cancel).await?;

        let mut prepared = Vec::with_capacity(loaded.len());
        for (restaurant, records) in loaded {
            prepared.push(self.prepare(restaurant, records, &mut snapshots).await);
        }

        let (models, summaries) = self.train_models(&prepared).await?;

        let scorer = RuleBasedScorer::new(self.config.attribution.clone());
        let mut results = Vec::new();
        for (i, (data, model)) in prepared.iter().zip(&models).enumerate() {
            if cancel.is_cancelled() {
                warn!(completed = i, total = prepared.len(), "Run cancelled during attribution");
                return Err(AnalysisError::Cancelled {
                    completed: i,
                    total: prepared.len(),
                });
            }
            results.extend(self.attribute_restaurant(data, model.as_deref(), &scorer, request)?);
        }

        info!(
            anomalies = results.len(),
            skipped = skipped.len(),
            models = summaries.iter().filter(|m| m.quality.is_some()).count(),
            "Attribution run finished"
        );
        Ok(PipelineReport {
            results,
            models: summaries,
            skipped,
        })
    }

    async fn prepare(
        &self,
        restaurant: Restaurant,
        records: Vec<DailyMetricRecord>,
        snapshots: &mut SnapshotMap,
    ) -> Prepared {
        let mut day_snapshots = Vec::with_capacity(records.len());
        for record in &records {
            let snapshot = match snapshots.remove(&(restaurant.id, record.date)) {
                Some(s) => s,
                None => self.enricher.enrich(&restaurant, record.date).await,
            };
            day_snapshots.push(snapshot);
        }

        let features = &self.config.features;
        let vectors: Vec<FeatureVector> = records
            .iter()
            .zip(&day_snapshots)
            .map(|(record, snapshot)| {
                let history = SalesHistory::before(&records, record.date, features);
                build_or_impute(record, snapshot, &history, features)
            })
            .collect();
        let anomalies = detect(&records, &self.config.baseline);

        debug!(
            restaurant = %restaurant.name,
            days = records.len(),
            imputed = vectors.iter().filter(|v| v.lag_imputed()).count(),
            "Prepared restaurant series"
        );
        Prepared {
            restaurant,
            records,
            snapshots: day_snapshots,
            vectors,
            anomalies,
        }
    }

    /// One model slot per prepared restaurant; `None` means rule-based.
    async fn train_models(
        &self,
        prepared: &[Prepared],
    ) -> Result<(Vec<Option<Arc<SalesModel>>>, Vec<ModelSummary>)> {
        match self.config.model.scope {
            ModelScope::Market => {
                let vectors: Vec<FeatureVector> =
                    prepared.iter().flat_map(|p| p.vectors.iter().cloned()).collect();
                let targets: Vec<f64> = prepared.iter().flat_map(|p| p.targets()).collect();
                let model = self.train_or_fallback(vectors, targets, None).await?;
                let summary = summarize(None, model.as_deref());
                Ok((vec![model; prepared.len()], vec![summary]))
            }
            ModelScope::Restaurant => {
                let mut models = Vec::with_capacity(prepared.len());
                let mut summaries = Vec::with_capacity(prepared.len());
                for p in prepared {
                    let id = p.restaurant.id;
                    let model = self
                        .train_or_fallback(p.vectors.clone(), p.targets(), Some(id))
                        .await?;
                    summaries.push(summarize(Some(id), model.as_deref()));
                    models.push(model);
                }
                Ok((models, summaries))
            }
        }
    }

    async fn train_or_fallback(
        &self,
        vectors: Vec<FeatureVector>,
        targets: Vec<f64>,
        restaurant_id: Option<i64>,
    ) -> Result<Option<Arc<SalesModel>>> {
        match train_shared(vectors, targets, self.config.model.clone()).await {
            Ok(model) => Ok(Some(model)),
            Err(e) if e.is_recoverable() => {
                warn!(?restaurant_id, "Falling back to rule-based scoring: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn attribute_restaurant(
        &self,
        data: &Prepared,
        model: Option<&SalesModel>,
        scorer: &RuleBasedScorer,
        request: &PipelineRequest,
    ) -> Result<Vec<AnalyzedAnomaly>> {
        let attribution = &self.config.attribution;
        let typical_platforms = data.typical_platforms();
        let mut analyzed = Vec::new();

        for (i, anomaly) in data.anomalies.iter().enumerate() {
            if !anomaly.severity.is_flagged() || anomaly.date < request.from || anomaly.date > request.to {
                continue;
            }
            let snapshot = &data.snapshots[i];

            let result = match model {
                Some(model) => {
                    let prior = if i > 0 { &data.vectors[..i] } else { &data.vectors[..] };
                    let references = select_references(prior, attribution.reference_rows, attribution.seed);
                    let mut result = attribute(anomaly, &data.vectors[i], model, &references, attribution)?;
                    result.flags = result.flags.with_snapshot(snapshot);
                    result
                }
                None => scorer.score(anomaly, &data.records[i], snapshot, typical_platforms),
            };

            let recommendations = recommend(&result, &self.config.recommendations);
            analyzed.push(AnalyzedAnomaly {
                attribution: result,
                recommendations,
            });
        }

        info!(
            restaurant = %data.restaurant.name,
            flagged = analyzed.len(),
            rule_based = model.is_none(),
            "Attributed flagged days"
        );
        Ok(analyzed)
    }
}

fn summarize(restaurant_id: Option<i64>, model: Option<&SalesModel>) -> ModelSummary {
    ModelSummary {
        restaurant_id,
        quality: model.map(|m| m.quality().clone()),
        fallback: model.is_none().then_some(Fallback::RuleBased),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnrichmentConfig;
    use crate::enrichment::cache::WeatherCache;
    use crate::enrichment::calendar::HolidayCalendar;
    use crate::enrichment::locations::LocationDirectory;
    use crate::models::{OperationalFlags, Platform, PlatformDailyRow};
    use async_trait::async_trait;

    struct VecStore {
        restaurants: Vec<Restaurant>,
        rows: Vec<PlatformDailyRow>,
    }

    #[async_trait]
    impl MetricStore for VecStore {
        async fn resolve_restaurant(&self, name: &str) -> Result<Option<Restaurant>> {
            Ok(self.restaurants.iter().find(|r| r.name == name).cloned())
        }

        async fn platform_rows(
            &self,
            restaurant_id: i64,
            platform: Platform,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<PlatformDailyRow>> {
            Ok(self
                .rows
                .iter()
                .filter(|r| {
                    r.restaurant_id == restaurant_id && r.platform == platform && r.date >= from && r.date <= to
                })
                .cloned()
                .collect())
        }
    }

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap() + Days::new(offset)
    }

    /// `days` of steady two-platform sales with a closure on the last day
    fn store(days: u64) -> VecStore {
        let mut rows = Vec::new();
        for d in 0..days {
            let closed = d == days - 1;
            for (platform, base) in [(Platform::Grab, 600_000.0), (Platform::Gojek, 400_000.0)] {
                let wobble = ((d * 37) % 11) as f64 * 5_000.0;
                rows.push(PlatformDailyRow {
                    restaurant_id: 1,
                    date: day(d),
                    platform,
                    sales: if closed { 0.0 } else { base + wobble },
                    orders: if closed { 0 } else { 10 },
                    rating: Some(4.7),
                    cancelled_orders: 0,
                    flags: OperationalFlags {
                        closed,
                        ..Default::default()
                    },
                    marketing_spend: 0.0,
                    marketing_attributed_sales: 0.0,
                    prep_time: None,
                    delivery_time: None,
                });
            }
        }
        VecStore {
            restaurants: vec![Restaurant {
                id: 1,
                name: "Warung Pantai".into(),
            }],
            rows,
        }
    }

    fn offline_enricher() -> Arc<Enricher> {
        let config = EnrichmentConfig {
            offline: true,
            ..Default::default()
        };
        Arc::new(Enricher::new(
            config,
            LocationDirectory::empty(),
            HolidayCalendar::empty(),
            Arc::new(WeatherCache::in_memory(2)),
            None,
        ))
    }

    fn request(names: &[&str], days: u64) -> PipelineRequest {
        PipelineRequest {
            restaurants: names.iter().map(|n| n.to_string()).collect(),
            from: day(days - 10),
            to: day(days - 1),
        }
    }

    #[tokio::test]
    async fn test_short_history_falls_back_to_rules() {
        let pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(store(40)), offline_enricher());
        let report = pipeline
            .run(&request(&["Warung Pantai", "Ghost Kitchen"], 40), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "Ghost Kitchen");
        assert_eq!(report.fallback(1), Some(Fallback::RuleBased));
        assert!(report.model_quality(1).is_none());

        let closed = report
            .results
            .iter()
            .find(|r| r.attribution.anomaly.date == day(39))
            .unwrap();
        assert!(closed.attribution.flags.rule_based);
        assert!(closed.attribution.flags.weather_estimated);
        assert!(closed.attribution.flags.location_estimated);
        assert_eq!(closed.attribution.contributions[0].feature, "closed");
        assert_eq!(closed.recommendations[0].feature.as_deref(), Some("closed"));
    }

    #[tokio::test]
    async fn test_only_requested_range_is_attributed() {
        let pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(store(40)), offline_enricher());
        let req = request(&["Warung Pantai"], 40);
        let report = pipeline.run(&req, &CancellationToken::new()).await.unwrap();
        assert!(report
            .results
            .iter()
            .all(|r| r.attribution.anomaly.date >= req.from && r.attribution.anomaly.date <= req.to));
    }

    #[tokio::test]
    async fn test_inverted_range_rejected() {
        let pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(store(5)), offline_enricher());
        let req = PipelineRequest {
            restaurants: vec!["Warung Pantai".into()],
            from: day(4),
            to: day(0),
        };
        let err = pipeline.run(&req, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(store(5)), offline_enricher());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline.run(&request(&["Warung Pantai"], 5), &cancel).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled { completed: 0, total: 1 }));
    }
}
