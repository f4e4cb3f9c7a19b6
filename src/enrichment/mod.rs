//! External Factor Enrichment
//!
//! Resolves location, weather and holiday context for a restaurant-day.
//! Every failure here is recovered locally; the snapshot carries
//! `location_estimated` / `weather_estimated` instead of an error.

pub mod cache;
pub mod calendar;
pub mod locations;
pub mod rate_limit;
pub mod weather;

use crate::config::EnrichmentConfig;
use crate::error::{AnalysisError, Result};
use crate::models::{ExternalFactorSnapshot, Restaurant, WeatherObservation, Zone};
use cache::WeatherCache;
use calendar::HolidayCalendar;
use chrono::NaiveDate;
use locations::LocationDirectory;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weather::GuardedWeatherClient;

pub struct Enricher {
    config: EnrichmentConfig,
    locations: LocationDirectory,
    calendar: HolidayCalendar,
    cache: Arc<WeatherCache>,
    /// `None` in offline mode
    client: Option<GuardedWeatherClient>,
}

impl Enricher {
    pub fn new(
        config: EnrichmentConfig,
        locations: LocationDirectory,
        calendar: HolidayCalendar,
        cache: Arc<WeatherCache>,
        client: Option<GuardedWeatherClient>,
    ) -> Self {
        Self {
            config,
            locations,
            calendar,
            cache,
            client,
        }
    }

    pub fn cache(&self) -> &Arc<WeatherCache> {
        &self.cache
    }

    fn neutral_weather(&self) -> WeatherObservation {
        WeatherObservation {
            temperature: self.config.neutral_temperature,
            precipitation: self.config.neutral_precipitation,
            wind_speed: self.config.neutral_wind_speed,
        }
    }

    /// Weather for a location-day plus whether it is a stand-in value
    async fn weather(&self, latitude: f64, longitude: f64, date: NaiveDate) -> (WeatherObservation, bool) {
        if let Some(obs) = self.cache.get(latitude, longitude, date).await {
            return (obs, false);
        }

        let Some(client) = &self.client else {
            debug!(%date, "Offline, using neutral weather");
            return (self.neutral_weather(), true);
        };

        match client.fetch(latitude, longitude, date).await {
            Ok(obs) => {
                self.cache.insert(latitude, longitude, date, obs).await;
                (obs, false)
            }
            Err(e) => {
                warn!(%date, latitude, longitude, "Falling back to neutral weather: {}", e);
                (self.neutral_weather(), true)
            }
        }
    }

    pub async fn enrich(&self, restaurant: &Restaurant, date: NaiveDate) -> ExternalFactorSnapshot {
        let (latitude, longitude, zone, location_estimated) =
            match self.locations.resolve(&restaurant.name) {
                Some(loc) => (loc.latitude, loc.longitude, loc.zone, false),
                None => (
                    self.config.default_latitude,
                    self.config.default_longitude,
                    Zone::from(self.config.default_zone.as_str()),
                    true,
                ),
            };

        let (weather, weather_estimated) = self.weather(latitude, longitude, date).await;
        let holiday = self.calendar.lookup(date);

        ExternalFactorSnapshot {
            date,
            latitude,
            longitude,
            temperature: weather.temperature,
            precipitation: weather.precipitation,
            wind_speed: weather.wind_speed,
            holiday_name: holiday.map(|h| h.name.clone()),
            holiday_category: holiday.map(|h| h.category.clone()),
            holiday_type: holiday.map(|h| h.holiday_type),
            zone,
            location_estimated,
            weather_estimated,
        }
    }
}

pub type SnapshotMap = HashMap<(i64, NaiveDate), ExternalFactorSnapshot>;

/// Enrich many restaurant-days on a fixed pool of `workers` tasks.
///
/// Cancellation is checked between units. In-flight units are allowed to
/// finish and the cache is flushed before returning either way.
pub async fn enrich_batch(
    enricher: Arc<Enricher>,
    units: Vec<(Restaurant, NaiveDate)>,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<SnapshotMap> {
    let total = units.len();
    let workers = workers.max(1);
    info!(units = total, workers, "Starting enrichment batch");

    let mut snapshots = SnapshotMap::with_capacity(total);
    let mut tasks = JoinSet::new();
    let mut cancelled = false;

    for (restaurant, date) in units {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        if tasks.len() >= workers {
            if let Some(joined) = tasks.join_next().await {
                let (key, snapshot) = joined?;
                snapshots.insert(key, snapshot);
            }
        }
        let enricher = enricher.clone();
        tasks.spawn(async move {
            let snapshot = enricher.enrich(&restaurant, date).await;
            ((restaurant.id, date), snapshot)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (key, snapshot) = joined?;
        snapshots.insert(key, snapshot);
    }

    let flushed = enricher.cache.flush().await?;
    let estimated = snapshots.values().filter(|s| s.weather_estimated).count();
    info!(
        enriched = snapshots.len(),
        weather_estimated = estimated,
        cache_flushed = flushed,
        "Enrichment batch finished"
    );

    if cancelled {
        warn!(completed = snapshots.len(), total, "Enrichment batch cancelled");
        return Err(AnalysisError::Cancelled {
            completed: snapshots.len(),
            total,
        });
    }
    Ok(snapshots)
}
