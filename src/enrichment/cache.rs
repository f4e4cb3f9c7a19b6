//! Persistent weather cache
//!
//! Historical weather never changes, so entries are never expired. The cache
//! is loaded once at start, served from memory, and flushed back after each
//! enrichment batch. Each flushed key is a single UPSERT, so an aborted
//! flush leaves every stored record whole.

use crate::db::DbConn;
use crate::error::Result;
use crate::models::WeatherObservation;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Stored form of one cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub temperature: f64,
    pub precipitation: f64,
    pub wind_speed: f64,
}

impl CacheEntry {
    fn new(key: String, obs: WeatherObservation) -> Self {
        Self {
            key,
            temperature: obs.temperature,
            precipitation: obs.precipitation,
            wind_speed: obs.wind_speed,
        }
    }

    fn observation(&self) -> WeatherObservation {
        WeatherObservation {
            temperature: self.temperature,
            precipitation: self.precipitation,
            wind_speed: self.wind_speed,
        }
    }
}

/// Durable backing for the cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<CacheEntry>>;
    async fn put(&self, entry: CacheEntry) -> Result<()>;
}

pub struct SurrealCacheStore {
    db: DbConn,
}

impl SurrealCacheStore {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheStore for SurrealCacheStore {
    async fn load_all(&self) -> Result<Vec<CacheEntry>> {
        let entries: Vec<CacheEntry> = self
            .db
            .query("SELECT key, temperature, precipitation, wind_speed FROM weather_cache")
            .await?
            .take(0)?;
        Ok(entries)
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.db
            .query("UPSERT type::thing('weather_cache', $key) CONTENT $entry")
            .bind(("key", entry.key.clone()))
            .bind(("entry", entry))
            .await?
            .check()?;
        Ok(())
    }
}

/// Cache key for one location-day, coordinates rounded to `precision` places
pub fn cache_key(latitude: f64, longitude: f64, date: NaiveDate, precision: u32) -> String {
    let p = precision as usize;
    format!("{:.p$},{:.p$},{}", latitude, longitude, date.format("%Y-%m-%d"))
}

pub struct WeatherCache {
    entries: RwLock<HashMap<String, WeatherObservation>>,
    dirty: Mutex<HashSet<String>>,
    store: Option<Arc<dyn CacheStore>>,
    precision: u32,
}

impl WeatherCache {
    pub fn new(store: Arc<dyn CacheStore>, precision: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            store: Some(store),
            precision,
        }
    }

    /// Memory-only cache; `flush` is a no-op
    pub fn in_memory(precision: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            store: None,
            precision,
        }
    }

    pub fn key(&self, latitude: f64, longitude: f64, date: NaiveDate) -> String {
        cache_key(latitude, longitude, date, self.precision)
    }

    /// Pull every persisted entry into memory
    pub async fn load(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let loaded = store.load_all().await?;
        let mut entries = self.entries.write().await;
        for entry in &loaded {
            entries.insert(entry.key.clone(), entry.observation());
        }
        info!(entries = entries.len(), "Weather cache loaded");
        Ok(loaded.len())
    }

    pub async fn get(&self, latitude: f64, longitude: f64, date: NaiveDate) -> Option<WeatherObservation> {
        let key = self.key(latitude, longitude, date);
        self.entries.read().await.get(&key).copied()
    }

    /// Last writer wins; values for a key are deterministic anyway
    pub async fn insert(&self, latitude: f64, longitude: f64, date: NaiveDate, obs: WeatherObservation) {
        let key = self.key(latitude, longitude, date);
        self.entries.write().await.insert(key.clone(), obs);
        self.dirty.lock().await.insert(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Persist entries written since the last flush. Keys that fail to
    /// write stay dirty for the next attempt.
    pub async fn flush(&self) -> Result<usize> {
        let mut dirty = self.dirty.lock().await;
        let Some(store) = &self.store else {
            dirty.clear();
            return Ok(0);
        };

        let pending: Vec<String> = dirty.iter().cloned().collect();
        let mut written = 0;
        for key in pending {
            let obs = self.entries.read().await.get(&key).copied();
            if let Some(obs) = obs {
                store.put(CacheEntry::new(key.clone(), obs)).await?;
                written += 1;
            }
            dirty.remove(&key);
        }
        debug!(written, "Weather cache flushed");
        Ok(written)
    }
}
