//! Historical weather lookups
//!
//! The provider returns hourly series; everything downstream works on the
//! daily aggregate (mean temperature, summed precipitation, max wind).

use crate::config::EnrichmentConfig;
use crate::enrichment::rate_limit::RateLimiter;
use crate::error::{AnalysisError, Result};
use crate::models::WeatherObservation;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn daily_weather(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<WeatherObservation>;
}

/// Hourly arrays as returned by the archive API; gaps come back as null
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlyWeather {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
}

impl HourlyWeather {
    /// Reduce hourly values to a daily observation. `None` when no hour
    /// carries a temperature reading.
    pub fn reduce(&self) -> Option<WeatherObservation> {
        let temps: Vec<f64> = self.temperature_2m.iter().flatten().copied().collect();
        if temps.is_empty() {
            return None;
        }
        let temperature = temps.iter().sum::<f64>() / temps.len() as f64;
        let precipitation = self.precipitation.iter().flatten().sum::<f64>();
        let wind_speed = self
            .wind_speed_10m
            .iter()
            .flatten()
            .copied()
            .fold(0.0_f64, f64::max);

        Some(WeatherObservation {
            temperature,
            precipitation,
            wind_speed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    hourly: Option<HourlyWeather>,
}

/// Open-Meteo historical archive client
pub struct OpenMeteoProvider {
    client: reqwest::Client,
    base_url: String,
    timezone: String,
}

impl OpenMeteoProvider {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.weather_base_url.clone(),
            timezone: config.timezone.clone(),
        })
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn daily_weather(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<WeatherObservation> {
        let day = date.format("%Y-%m-%d").to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("start_date", day.clone()),
                ("end_date", day),
                (
                    "hourly",
                    "temperature_2m,precipitation,wind_speed_10m".to_string(),
                ),
                ("timezone", self.timezone.clone()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::WeatherProviderUnavailable(format!(
                "archive request failed: {} - {}",
                status, text
            )));
        }

        let body: ArchiveResponse = response.json().await?;
        body.hourly
            .as_ref()
            .and_then(HourlyWeather::reduce)
            .ok_or_else(|| {
                AnalysisError::WeatherProviderUnavailable(format!(
                    "no hourly readings for {date} at ({latitude}, {longitude})"
                ))
            })
    }
}

/// Exponential backoff between provider attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor)
    }
}

/// Provider wrapped with the request budget and retry policy. Every attempt,
/// retries included, spends one token.
pub struct GuardedWeatherClient {
    provider: Arc<dyn WeatherProvider>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl GuardedWeatherClient {
    pub fn new(provider: Arc<dyn WeatherProvider>, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            provider,
            limiter,
            retry,
        }
    }

    pub fn from_config(provider: Arc<dyn WeatherProvider>, config: &EnrichmentConfig) -> Self {
        Self::new(
            provider,
            RateLimiter::new(
                config.requests_per_window,
                Duration::from_millis(config.window_ms),
            ),
            RetryPolicy::from_config(config),
        )
    }

    pub async fn fetch(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<WeatherObservation> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            self.limiter.acquire().await;
            match self.provider.daily_weather(latitude, longitude, date).await {
                Ok(observation) => {
                    debug!(%date, attempt, "Weather fetched");
                    return Ok(observation);
                }
                Err(e) => {
                    warn!(%date, attempt, max = self.retry.max_attempts, "Weather fetch failed: {}", e);
                    last_error = e.to_string();
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }
        Err(AnalysisError::WeatherProviderUnavailable(last_error))
    }
}
