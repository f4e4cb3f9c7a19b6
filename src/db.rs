//! Metric store access
//!
//! Two per-platform daily tables keyed by `(restaurant_id, stat_date)` plus a
//! `restaurants` directory. Every query binds identifiers and dates as
//! parameters; nothing is interpolated into query text.

use crate::error::Result;
use crate::models::{OperationalFlags, Platform, PlatformDailyRow, Restaurant};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::Surreal;
use tracing::{debug, warn};

pub type DbConn = Surreal<Db>;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Initialize database connection with RocksDB backend
pub async fn connect(path: &str) -> Result<DbConn> {
    let db = Surreal::new::<RocksDb>(path).await?;
    db.use_ns("delivery").use_db("sales").await?;
    Ok(db)
}

/// In-memory connection, used for throwaway runs and tests
pub async fn connect_in_memory() -> Result<DbConn> {
    let db = Surreal::new::<Mem>(()).await?;
    db.use_ns("delivery").use_db("sales").await?;
    Ok(db)
}

/// Initialize database schema
pub async fn init_schema(db: &DbConn) -> Result<()> {
    db.query(
        r#"
        -- Restaurant directory
        DEFINE TABLE IF NOT EXISTS restaurants SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_restaurant_id ON restaurants FIELDS restaurant_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_restaurant_name ON restaurants FIELDS name UNIQUE;

        -- Per-platform daily exports (schemaless: gojek carries timing fields grab lacks)
        DEFINE TABLE IF NOT EXISTS grab_stats SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_grab_day ON grab_stats FIELDS restaurant_id, stat_date UNIQUE;
        DEFINE TABLE IF NOT EXISTS gojek_stats SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_gojek_day ON gojek_stats FIELDS restaurant_id, stat_date UNIQUE;

        -- Persistent weather cache, one record per (rounded lat, lon, date)
        DEFINE TABLE IF NOT EXISTS weather_cache SCHEMALESS;
        "#,
    )
    .await?
    .check()?;

    Ok(())
}

/// Read contract of the per-day metric store
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn resolve_restaurant(&self, name: &str) -> Result<Option<Restaurant>>;

    /// Rows for one platform, inclusive date range, ordered by date
    async fn platform_rows(
        &self,
        restaurant_id: i64,
        platform: Platform,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PlatformDailyRow>>;
}

#[derive(Debug, Deserialize)]
struct RestaurantRow {
    restaurant_id: i64,
    name: String,
}

/// Raw stats row as exported by either platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StatsRow {
    pub(crate) restaurant_id: i64,
    pub(crate) stat_date: String,
    pub(crate) sales: Option<f64>,
    pub(crate) orders: Option<i64>,
    pub(crate) rating: Option<f64>,
    pub(crate) cancelled_orders: Option<i64>,
    #[serde(default, deserialize_with = "flag")]
    pub(crate) store_is_closed: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    pub(crate) out_of_stock: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    pub(crate) overloaded: Option<bool>,
    pub(crate) ads_spend: Option<f64>,
    pub(crate) ads_sales: Option<f64>,
    pub(crate) preparation_time: Option<f64>,
    pub(crate) delivery_time: Option<f64>,
}

/// Flag column as written by either exporter: `true`/`false` or a count
/// where anything above zero is set.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub(crate) fn flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = match Option::<FlagValue>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(v) => v,
    };
    let set = match value {
        FlagValue::Bool(b) => b,
        FlagValue::Int(n) => n > 0,
        FlagValue::Float(n) => n > 0.0,
        FlagValue::Text(t) => match t.trim().to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "true" => true,
            "false" => false,
            other => other
                .parse::<f64>()
                .map(|n| n > 0.0)
                .map_err(|_| serde::de::Error::custom(format!("invalid flag value {:?}", t)))?,
        },
    };
    Ok(Some(set))
}

impl StatsRow {
    pub(crate) fn into_platform_row(self, platform: Platform) -> Option<PlatformDailyRow> {
        let date = NaiveDate::parse_from_str(&self.stat_date, DATE_FORMAT).ok()?;
        Some(PlatformDailyRow {
            restaurant_id: self.restaurant_id,
            date,
            platform,
            sales: self.sales.unwrap_or(0.0),
            orders: self.orders.unwrap_or(0),
            // Platforms export 0 when nobody rated the day
            rating: self.rating.filter(|r| *r > 0.0),
            cancelled_orders: self.cancelled_orders.unwrap_or(0),
            flags: OperationalFlags {
                closed: self.store_is_closed.unwrap_or(false),
                out_of_stock: self.out_of_stock.unwrap_or(false),
                overloaded: self.overloaded.unwrap_or(false),
            },
            marketing_spend: self.ads_spend.unwrap_or(0.0),
            marketing_attributed_sales: self.ads_sales.unwrap_or(0.0),
            prep_time: self.preparation_time.filter(|t| *t > 0.0),
            delivery_time: self.delivery_time.filter(|t| *t > 0.0),
        })
    }
}

impl From<&PlatformDailyRow> for StatsRow {
    fn from(row: &PlatformDailyRow) -> Self {
        Self {
            restaurant_id: row.restaurant_id,
            stat_date: row.date.format(DATE_FORMAT).to_string(),
            sales: Some(row.sales),
            orders: Some(row.orders),
            rating: row.rating,
            cancelled_orders: Some(row.cancelled_orders),
            store_is_closed: Some(row.flags.closed),
            out_of_stock: Some(row.flags.out_of_stock),
            overloaded: Some(row.flags.overloaded),
            ads_spend: Some(row.marketing_spend),
            ads_sales: Some(row.marketing_attributed_sales),
            preparation_time: row.prep_time,
            delivery_time: row.delivery_time,
        }
    }
}

/// Insert or replace a restaurant directory entry
pub async fn upsert_restaurant(db: &DbConn, restaurant: &Restaurant) -> Result<()> {
    db.query("UPSERT type::thing('restaurants', $id) SET restaurant_id = $id, name = $name")
        .bind(("id", restaurant.id))
        .bind(("name", restaurant.name.clone()))
        .await?
        .check()?;
    Ok(())
}

/// Insert or replace one platform-day; the record id is `{restaurant_id}_{date}`
pub async fn upsert_platform_row(db: &DbConn, row: &PlatformDailyRow) -> Result<()> {
    let key = format!("{}_{}", row.restaurant_id, row.date.format(DATE_FORMAT));
    db.query("UPSERT type::thing($table, $key) CONTENT $row")
        .bind(("table", row.platform.table()))
        .bind(("key", key))
        .bind(("row", StatsRow::from(row)))
        .await?
        .check()?;
    Ok(())
}

pub struct SurrealMetricStore {
    db: DbConn,
}

impl SurrealMetricStore {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetricStore for SurrealMetricStore {
    async fn resolve_restaurant(&self, name: &str) -> Result<Option<Restaurant>> {
        let rows: Vec<RestaurantRow> = self
            .db
            .query("SELECT restaurant_id, name FROM restaurants WHERE name = $name LIMIT 1")
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;

        Ok(rows.into_iter().next().map(|r| Restaurant {
            id: r.restaurant_id,
            name: r.name,
        }))
    }

    async fn platform_rows(
        &self,
        restaurant_id: i64,
        platform: Platform,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PlatformDailyRow>> {
        let raw: Vec<StatsRow> = self
            .db
            .query(
                r#"
                SELECT
                    restaurant_id, stat_date, sales, orders, rating, cancelled_orders,
                    store_is_closed, out_of_stock, overloaded, ads_spend, ads_sales,
                    preparation_time, delivery_time
                FROM type::table($table)
                WHERE restaurant_id = $restaurant_id
                    AND stat_date >= $from
                    AND stat_date <= $to
                ORDER BY stat_date
                "#,
            )
            .bind(("table", platform.table()))
            .bind(("restaurant_id", restaurant_id))
            .bind(("from", from.format(DATE_FORMAT).to_string()))
            .bind(("to", to.format(DATE_FORMAT).to_string()))
            .await?
            .take(0)?;

        let total = raw.len();
        let rows: Vec<PlatformDailyRow> = raw
            .into_iter()
            .filter_map(|r| r.into_platform_row(platform))
            .collect();
        if rows.len() < total {
            warn!(
                platform = %platform,
                restaurant_id,
                skipped = total - rows.len(),
                "Skipped rows with unparseable stat_date"
            );
        }
        debug!(platform = %platform, restaurant_id, rows = rows.len(), "Loaded platform rows");
        Ok(rows)
    }
}
