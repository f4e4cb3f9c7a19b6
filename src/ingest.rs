//! Platform export ingestion
//!
//! Loads daily CSV exports from both delivery platforms into the metric
//! store. One file may mix platforms; the `platform` column decides the
//! target table.

use crate::db::{flag, upsert_platform_row, upsert_restaurant, DbConn, StatsRow};
use crate::error::Result;
use crate::models::{Platform, PlatformDailyRow, Restaurant};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Column layout of an export file
#[derive(Debug, Deserialize)]
struct ExportRow {
    restaurant_id: i64,
    restaurant_name: String,
    platform: String,
    stat_date: String,
    sales: Option<f64>,
    orders: Option<i64>,
    rating: Option<f64>,
    cancelled_orders: Option<i64>,
    #[serde(default, deserialize_with = "flag")]
    store_is_closed: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    out_of_stock: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    overloaded: Option<bool>,
    ads_spend: Option<f64>,
    ads_sales: Option<f64>,
    preparation_time: Option<f64>,
    delivery_time: Option<f64>,
}

#[derive(Debug, Default)]
pub struct ExportBatch {
    pub restaurants: Vec<Restaurant>,
    pub rows: Vec<PlatformDailyRow>,
    /// Lines that could not be parsed or had an unknown platform or date
    pub rejected: usize,
}

pub fn read_exports<R: Read>(rdr: R) -> Result<ExportBatch> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(rdr);

    let mut restaurants = BTreeMap::new();
    let mut batch = ExportBatch::default();

    for (line, parsed) in reader.deserialize::<ExportRow>().enumerate() {
        let export = match parsed {
            Ok(row) => row,
            Err(e) => {
                if batch.rejected < 5 {
                    warn!(line = line + 2, "Unparseable export row: {}", e);
                }
                batch.rejected += 1;
                continue;
            }
        };

        let Some(platform) = Platform::parse(&export.platform) else {
            warn!(line = line + 2, platform = %export.platform, "Unknown platform");
            batch.rejected += 1;
            continue;
        };
        restaurants
            .entry(export.restaurant_id)
            .or_insert_with(|| export.restaurant_name.clone());

        let stats = StatsRow {
            restaurant_id: export.restaurant_id,
            stat_date: export.stat_date,
            sales: export.sales,
            orders: export.orders,
            rating: export.rating,
            cancelled_orders: export.cancelled_orders,
            store_is_closed: export.store_is_closed,
            out_of_stock: export.out_of_stock,
            overloaded: export.overloaded,
            ads_spend: export.ads_spend,
            ads_sales: export.ads_sales,
            preparation_time: export.preparation_time,
            delivery_time: export.delivery_time,
        };
        match stats.into_platform_row(platform) {
            Some(row) => batch.rows.push(row),
            None => {
                warn!(line = line + 2, "Export row has an invalid stat_date");
                batch.rejected += 1;
            }
        }
    }

    batch.restaurants = restaurants
        .into_iter()
        .map(|(id, name)| Restaurant { id, name })
        .collect();
    Ok(batch)
}

pub fn read_exports_path(path: impl AsRef<Path>) -> Result<ExportBatch> {
    let file = std::fs::File::open(path)?;
    read_exports(file)
}

/// Write a batch; re-ingesting the same file replaces rather than duplicates.
pub async fn store_batch(db: &DbConn, batch: &ExportBatch) -> Result<usize> {
    for restaurant in &batch.restaurants {
        upsert_restaurant(db, restaurant).await?;
    }
    for (i, row) in batch.rows.iter().enumerate() {
        upsert_platform_row(db, row).await?;
        if (i + 1) % 5000 == 0 {
            info!("Stored {}/{} rows...", i + 1, batch.rows.len());
        }
    }
    info!(
        restaurants = batch.restaurants.len(),
        rows = batch.rows.len(),
        rejected = batch.rejected,
        "Export batch stored"
    );
    Ok(batch.rows.len())
}
