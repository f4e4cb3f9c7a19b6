//! Metric Aggregator
//!
//! Merges per-platform daily rows into one `DailyMetricRecord` per date.
//! Sums treat a missing platform as zero; ratios only use platforms that
//! reported that day.

use crate::db::MetricStore;
use crate::error::{AnalysisError, Result};
use crate::models::{DailyMetricRecord, OperationalFlags, Platform, PlatformDailyRow, Restaurant};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::info;

/// Resolve the restaurant and load its merged records for `[from, to]`.
pub async fn load_records(
    store: &dyn MetricStore,
    restaurant_name: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(Restaurant, Vec<DailyMetricRecord>)> {
    let restaurant = store
        .resolve_restaurant(restaurant_name)
        .await?
        .ok_or_else(|| AnalysisError::RestaurantNotFound(restaurant_name.to_string()))?;

    let mut rows = Vec::new();
    for platform in Platform::ALL {
        rows.extend(
            store
                .platform_rows(restaurant.id, platform, from, to)
                .await?,
        );
    }

    let records = aggregate_rows(restaurant.id, &rows);
    info!(
        restaurant = %restaurant.name,
        rows = rows.len(),
        days = records.len(),
        "Aggregated platform rows"
    );
    Ok((restaurant, records))
}

/// Pure merge of raw rows. Rows for other restaurants are ignored; a
/// duplicate (date, platform) row is summed into the same bucket.
pub fn aggregate_rows(restaurant_id: i64, rows: &[PlatformDailyRow]) -> Vec<DailyMetricRecord> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&PlatformDailyRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.restaurant_id == restaurant_id) {
        by_date.entry(row.date).or_default().push(row);
    }

    by_date
        .into_iter()
        .map(|(date, day_rows)| merge_day(restaurant_id, date, &day_rows))
        .collect()
}

fn merge_day(restaurant_id: i64, date: NaiveDate, rows: &[&PlatformDailyRow]) -> DailyMetricRecord {
    let mut sales_by_platform: BTreeMap<Platform, f64> =
        Platform::ALL.iter().map(|p| (*p, 0.0)).collect();
    let mut orders_by_platform: BTreeMap<Platform, i64> =
        Platform::ALL.iter().map(|p| (*p, 0)).collect();

    let mut cancelled_orders = 0;
    let mut flags = OperationalFlags::default();
    let mut marketing_spend = 0.0;
    let mut marketing_attributed_sales = 0.0;
    let mut ratings = Vec::new();
    let mut prep_times = Vec::new();
    let mut delivery_times = Vec::new();

    for row in rows {
        *sales_by_platform.entry(row.platform).or_insert(0.0) += row.sales;
        *orders_by_platform.entry(row.platform).or_insert(0) += row.orders;
        cancelled_orders += row.cancelled_orders;
        flags = flags.merge(row.flags);
        marketing_spend += row.marketing_spend;
        marketing_attributed_sales += row.marketing_attributed_sales;
        ratings.extend(row.rating);
        prep_times.extend(row.prep_time);
        delivery_times.extend(row.delivery_time);
    }

    let total_sales: f64 = sales_by_platform.values().sum();
    let total_orders: i64 = orders_by_platform.values().sum();

    let average_order_value = (total_orders > 0).then(|| total_sales / total_orders as f64);
    let cancellation_rate = if total_orders > 0 {
        cancelled_orders as f64 / total_orders as f64
    } else {
        0.0
    };
    let roas = if marketing_spend > 0.0 {
        marketing_attributed_sales / marketing_spend
    } else {
        0.0
    };

    DailyMetricRecord {
        restaurant_id,
        date,
        sales_by_platform,
        orders_by_platform,
        rating: mean(&ratings),
        cancelled_orders,
        operational_flags: flags,
        marketing_spend,
        marketing_attributed_sales,
        prep_time: mean(&prep_times),
        delivery_time: mean(&delivery_times),
        average_order_value,
        cancellation_rate,
        roas,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
