//! Sales anomaly attribution batch run
//!
//! Usage:
//!   cargo run --release -- --restaurant "Warung Pantai" --from 2025-05-01 --to 2025-05-31
//!
//! Options:
//!   --config <PATH>       TOML analysis config (defaults for anything missing)
//!   --db <PATH>           SurrealDB RocksDB path (default: data/sales.db)
//!   --restaurant <NAME>   Restaurant to analyse, repeatable
//!   --from / --to <DATE>  Inclusive analysis range, YYYY-MM-DD
//!   --locations <PATH>    CSV name,latitude,longitude,zone
//!   --holidays <PATH>     JSON date -> {name, type, category}
//!   --workers <N>         Enrichment worker pool size
//!   --offline             No weather calls; cache or neutral weather only
//!   --output <PATH>       Write the full report as JSON

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::Parser;
use sales_attribution::config::AnalysisConfig;
use sales_attribution::db::{self, SurrealMetricStore};
use sales_attribution::enrichment::cache::{SurrealCacheStore, WeatherCache};
use sales_attribution::enrichment::calendar::HolidayCalendar;
use sales_attribution::enrichment::locations::LocationDirectory;
use sales_attribution::enrichment::weather::{GuardedWeatherClient, OpenMeteoProvider};
use sales_attribution::enrichment::Enricher;
use sales_attribution::pipeline::{Pipeline, PipelineReport, PipelineRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sales_attribution")]
#[command(about = "Detect sales anomalies and attribute them to operational and external factors")]
struct Args {
    /// Analysis config (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path
    #[arg(long, default_value = "data/sales.db")]
    db: PathBuf,

    /// Restaurant name; repeat for several
    #[arg(long = "restaurant", required = true)]
    restaurants: Vec<String>,

    /// First day of the analysis range
    #[arg(long)]
    from: NaiveDate,

    /// Last day of the analysis range
    #[arg(long)]
    to: NaiveDate,

    /// Restaurant location CSV
    #[arg(long)]
    locations: Option<PathBuf>,

    /// Holiday calendar JSON
    #[arg(long)]
    holidays: Option<PathBuf>,

    /// Enrichment workers (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Never call the weather provider
    #[arg(long)]
    offline: bool,

    /// Report output path (JSON)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if args.to < args.from {
        bail!("--to ({}) is before --from ({})", args.to, args.from);
    }

    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_toml_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    config.enrichment.offline |= args.offline;
    config.validate()?;

    info!("Connecting to SurrealDB at {:?}", args.db);
    let db = db::connect(&args.db.to_string_lossy()).await?;
    db::init_schema(&db).await?;

    let locations = match &args.locations {
        Some(path) => LocationDirectory::from_csv_path(path)?,
        None => LocationDirectory::empty(),
    };
    let calendar = match &args.holidays {
        Some(path) => HolidayCalendar::from_json_file(path)?,
        None => HolidayCalendar::empty(),
    };
    info!(locations = locations.len(), holidays = calendar.len(), "Reference data loaded");

    let cache = Arc::new(WeatherCache::new(
        Arc::new(SurrealCacheStore::new(db.clone())),
        config.enrichment.coordinate_precision,
    ));
    cache.load().await?;

    let client = if config.enrichment.offline {
        None
    } else {
        let provider = Arc::new(OpenMeteoProvider::new(&config.enrichment)?);
        Some(GuardedWeatherClient::from_config(provider, &config.enrichment))
    };
    let enricher = Arc::new(Enricher::new(
        config.enrichment.clone(),
        locations,
        calendar,
        cache,
        client,
    ));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight work");
            on_signal.cancel();
        }
    });

    let request = PipelineRequest {
        restaurants: args.restaurants.clone(),
        from: args.from,
        to: args.to,
    };
    let pipeline = Pipeline::new(config, Arc::new(SurrealMetricStore::new(db)), enricher);
    let report = pipeline.run(&request, &cancel).await?;

    print_summary(&report);
    if let Some(path) = &args.output {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("Report written to {:?}", path);
    }
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    println!("Sales Anomaly Attribution");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for model in &report.models {
        let scope = model
            .restaurant_id
            .map(|id| format!("restaurant {}", id))
            .unwrap_or_else(|| "market".to_string());
        match &model.quality {
            Some(q) => println!(
                "Model ({}): R² {:.3}, MAE {:.0}, {} training rows{}",
                scope,
                q.r2,
                q.mean_absolute_error,
                q.training_rows,
                if q.low_confidence { " [low confidence]" } else { "" }
            ),
            None => println!("Model ({}): rule-based fallback", scope),
        }
    }
    for skipped in &report.skipped {
        println!("Skipped {}: {}", skipped.name, skipped.reason);
    }
    println!();

    for analyzed in &report.results {
        let a = &analyzed.attribution;
        println!(
            "{} restaurant {}  {}  actual {:.0} vs expected {:.0} ({:+.1}%)  confidence {:?}",
            a.anomaly.date,
            a.anomaly.restaurant_id,
            a.anomaly.severity,
            a.anomaly.actual_sales,
            a.expected_sales(),
            a.anomaly.deviation_percent,
            a.confidence()
        );
        for c in a.contributions.iter().take(5) {
            println!("    {:<22} {:>+14.0}", c.feature, c.amount);
        }
        println!("    {:<22} {:>+14.0}", "unexplained", a.unexplained_residual);
        for rec in &analyzed.recommendations {
            println!("  → {} (recoverable {:.0})", rec.message, rec.recoverable_value);
        }
        println!();
    }

    info!(anomalies = report.results.len(), "Run complete");
}
