//! Load delivery-platform CSV exports into SurrealDB
//!
//! Usage:
//!   cargo run --release --bin ingest -- --input raw-data/exports.csv --db data/sales.db

use anyhow::Result;
use clap::Parser;
use sales_attribution::db;
use sales_attribution::ingest::{read_exports_path, store_batch};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest daily grab/gojek exports into the metric store")]
struct Args {
    /// Export CSV path(s)
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Database path
    #[arg(long, default_value = "data/sales.db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let args = Args::parse();

    info!("Connecting to SurrealDB at {:?}", args.db);
    let db = db::connect(&args.db.to_string_lossy()).await?;
    db::init_schema(&db).await?;

    let mut stored = 0;
    let mut rejected = 0;
    for input in &args.inputs {
        info!("Reading exports from {:?}", input);
        let batch = read_exports_path(input)?;
        rejected += batch.rejected;
        stored += store_batch(&db, &batch).await?;
    }

    info!("Ingestion complete: {} rows, {} rejected", stored, rejected);
    Ok(())
}
