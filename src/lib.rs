pub mod aggregate;
pub mod anomaly;
pub mod attribution;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod features;
pub mod ingest;
pub mod model;
pub mod models;
pub mod pipeline;
pub mod recommend;
pub mod rules;
