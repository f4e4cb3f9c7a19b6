//! Restaurant geolocation directory
//! Maps restaurant names to coordinates and a weather zone

use crate::error::Result;
use crate::models::Zone;
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub zone: Zone,
}

/// Reference regions used when a row carries no zone label:
/// (name, latitude, longitude, zone)
pub static REGIONS: LazyLock<Vec<(&'static str, f64, f64, Zone)>> = LazyLock::new(|| {
    vec![
        ("Seminyak", -8.6913, 115.1682, Zone::Beach),
        ("Canggu", -8.6478, 115.1385, Zone::Beach),
        ("Kuta", -8.7222, 115.1723, Zone::Beach),
        ("Sanur", -8.6783, 115.2631, Zone::Beach),
        ("Nusa Dua", -8.8008, 115.2330, Zone::Beach),
        ("Jimbaran", -8.7908, 115.1600, Zone::Beach),
        ("Denpasar", -8.6705, 115.2126, Zone::Central),
        ("Ubud", -8.5069, 115.2625, Zone::Central),
        ("Kintamani", -8.2458, 115.3256, Zone::Mountain),
        ("Bedugul", -8.2753, 115.1664, Zone::Mountain),
    ]
});

/// Zone of the closest reference region
pub fn infer_zone(latitude: f64, longitude: f64) -> Zone {
    REGIONS
        .iter()
        .map(|(_, lat, lon, zone)| {
            let d = (lat - latitude).powi(2) + (lon - longitude).powi(2);
            (d, *zone)
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, zone)| zone)
        .unwrap_or(Zone::Unknown)
}

#[derive(Debug, Deserialize)]
struct LocationRow {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    zone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocationDirectory {
    by_name: HashMap<String, Location>,
    lowercase: HashMap<String, String>,
}

impl LocationDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        Ok(Self::from_rows(reader))
    }

    pub fn from_reader<R: Read>(rdr: R) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);
        Self::from_rows(reader)
    }

    fn from_rows<R: Read>(mut reader: csv::Reader<R>) -> Self {
        let mut directory = Self::default();
        let mut skipped = 0;
        for row in reader.deserialize::<LocationRow>() {
            match row {
                Ok(row) => directory.insert(row),
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping location row: {}", e);
                }
            }
        }
        info!(locations = directory.len(), skipped, "Loaded location directory");
        directory
    }

    fn insert(&mut self, row: LocationRow) {
        let zone = row
            .zone
            .as_deref()
            .filter(|z| !z.is_empty())
            .map(Zone::from)
            .unwrap_or_else(|| infer_zone(row.latitude, row.longitude));
        self.lowercase
            .insert(row.name.to_lowercase(), row.name.clone());
        self.by_name.insert(
            row.name,
            Location {
                latitude: row.latitude,
                longitude: row.longitude,
                zone,
            },
        );
    }

    /// Exact name first, then case-insensitive
    pub fn resolve(&self, name: &str) -> Option<Location> {
        self.by_name.get(name).copied().or_else(|| {
            self.lowercase
                .get(&name.trim().to_lowercase())
                .and_then(|canonical| self.by_name.get(canonical))
                .copied()
        })
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "name,latitude,longitude,zone
Warung Pantai,-8.6913,115.1682,beach
Kopi Ubud,-8.5069,115.2625,
Highland Grill,-8.25,115.32,
bad row,not-a-number,115.0,central
";

    #[test]
    fn test_resolve_exact_and_case_insensitive() {
        let directory = LocationDirectory::from_reader(CSV.as_bytes());
        assert_eq!(directory.len(), 3);
        let loc = directory.resolve("Warung Pantai").unwrap();
        assert_eq!(loc.zone, Zone::Beach);
        assert_eq!(directory.resolve("warung pantai"), Some(loc));
        assert!(directory.resolve("Unknown Kitchen").is_none());
    }

    #[test]
    fn test_missing_zone_is_inferred() {
        let directory = LocationDirectory::from_reader(CSV.as_bytes());
        assert_eq!(directory.resolve("Kopi Ubud").unwrap().zone, Zone::Central);
        assert_eq!(directory.resolve("Highland Grill").unwrap().zone, Zone::Mountain);
    }

    #[test]
    fn test_infer_zone_nearest_region() {
        assert_eq!(infer_zone(-8.65, 115.14), Zone::Beach);
        assert_eq!(infer_zone(-8.67, 115.21), Zone::Central);
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.csv");
        std::fs::write(&path, CSV).unwrap();
        assert_eq!(LocationDirectory::from_csv_path(&path).unwrap().len(), 3);
    }
}
