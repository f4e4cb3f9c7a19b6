//! Holiday calendar keyed by exact date string.

use crate::error::Result;
use crate::models::{HolidayInfo, HolidayType};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Either a full record or just the holiday name
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HolidayEntry {
    Detailed {
        name: String,
        #[serde(rename = "type", default)]
        holiday_type: Option<String>,
        #[serde(default)]
        category: Option<String>,
    },
    Name(String),
}

impl From<HolidayEntry> for HolidayInfo {
    fn from(entry: HolidayEntry) -> Self {
        match entry {
            HolidayEntry::Detailed {
                name,
                holiday_type,
                category,
            } => {
                let holiday_type = holiday_type
                    .as_deref()
                    .map(HolidayType::from)
                    .unwrap_or(HolidayType::Observance);
                HolidayInfo {
                    name,
                    holiday_type,
                    category: category.unwrap_or_else(|| "general".to_string()),
                }
            }
            HolidayEntry::Name(name) => HolidayInfo {
                name,
                holiday_type: HolidayType::Observance,
                category: "general".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    by_date: HashMap<String, HolidayInfo>,
}

impl HolidayCalendar {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, HolidayEntry> = serde_json::from_str(raw)?;
        let by_date = parsed
            .into_iter()
            .map(|(date, entry)| (date.trim().to_string(), HolidayInfo::from(entry)))
            .collect();
        Ok(Self { by_date })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// `None` means an ordinary day
    pub fn lookup(&self, date: NaiveDate) -> Option<&HolidayInfo> {
        self.by_date.get(&date.format("%Y-%m-%d").to_string())
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "2025-03-29": {"name": "Nyepi", "type": "balinese", "category": "Hindu"},
        "2025-08-17": {"name": "Independence Day", "type": "national"},
        "2025-05-12": "Vesak"
    }"#;

    #[test]
    fn test_lookup_by_exact_date() {
        let calendar = HolidayCalendar::from_json_str(SAMPLE).unwrap();
        assert_eq!(calendar.len(), 3);

        let nyepi = calendar
            .lookup(NaiveDate::from_ymd_opt(2025, 3, 29).unwrap())
            .unwrap();
        assert_eq!(nyepi.holiday_type, HolidayType::Balinese);
        assert_eq!(nyepi.category, "Hindu");

        let independence = calendar
            .lookup(NaiveDate::from_ymd_opt(2025, 8, 17).unwrap())
            .unwrap();
        assert_eq!(independence.holiday_type, HolidayType::National);
        assert_eq!(independence.category, "general");
    }

    #[test]
    fn test_plain_name_entry() {
        let calendar = HolidayCalendar::from_json_str(SAMPLE).unwrap();
        let vesak = calendar
            .lookup(NaiveDate::from_ymd_opt(2025, 5, 12).unwrap())
            .unwrap();
        assert_eq!(vesak.name, "Vesak");
        assert_eq!(vesak.holiday_type, HolidayType::Observance);
    }

    #[test]
    fn test_missing_date_is_not_a_holiday() {
        let calendar = HolidayCalendar::from_json_str(SAMPLE).unwrap();
        assert!(calendar
            .lookup(NaiveDate::from_ymd_opt(2025, 5, 18).unwrap())
            .is_none());
        assert!(HolidayCalendar::empty().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holidays.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(HolidayCalendar::from_json_file(&path).unwrap().len(), 3);
    }
}
