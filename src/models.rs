use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Delivery platform a daily row was exported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Grab,
    Gojek,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Grab, Platform::Gojek];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grab" => Some(Platform::Grab),
            "gojek" | "go-jek" | "gofood" => Some(Platform::Gojek),
            _ => None,
        }
    }

    /// Metric-store table holding this platform's daily stats
    pub fn table(&self) -> &'static str {
        match self {
            Platform::Grab => "grab_stats",
            Platform::Gojek => "gojek_stats",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Grab => "grab",
            Platform::Gojek => "gojek",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Restaurant as resolved by the metric store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalFlags {
    pub closed: bool,
    pub out_of_stock: bool,
    pub overloaded: bool,
}

impl OperationalFlags {
    pub fn merge(self, other: OperationalFlags) -> OperationalFlags {
        OperationalFlags {
            closed: self.closed || other.closed,
            out_of_stock: self.out_of_stock || other.out_of_stock,
            overloaded: self.overloaded || other.overloaded,
        }
    }
}

/// One platform's export for one restaurant-day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformDailyRow {
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub platform: Platform,
    pub sales: f64,
    pub orders: i64,
    pub rating: Option<f64>,
    pub cancelled_orders: i64,
    pub flags: OperationalFlags,
    pub marketing_spend: f64,
    pub marketing_attributed_sales: f64,
    /// Only some platforms report kitchen and courier timings
    pub prep_time: Option<f64>,
    pub delivery_time: Option<f64>,
}

/// Both platforms merged into one normalized restaurant-day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricRecord {
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub sales_by_platform: BTreeMap<Platform, f64>,
    pub orders_by_platform: BTreeMap<Platform, i64>,
    pub rating: Option<f64>,
    pub cancelled_orders: i64,
    pub operational_flags: OperationalFlags,
    pub marketing_spend: f64,
    pub marketing_attributed_sales: f64,
    pub prep_time: Option<f64>,
    pub delivery_time: Option<f64>,
    pub average_order_value: Option<f64>,
    pub cancellation_rate: f64,
    pub roas: f64,
}

impl DailyMetricRecord {
    pub fn total_sales(&self) -> f64 {
        self.sales_by_platform.values().sum()
    }

    pub fn total_orders(&self) -> i64 {
        self.orders_by_platform.values().sum()
    }

    /// Platforms that actually sold something that day
    pub fn platforms_active(&self) -> usize {
        self.sales_by_platform.values().filter(|s| **s > 0.0).count()
    }
}

/// Geographic cluster used to scale weather sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Beach,
    Central,
    Mountain,
    Unknown,
}

impl From<&str> for Zone {
    fn from(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        if s.starts_with("beach") {
            Zone::Beach
        } else if s.starts_with("central") || s == "city" || s == "urban" {
            Zone::Central
        } else if s.starts_with("mountain") || s == "highland" {
            Zone::Mountain
        } else {
            Zone::Unknown
        }
    }
}

impl Zone {
    /// Multiplier applied to precipitation when estimating weather impact
    pub fn weather_sensitivity(&self) -> f64 {
        match self {
            Zone::Beach => 1.3,
            Zone::Central => 1.0,
            Zone::Mountain => 0.8,
            Zone::Unknown => 1.0,
        }
    }
}

/// Daily weather aggregate (mean temperature, summed rain, max wind)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub temperature: f64,
    pub precipitation: f64,
    pub wind_speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolidayType {
    National,
    Religious,
    Balinese,
    Regional,
    Observance,
}

impl From<&str> for HolidayType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "national" | "public" => HolidayType::National,
            "religious" => HolidayType::Religious,
            "balinese" => HolidayType::Balinese,
            "regional" | "local" => HolidayType::Regional,
            _ => HolidayType::Observance,
        }
    }
}

impl HolidayType {
    pub fn impact_weight(&self) -> f64 {
        match self {
            HolidayType::National => 1.0,
            HolidayType::Religious => 0.9,
            HolidayType::Balinese => 0.8,
            HolidayType::Regional => 0.6,
            HolidayType::Observance => 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolidayInfo {
    pub name: String,
    pub holiday_type: HolidayType,
    pub category: String,
}

/// External context for one restaurant-day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalFactorSnapshot {
    pub date: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub precipitation: f64,
    pub wind_speed: f64,
    pub holiday_name: Option<String>,
    pub holiday_category: Option<String>,
    pub holiday_type: Option<HolidayType>,
    pub zone: Zone,
    pub location_estimated: bool,
    pub weather_estimated: bool,
}

impl ExternalFactorSnapshot {
    pub fn is_holiday(&self) -> bool {
        self.holiday_name.is_some()
    }

    pub fn holiday_weight(&self) -> f64 {
        self.holiday_type.map(|t| t.impact_weight()).unwrap_or(0.0)
    }

    pub fn weather(&self) -> WeatherObservation {
        WeatherObservation {
            temperature: self.temperature,
            precipitation: self.precipitation,
            wind_speed: self.wind_speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!(Platform::parse("Grab"), Some(Platform::Grab));
        assert_eq!(Platform::parse(" gojek "), Some(Platform::Gojek));
        assert_eq!(Platform::parse("shopee"), None);
        assert_eq!(Platform::Gojek.table(), "gojek_stats");
    }

    #[test]
    fn test_zone_from_labels() {
        assert_eq!(Zone::from("beach_luxury"), Zone::Beach);
        assert_eq!(Zone::from("Mountain"), Zone::Mountain);
        assert_eq!(Zone::from("central"), Zone::Central);
        assert_eq!(Zone::from("atoll"), Zone::Unknown);
        assert!(Zone::Beach.weather_sensitivity() > Zone::Mountain.weather_sensitivity());
    }

    #[test]
    fn test_holiday_weights_ordered() {
        assert_eq!(HolidayType::from("national"), HolidayType::National);
        assert_eq!(HolidayType::from("something"), HolidayType::Observance);
        assert!(HolidayType::National.impact_weight() > HolidayType::Regional.impact_weight());
    }
}
