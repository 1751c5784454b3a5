//! Run parameters for the backend.
//!
//! [`RoveParams`] holds everything a run needs: which agency and month to
//! process, which service days to select, and where inputs and outputs live.
//! Tunables that rarely change are kept in a JSON [`BackendConfig`].

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::RoveError;

/// Agencies the backend has been calibrated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agency {
    Cta,
    Mbta,
    Wmata,
}

impl Agency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Agency::Cta => "CTA",
            Agency::Mbta => "MBTA",
            Agency::Wmata => "WMATA",
        }
    }

    /// Header used when the agency's static feed is behind an API key.
    pub fn api_key_header(&self) -> &'static str {
        match self {
            Agency::Wmata => "api_key",
            _ => "x-api-key",
        }
    }
}

impl FromStr for Agency {
    type Err = RoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CTA" => Ok(Agency::Cta),
            "MBTA" => Ok(Agency::Mbta),
            "WMATA" => Ok(Agency::Wmata),
            _ => Err(RoveError::UnsupportedAgency(s.to_string())),
        }
    }
}

impl fmt::Display for Agency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which service days of the month are analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateType {
    Workday,
    Saturday,
    Sunday,
}

impl DateType {
    pub fn matches(&self, day: Weekday) -> bool {
        match self {
            DateType::Workday => !matches!(day, Weekday::Sat | Weekday::Sun),
            DateType::Saturday => day == Weekday::Sat,
            DateType::Sunday => day == Weekday::Sun,
        }
    }
}

impl FromStr for DateType {
    type Err = RoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "workday" => Ok(DateType::Workday),
            "saturday" => Ok(DateType::Saturday),
            "sunday" => Ok(DateType::Sunday),
            _ => Err(RoveError::InvalidParameter {
                name: "date_type",
                value: s.to_string(),
            }),
        }
    }
}

/// Input data sources available for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOption {
    Gtfs,
    GtfsAvl,
    GtfsAvlOdx,
}

impl DataOption {
    pub fn has_avl(&self) -> bool {
        !matches!(self, DataOption::Gtfs)
    }
}

impl FromStr for DataOption {
    type Err = RoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GTFS" => Ok(DataOption::Gtfs),
            "GTFS-AVL" => Ok(DataOption::GtfsAvl),
            "GTFS-AVL-ODX" => Ok(DataOption::GtfsAvlOdx),
            _ => Err(RoveError::InvalidParameter {
                name: "data_option",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DataOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataOption::Gtfs => "GTFS",
            DataOption::GtfsAvl => "GTFS-AVL",
            DataOption::GtfsAvlOdx => "GTFS-AVL-ODX",
        })
    }
}

/// A named window of the service day, in seconds after midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub name: String,
    pub start: i64,
    pub end: i64,
}

impl TimePeriod {
    pub fn new(name: &str, start_hour: i64, end_hour: i64) -> Self {
        Self {
            name: name.to_string(),
            start: start_hour * 3600,
            end: end_hour * 3600,
        }
    }

    pub fn contains(&self, seconds: i64) -> bool {
        seconds >= self.start && seconds < self.end
    }
}

/// Tolerance, in minutes, for counting an arrival as on time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnTimeWindow {
    pub no_earlier_than: i64,
    pub no_later_than: i64,
}

impl Default for OnTimeWindow {
    fn default() -> Self {
        Self {
            no_earlier_than: -1,
            no_later_than: 5,
        }
    }
}

impl OnTimeWindow {
    pub fn validate(&self) -> Result<(), RoveError> {
        if self.no_earlier_than > 0 || self.no_later_than < 0 {
            return Err(RoveError::InvalidOnTimeWindow(self.no_earlier_than, self.no_later_than));
        }
        Ok(())
    }
}

/// Backend tunables, usually read from a JSON file.
///
/// ```json
/// {
///   "route_type": { "bus": [3, 700] },
///   "on_time": { "no_earlier_than": -1, "no_later_than": 5 },
///   "valhalla_url": "http://localhost:8002"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub route_type: HashMap<String, Vec<u16>>,
    pub time_periods: Vec<TimePeriod>,
    pub on_time: OnTimeWindow,
    pub valhalla_url: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            route_type: HashMap::from([("bus".to_string(), vec![3, 700, 701, 702, 704, 715])]),
            time_periods: vec![
                TimePeriod::new("full", 0, 48),
                TimePeriod::new("am_peak", 6, 9),
                TimePeriod::new("midday", 9, 15),
                TimePeriod::new("pm_peak", 15, 18),
                TimePeriod::new("evening", 18, 24),
                TimePeriod::new("night", 24, 30),
            ],
            on_time: OnTimeWindow::default(),
            valhalla_url: None,
        }
    }
}

impl BackendConfig {
    /// Loads the config from a JSON file at `path`. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn route_types_for(&self, mode: &str) -> Result<&[u16], RoveError> {
        self.route_type
            .get(mode)
            .filter(|types| !types.is_empty())
            .map(Vec::as_slice)
            .ok_or_else(|| RoveError::UnknownMode(mode.to_string()))
    }
}

/// Input file locations for a run.
#[derive(Debug, Clone)]
pub struct InputPaths {
    pub gtfs: PathBuf,
    pub avl: PathBuf,
}

/// Output file locations for a run.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub shapes: PathBuf,
    pub timepoints: PathBuf,
    pub stop_name_lookup: PathBuf,
    pub stop_metrics: PathBuf,
    pub tpbp_metrics: PathBuf,
    pub route_metrics: PathBuf,
    pub stop_aggregated: PathBuf,
    pub route_aggregated: PathBuf,
}

impl OutputPaths {
    pub fn all(&self) -> [&Path; 8] {
        [
            &self.shapes,
            &self.timepoints,
            &self.stop_name_lookup,
            &self.stop_metrics,
            &self.tpbp_metrics,
            &self.route_metrics,
            &self.stop_aggregated,
            &self.route_aggregated,
        ]
    }
}

/// Parameters shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct RoveParams {
    pub agency: Agency,
    pub month: String,
    pub year: String,
    pub date_type: DateType,
    pub data_option: DataOption,
    pub backend_config: BackendConfig,
    pub date_list: Vec<NaiveDate>,
    pub suffix: String,
    pub input_paths: InputPaths,
    pub output_paths: OutputPaths,
}

impl RoveParams {
    pub fn new(
        agency: Agency,
        month: &str,
        year: &str,
        date_type: DateType,
        data_option: DataOption,
        backend_config: BackendConfig,
        base_dir: impl AsRef<Path>,
    ) -> Result<Self, RoveError> {
        let month_num = month
            .parse::<u32>()
            .ok()
            .filter(|m| month.len() == 2 && (1..=12).contains(m))
            .ok_or_else(|| RoveError::InvalidParameter {
                name: "month",
                value: month.to_string(),
            })?;
        let year_num = year
            .parse::<i32>()
            .ok()
            .filter(|_| year.len() == 4)
            .ok_or_else(|| RoveError::InvalidParameter {
                name: "year",
                value: year.to_string(),
            })?;

        let date_list = dates_in_month(year_num, month_num, date_type);
        let suffix = format!("_{month}_{year}");
        let base = base_dir.as_ref();
        let data_dir = base.join("data").join(agency.as_str());
        let frontend_dir = base
            .join("frontend/static/inputs")
            .join(agency.as_str());

        let input_paths = InputPaths {
            gtfs: data_dir.join(format!("gtfs/GTFS{suffix}.zip")),
            avl: data_dir.join(format!("avl/AVL{suffix}.csv")),
        };
        let output_paths = OutputPaths {
            shapes: frontend_dir.join(format!("shapes/bus-shapes{suffix}.json")),
            timepoints: frontend_dir.join(format!("timepoints/timepoints{suffix}.json")),
            stop_name_lookup: frontend_dir.join(format!("lookup/stop_name_lookup{suffix}.json")),
            stop_metrics: data_dir.join(format!("metrics/stop_metrics{suffix}.csv")),
            tpbp_metrics: data_dir.join(format!("metrics/tpbp_metrics{suffix}.csv")),
            route_metrics: data_dir.join(format!("metrics/route_metrics{suffix}.csv")),
            stop_aggregated: frontend_dir.join(format!("metrics/stop_aggregated{suffix}.json")),
            route_aggregated: frontend_dir.join(format!("metrics/route_aggregated{suffix}.json")),
        };

        Ok(Self {
            agency,
            month: month.to_string(),
            year: year.to_string(),
            date_type,
            data_option,
            backend_config,
            date_list,
            suffix,
            input_paths,
            output_paths,
        })
    }
}

/// Every date of `year`-`month` whose weekday matches `date_type`.
fn dates_in_month(year: i32, month: u32, date_type: DateType) -> Vec<NaiveDate> {
    (1..=31)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .filter(|d| date_type.matches(d.weekday()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(date_type: DateType) -> RoveParams {
        RoveParams::new(
            Agency::Mbta,
            "03",
            "2022",
            date_type,
            DataOption::Gtfs,
            BackendConfig::default(),
            "/tmp/rove",
        )
        .unwrap()
    }

    #[test]
    fn test_agency_parsing() {
        assert_eq!("mbta".parse::<Agency>().unwrap(), Agency::Mbta);
        assert_eq!("WMATA".parse::<Agency>().unwrap(), Agency::Wmata);
        assert!(matches!(
            "SEPTA".parse::<Agency>(),
            Err(RoveError::UnsupportedAgency(_))
        ));
    }

    #[test]
    fn test_workdays_in_march_2022() {
        let p = params(DateType::Workday);
        // March 2022 starts on a Tuesday and has 23 weekdays
        assert_eq!(p.date_list.len(), 23);
        assert_eq!(p.date_list[0], NaiveDate::from_ymd_opt(2022, 3, 1).unwrap());
    }

    #[test]
    fn test_weekend_dates() {
        assert_eq!(params(DateType::Saturday).date_list.len(), 4);
        assert_eq!(params(DateType::Sunday).date_list.len(), 4);
    }

    #[test]
    fn test_paths_use_suffix() {
        let p = params(DateType::Workday);
        assert_eq!(p.suffix, "_03_2022");
        assert_eq!(
            p.input_paths.gtfs,
            PathBuf::from("/tmp/rove/data/MBTA/gtfs/GTFS_03_2022.zip")
        );
        assert_eq!(
            p.output_paths.shapes,
            PathBuf::from("/tmp/rove/frontend/static/inputs/MBTA/shapes/bus-shapes_03_2022.json")
        );
    }

    #[test]
    fn test_invalid_month_rejected() {
        let result = RoveParams::new(
            Agency::Cta,
            "13",
            "2022",
            DateType::Workday,
            DataOption::Gtfs,
            BackendConfig::default(),
            ".",
        );
        assert!(matches!(
            result,
            Err(RoveError::InvalidParameter { name: "month", .. })
        ));
    }

    #[test]
    fn test_config_defaults_and_partial_json() {
        let config: BackendConfig = serde_json::from_str(r#"{"valhalla_url": "http://v"}"#).unwrap();
        assert_eq!(config.route_types_for("bus").unwrap()[0], 3);
        assert_eq!(config.on_time, OnTimeWindow::default());
        assert_eq!(config.valhalla_url.as_deref(), Some("http://v"));
        assert!(config.route_types_for("ferry").is_err());
    }

    #[test]
    fn test_time_period_is_half_open() {
        let p = TimePeriod::new("am_peak", 6, 9);
        assert!(p.contains(6 * 3600));
        assert!(!p.contains(9 * 3600));
    }
}
