//! Raw GTFS tables read from a zip archive or a directory of `.txt` files.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

use super::time::{de_date, de_optional_time};
use crate::error::RoveError;

/// Required tables and the columns ROVE needs in each. `direction_id` is
/// optional in GTFS but required here.
pub const REQUIRED_TABLES: &[(&str, &[&str])] = &[
    ("stops", &["stop_id", "stop_name", "stop_lat", "stop_lon"]),
    ("routes", &["route_id", "route_type"]),
    ("trips", &["route_id", "service_id", "trip_id", "direction_id"]),
    (
        "stop_times",
        &["trip_id", "arrival_time", "departure_time", "stop_id", "stop_sequence"],
    ),
];

/// Optional tables; skipped with a warning when absent or empty.
pub const OPTIONAL_TABLES: &[(&str, &[&str])] = &[(
    "shapes",
    &["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence"],
)];

const CALENDAR_COLUMNS: &[&str] = &[
    "service_id",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "start_date",
    "end_date",
];
const CALENDAR_DATES_COLUMNS: &[&str] = &["service_id", "date", "exception_type"];

/// Column names accepted for the timepoint flag, in order of preference.
pub const TIMEPOINT_COLUMNS: &[&str] = &["timepoint", "timepoints", "checkpoint"];

#[derive(Debug, Clone, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
    #[serde(default)]
    pub municipality: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub route_type: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
    pub direction_id: u8,
    #[serde(default)]
    pub shape_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    #[serde(deserialize_with = "de_optional_time")]
    pub arrival_time: Option<i64>,
    #[serde(deserialize_with = "de_optional_time")]
    pub departure_time: Option<i64>,
    pub stop_id: String,
    pub stop_sequence: u32,
    #[serde(default)]
    pub timepoint: Option<String>,
    #[serde(default)]
    pub timepoints: Option<String>,
    #[serde(default)]
    pub checkpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShapePoint {
    pub shape_id: String,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Calendar {
    pub service_id: String,
    pub monday: u8,
    pub tuesday: u8,
    pub wednesday: u8,
    pub thursday: u8,
    pub friday: u8,
    pub saturday: u8,
    pub sunday: u8,
    #[serde(deserialize_with = "de_date")]
    pub start_date: NaiveDate,
    #[serde(deserialize_with = "de_date")]
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarDate {
    pub service_id: String,
    #[serde(deserialize_with = "de_date")]
    pub date: NaiveDate,
    pub exception_type: u8,
}

/// Table files of a feed, keyed by table name without the `.txt` extension.
pub struct FeedArchive {
    files: HashMap<String, Vec<u8>>,
}

impl FeedArchive {
    /// Reads every `*.txt` entry of a zip archive. Entries nested in a
    /// top-level folder are accepted.
    pub fn from_zip_bytes(bytes: Vec<u8>) -> Result<Self, RoveError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut files = HashMap::new();

        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }
            let Some(path) = file.enclosed_name().map(Path::to_path_buf) else {
                warn!(index = i, "Archive entry has a malformed path, skipping");
                continue;
            };
            let Some(table) = table_name(&path) else {
                continue;
            };
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content)
                .map_err(|e| RoveError::Archive(e.into()))?;
            files.insert(table, content);
        }

        debug!(tables = ?files.keys().collect::<Vec<_>>(), "GTFS archive read");
        Ok(Self { files })
    }

    /// Reads every `*.txt` file of an extracted feed directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut files = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(table) = table_name(&path) {
                files.insert(table, std::fs::read(&path)?);
            }
        }
        Ok(Self { files })
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn headers(&self, name: &str) -> Result<Option<Vec<String>>, RoveError> {
        let Some(bytes) = self.files.get(name) else {
            return Ok(None);
        };
        let mut rdr = reader(bytes);
        let headers = rdr.headers().map_err(|source| RoveError::Csv {
            table: name.to_string(),
            source,
        })?;
        Ok(Some(headers.iter().map(str::to_string).collect()))
    }

    /// Deserializes table `name` after checking that `columns` are present.
    ///
    /// Returns `Ok(None)` when the file is absent; emptiness is left to the caller.
    fn read<T: DeserializeOwned>(
        &self,
        name: &str,
        columns: &[&str],
    ) -> Result<Option<Vec<T>>, RoveError> {
        let Some(headers) = self.headers(name)? else {
            return Ok(None);
        };

        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !headers.iter().any(|h| h == *c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RoveError::MissingColumns {
                table: name.to_string(),
                columns: missing,
            });
        }

        let mut rdr = reader(&self.files[name]);
        let mut rows = Vec::new();
        for result in rdr.deserialize() {
            let row: T = result.map_err(|source| RoveError::Csv {
                table: name.to_string(),
                source,
            })?;
            rows.push(row);
        }
        Ok(Some(rows))
    }

    fn read_required<T: DeserializeOwned>(
        &self,
        name: &str,
        columns: &[&str],
    ) -> Result<Vec<T>, RoveError> {
        match self.read(name, columns)? {
            None => Err(RoveError::MissingTable(name.to_string())),
            Some(rows) if rows.is_empty() => Err(RoveError::EmptyTable(name.to_string())),
            Some(rows) => Ok(rows),
        }
    }

    fn read_optional<T: DeserializeOwned>(
        &self,
        name: &str,
        columns: &[&str],
    ) -> Result<Option<Vec<T>>, RoveError> {
        match self.read(name, columns)? {
            None => {
                warn!(table = name, "Could not find optional table in GTFS data, skipping");
                Ok(None)
            }
            Some(rows) if rows.is_empty() => {
                warn!(table = name, "Optional GTFS table is empty, skipping");
                Ok(None)
            }
            Some(rows) => Ok(Some(rows)),
        }
    }
}

fn table_name(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("txt") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

fn reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes)
}

fn columns_of(tables: &[(&str, &'static [&'static str])], name: &str) -> &'static [&'static str] {
    tables.iter()
        .find(|(table, _)| *table == name)
        .map(|(_, cols)| *cols)
        .unwrap_or(&[])
}

/// All GTFS tables the backend uses, validated against the required columns.
#[derive(Debug, Clone)]
pub struct Feed {
    pub stops: Vec<Stop>,
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub stop_times: Vec<StopTime>,
    pub shapes: Option<Vec<ShapePoint>>,
    pub calendar: Vec<Calendar>,
    pub calendar_dates: Vec<CalendarDate>,
    /// Which of [`TIMEPOINT_COLUMNS`] the `stop_times` table carries, if any.
    pub timepoint_column: Option<&'static str>,
}

impl Feed {
    pub fn read(archive: &FeedArchive) -> Result<Self, RoveError> {
        let stops: Vec<Stop> =
            archive.read_required("stops", columns_of(REQUIRED_TABLES, "stops"))?;
        let routes: Vec<Route> =
            archive.read_required("routes", columns_of(REQUIRED_TABLES, "routes"))?;
        let trips: Vec<Trip> =
            archive.read_required("trips", columns_of(REQUIRED_TABLES, "trips"))?;
        let stop_times: Vec<StopTime> =
            archive.read_required("stop_times", columns_of(REQUIRED_TABLES, "stop_times"))?;
        let shapes = archive.read_optional("shapes", columns_of(OPTIONAL_TABLES, "shapes"))?;

        let calendar = archive.read("calendar", CALENDAR_COLUMNS)?;
        let calendar_dates = archive.read("calendar_dates", CALENDAR_DATES_COLUMNS)?;
        if calendar.is_none() && calendar_dates.is_none() {
            return Err(RoveError::MissingTable("calendar".to_string()));
        }

        let stop_time_headers = archive.headers("stop_times")?.unwrap_or_default();
        let timepoint_column = TIMEPOINT_COLUMNS
            .iter()
            .copied()
            .find(|c| stop_time_headers.iter().any(|h| h == c));

        let (stops, dropped_stops) = retain_with_ids(stops, |s| !s.stop_id.is_empty());
        let (trips, dropped_trips) = retain_with_ids(trips, |t| {
            !t.trip_id.is_empty() && !t.route_id.is_empty() && !t.service_id.is_empty()
        });
        let (stop_times, dropped_stop_times) =
            retain_with_ids(stop_times, |st| !st.trip_id.is_empty() && !st.stop_id.is_empty());
        if dropped_stops + dropped_trips + dropped_stop_times > 0 {
            debug!(
                dropped_stops,
                dropped_trips, dropped_stop_times, "Dropped GTFS rows with empty id columns"
            );
        }

        Ok(Self {
            stops,
            routes,
            trips,
            stop_times,
            shapes,
            calendar: calendar.unwrap_or_default(),
            calendar_dates: calendar_dates.unwrap_or_default(),
            timepoint_column,
        })
    }

    pub fn has_municipality(&self) -> bool {
        self.stops.iter().any(|s| s.municipality.is_some())
    }
}

fn retain_with_ids<T>(rows: Vec<T>, keep: impl Fn(&T) -> bool) -> (Vec<T>, usize) {
    let before = rows.len();
    let kept: Vec<T> = rows.into_iter().filter(|r| keep(r)).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(tables: &[(&str, &str)]) -> FeedArchive {
        FeedArchive {
            files: tables
                .iter()
                .map(|(n, c)| (n.to_string(), c.as_bytes().to_vec()))
                .collect(),
        }
    }

    const STOPS: &str = "stop_id,stop_name,stop_lat,stop_lon\nA,Alpha,42.0,-71.0\n";
    const ROUTES: &str = "route_id,route_type\n1,3\n";
    const TRIPS: &str = "route_id,service_id,trip_id,direction_id\n1,WK,T1,0\n";
    const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                              T1,08:00:00,08:00:00,A,1\n";
    const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                            WK,1,1,1,1,1,0,0,20220101,20221231\n";

    #[test]
    fn test_read_minimal_feed() {
        let feed = Feed::read(&archive(&[
            ("stops", STOPS),
            ("routes", ROUTES),
            ("trips", TRIPS),
            ("stop_times", STOP_TIMES),
            ("calendar", CALENDAR),
        ]))
        .unwrap();

        assert_eq!(feed.stops.len(), 1);
        assert_eq!(feed.stop_times[0].arrival_time, Some(8 * 3600));
        assert!(feed.shapes.is_none());
        assert!(feed.timepoint_column.is_none());
    }

    #[test]
    fn test_missing_required_table() {
        let result = Feed::read(&archive(&[
            ("stops", STOPS),
            ("routes", ROUTES),
            ("stop_times", STOP_TIMES),
            ("calendar", CALENDAR),
        ]));
        assert!(matches!(result, Err(RoveError::MissingTable(t)) if t == "trips"));
    }

    #[test]
    fn test_empty_required_table() {
        let result = Feed::read(&archive(&[
            ("stops", STOPS),
            ("routes", "route_id,route_type\n"),
            ("trips", TRIPS),
            ("stop_times", STOP_TIMES),
            ("calendar", CALENDAR),
        ]));
        assert!(matches!(result, Err(RoveError::EmptyTable(t)) if t == "routes"));
    }

    #[test]
    fn test_missing_direction_id_column() {
        let result = Feed::read(&archive(&[
            ("stops", STOPS),
            ("routes", ROUTES),
            ("trips", "route_id,service_id,trip_id\n1,WK,T1\n"),
            ("stop_times", STOP_TIMES),
            ("calendar", CALENDAR),
        ]));
        match result {
            Err(RoveError::MissingColumns { table, columns }) => {
                assert_eq!(table, "trips");
                assert_eq!(columns, vec!["direction_id".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_checkpoint_column_detected() {
        let feed = Feed::read(&archive(&[
            ("stops", STOPS),
            ("routes", ROUTES),
            ("trips", TRIPS),
            (
                "stop_times",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence,checkpoint\n\
                 T1,08:00:00,08:00:00,A,1,1\n",
            ),
            ("calendar", CALENDAR),
        ]))
        .unwrap();
        assert_eq!(feed.timepoint_column, Some("checkpoint"));
    }

    #[test]
    fn test_invalid_time_is_an_error() {
        let result = Feed::read(&archive(&[
            ("stops", STOPS),
            ("routes", ROUTES),
            ("trips", TRIPS),
            (
                "stop_times",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\nT1,8am,08:00:00,A,1\n",
            ),
            ("calendar", CALENDAR),
        ]));
        assert!(matches!(result, Err(RoveError::Csv { table, .. }) if table == "stop_times"));
    }

    #[test]
    fn test_no_calendar_tables() {
        let result = Feed::read(&archive(&[
            ("stops", STOPS),
            ("routes", ROUTES),
            ("trips", TRIPS),
            ("stop_times", STOP_TIMES),
        ]));
        assert!(matches!(result, Err(RoveError::MissingTable(t)) if t == "calendar"));
    }
}
