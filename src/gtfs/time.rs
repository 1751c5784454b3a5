//! GTFS time and date parsing.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, de};

/// Parses a GTFS `H:MM:SS` time into seconds after midnight.
///
/// Hours may exceed 23 for trips that run past midnight of the service day.
pub fn parse_gtfs_time(value: &str) -> Option<i64> {
    let mut parts = value.trim().split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || h < 0 || !(0..60).contains(&m) || !(0..60).contains(&s) {
        return None;
    }
    Some(h * 3600 + m * 60 + s)
}

pub fn parse_gtfs_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d").ok()
}

/// Deserializes an optional GTFS time; an empty cell yields `None`.
pub(crate) fn de_optional_time<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_gtfs_time(v)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid GTFS time \"{v}\""))),
    }
}

pub(crate) fn de_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_gtfs_date(&raw).ok_or_else(|| de::Error::custom(format!("invalid GTFS date \"{raw}\"")))
}
