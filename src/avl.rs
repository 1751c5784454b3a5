//! Observed stop events from automatic vehicle location / passenger counting.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::info;

/// One observed stop event.
///
/// Times are seconds after midnight of `svc_date`; `dwell_time` is seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvlRecord {
    pub svc_date: NaiveDate,
    #[serde(rename = "route")]
    pub route_id: String,
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub stop_time: i64,
    #[serde(default, deserialize_with = "de_dwell_time")]
    pub dwell_time: i64,
    #[serde(default)]
    pub passenger_on: Option<f64>,
    #[serde(default)]
    pub passenger_off: Option<f64>,
    #[serde(default)]
    pub passenger_load: Option<f64>,
    #[serde(default)]
    pub seat_capacity: Option<f64>,
}

/// An empty or absent dwell time counts as zero seconds.
fn de_dwell_time<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(0))
}

/// Reads AVL records from CSV, sorted by (svc_date, trip_id, stop_sequence).
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_avl(path: impl AsRef<Path>) -> Result<Vec<AvlRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open AVL file {}", path.display()))?;
    read_avl(file)
}

pub fn read_avl<R: std::io::Read>(reader: R) -> Result<Vec<AvlRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: AvlRecord = result?;
        records.push(record);
    }
    records.sort_by(|a, b| {
        (a.svc_date, &a.trip_id, a.stop_sequence).cmp(&(b.svc_date, &b.trip_id, b.stop_sequence))
    });

    info!(records = records.len(), "AVL records loaded");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
svc_date,route,trip_id,stop_id,stop_sequence,stop_time,dwell_time,passenger_on,passenger_off,passenger_load,seat_capacity
2022-03-02,1,T1,B,2,28860,20,3,1,12,40
2022-03-01,1,T1,B,2,28870,15,2,0,10,40
2022-03-01,1,T1,A,1,28800,30,10,0,10,40
";

    #[test]
    fn test_read_avl_sorts_records() {
        let records = read_avl(CSV.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].stop_id, "A");
        assert_eq!(records[0].route_id, "1");
        assert_eq!(records[2].svc_date, NaiveDate::from_ymd_opt(2022, 3, 2).unwrap());
        assert_eq!(records[0].passenger_load, Some(10.0));
    }

    #[test]
    fn test_read_avl_allows_missing_counts() {
        let csv = "svc_date,route,trip_id,stop_id,stop_sequence,stop_time\n2022-03-01,1,T1,A,1,28800\n";
        let records = read_avl(csv.as_bytes()).unwrap();
        assert_eq!(records[0].dwell_time, 0);
        assert_eq!(records[0].passenger_on, None);
    }

    #[test]
    fn test_read_avl_empty_dwell_cell() {
        let csv = "\
svc_date,route,trip_id,stop_id,stop_sequence,stop_time,dwell_time,passenger_on
2022-03-01,1,T1,A,1,28800,,4
2022-03-01,1,T1,B,2,28900,12,
";
        let records = read_avl(csv.as_bytes()).unwrap();
        assert_eq!(records[0].dwell_time, 0);
        assert_eq!(records[0].passenger_on, Some(4.0));
        assert_eq!(records[1].dwell_time, 12);
        assert_eq!(records[1].passenger_on, None);
    }

    #[test]
    fn test_read_avl_rejects_bad_date() {
        let csv = "svc_date,route,trip_id,stop_id,stop_sequence,stop_time\n03/01/2022,1,T1,A,1,28800\n";
        assert!(read_avl(csv.as_bytes()).is_err());
    }
}
