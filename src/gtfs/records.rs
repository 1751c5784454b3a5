//! The GTFS records table: one row per scheduled stop event.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use tracing::{debug, warn};

use super::feed::{StopTime, Trip};
use crate::error::RoveError;

/// A stop_times row joined with its trip, plus derived per-trip fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopEvent {
    pub route_id: String,
    pub direction_id: u8,
    pub service_id: String,
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub arrival_time: i64,
    pub departure_time: i64,
    pub trip_start_time: i64,
    pub trip_end_time: i64,
    pub timepoint: bool,
    pub branchpoint: bool,
    pub tp_bp: bool,
    /// Filled in by pattern generation.
    pub pattern: String,
}

/// Joins `stop_times` with `trips`, sorted by (route_id, trip_id, stop_sequence).
///
/// Duplicated stop sequences within a trip keep the first row. Missing
/// arrival or departure times are filled from each other, then linearly
/// interpolated along the trip. Trips without any time are dropped.
pub fn build_records(
    stop_times: &[StopTime],
    trips: &[Trip],
    timepoint_column: Option<&str>,
) -> Result<Vec<StopEvent>, RoveError> {
    let trips_by_id: HashMap<&str, &Trip> = trips.iter().map(|t| (t.trip_id.as_str(), t)).collect();

    let mut joined: Vec<(&Trip, &StopTime)> = stop_times
        .iter()
        .filter_map(|st| trips_by_id.get(st.trip_id.as_str()).map(|t| (*t, st)))
        .collect();
    joined.sort_by(|(ta, sa), (tb, sb)| {
        (&ta.route_id, &sa.trip_id, sa.stop_sequence).cmp(&(&tb.route_id, &sb.trip_id, sb.stop_sequence))
    });
    let before = joined.len();
    joined.dedup_by(|(ta, sa), (tb, sb)| {
        ta.route_id == tb.route_id
            && sa.trip_id == sb.trip_id
            && ta.direction_id == tb.direction_id
            && sa.stop_sequence == sb.stop_sequence
    });
    if joined.len() < before {
        debug!(dropped = before - joined.len(), "Dropped duplicate stop events");
    }

    let mut records = Vec::with_capacity(joined.len());
    for (row, (trip, st)) in joined.iter().enumerate() {
        let timepoint = match timepoint_column {
            None => true,
            Some(column) => parse_timepoint(st, column, row)?,
        };
        records.push(StopEvent {
            route_id: trip.route_id.clone(),
            direction_id: trip.direction_id,
            service_id: trip.service_id.clone(),
            trip_id: st.trip_id.clone(),
            stop_id: st.stop_id.clone(),
            stop_sequence: st.stop_sequence,
            arrival_time: 0,
            departure_time: 0,
            trip_start_time: 0,
            trip_end_time: 0,
            timepoint,
            branchpoint: false,
            tp_bp: false,
            pattern: String::new(),
        });
    }

    let mut timeless: BTreeSet<String> = BTreeSet::new();
    for range in trip_ranges(&records) {
        let times: Vec<(Option<i64>, Option<i64>)> = joined[range.clone()]
            .iter()
            .map(|(_, st)| (st.arrival_time, st.departure_time))
            .collect();
        let Some(filled) = fill_trip_times(&times) else {
            warn!(trip_id = %records[range.start].trip_id, "Trip has no scheduled times, dropping it");
            timeless.insert(records[range.start].trip_id.clone());
            continue;
        };
        let start = filled.iter().map(|(a, _)| *a).min().unwrap_or(0);
        let end = filled.iter().map(|(a, _)| *a).max().unwrap_or(0);
        for (record, (arrival, departure)) in records[range].iter_mut().zip(filled) {
            record.arrival_time = arrival;
            record.departure_time = departure;
            record.trip_start_time = start;
            record.trip_end_time = end;
        }
    }
    if !timeless.is_empty() {
        records.retain(|r| !timeless.contains(&r.trip_id));
    }

    if timepoint_column.is_none() {
        warn!(
            "GTFS stop_times table has no timepoint column; every stop in the records is labeled as a timepoint"
        );
    }

    Ok(records)
}

fn parse_timepoint(st: &StopTime, column: &str, row: usize) -> Result<bool, RoveError> {
    let value = match column {
        "timepoints" => st.timepoints.as_deref(),
        "checkpoint" => st.checkpoint.as_deref(),
        _ => st.timepoint.as_deref(),
    };
    match value.map(str::trim) {
        None | Some("") | Some("1") => Ok(true),
        Some("0") => Ok(false),
        Some(other) => Err(RoveError::InvalidValue {
            table: "stop_times".to_string(),
            row,
            column: column.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Fills missing (arrival, departure) pairs of one trip.
///
/// Returns `None` when the trip carries no time at all.
fn fill_trip_times(times: &[(Option<i64>, Option<i64>)]) -> Option<Vec<(i64, i64)>> {
    let known: Vec<Option<(i64, i64)>> = times
        .iter()
        .map(|(a, d)| match (a, d) {
            (Some(a), Some(d)) => Some((*a, *d)),
            (Some(a), None) => Some((*a, *a)),
            (None, Some(d)) => Some((*d, *d)),
            (None, None) => None,
        })
        .collect();

    let anchors: Vec<usize> = (0..known.len()).filter(|i| known[*i].is_some()).collect();
    let (&first, &last) = (anchors.first()?, anchors.last()?);

    let mut filled = Vec::with_capacity(known.len());
    for (i, entry) in known.iter().enumerate() {
        if let Some(pair) = entry {
            filled.push(*pair);
            continue;
        }
        let value = if i < first {
            known[first].map(|(a, _)| a).unwrap_or(0)
        } else if i > last {
            known[last].map(|(_, d)| d).unwrap_or(0)
        } else {
            let prev = anchors.iter().rev().find(|a| **a < i).copied().unwrap_or(first);
            let next = anchors.iter().find(|a| **a > i).copied().unwrap_or(last);
            let (_, dep) = known[prev].unwrap_or_default();
            let (arr, _) = known[next].unwrap_or_default();
            let frac = (i - prev) as f64 / (next - prev) as f64;
            dep + ((arr - dep) as f64 * frac).round() as i64
        };
        filled.push((value, value));
    }
    Some(filled)
}

/// Index ranges of consecutive records that share a trip_id.
pub fn trip_ranges(records: &[StopEvent]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=records.len() {
        if i == records.len() || records[i].trip_id != records[start].trip_id {
            if start < i {
                ranges.push(start..i);
            }
            start = i;
        }
    }
    ranges
}

/// Labels branchpoints and timepoint-or-branchpoint (`tp_bp`) stops.
///
/// A branchpoint is a stop whose set of serving routes differs from an
/// adjacent stop's, unless the same routes both join at the previous stop and
/// leave at the next one. First and last stops of every trip are tp_bp, and
/// tp_bp is made consistent for every (route, stop).
pub fn add_branchpoints(records: &mut [StopEvent]) {
    let mut routes_by_stop: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for r in records.iter() {
        routes_by_stop
            .entry(r.stop_id.as_str())
            .or_default()
            .insert(r.route_id.as_str());
    }

    let ranges = trip_ranges(records);
    let mut branchpoints = vec![false; records.len()];
    let empty = BTreeSet::new();

    for range in &ranges {
        for i in range.clone() {
            let here = &routes_by_stop[records[i].stop_id.as_str()];
            let next = if i + 1 < range.end {
                &routes_by_stop[records[i + 1].stop_id.as_str()]
            } else {
                &empty
            };
            let prev = if i > range.start {
                &routes_by_stop[records[i - 1].stop_id.as_str()]
            } else {
                &empty
            };

            // Missing neighbours contribute no difference.
            let diff_next: BTreeSet<&str> = if i + 1 < range.end {
                here.difference(next).copied().collect()
            } else {
                BTreeSet::new()
            };
            let diff_prev: BTreeSet<&str> = if i > range.start {
                here.difference(prev).copied().collect()
            } else {
                BTreeSet::new()
            };

            branchpoints[i] = diff_next.len() + diff_prev.len() > 0
                && !(diff_prev == diff_next && !diff_prev.is_empty());
        }
    }
    drop(routes_by_stop);

    for (record, bp) in records.iter_mut().zip(branchpoints) {
        record.branchpoint = bp;
        record.tp_bp = record.timepoint || bp;
    }
    for range in &ranges {
        records[range.start].tp_bp = true;
        records[range.end - 1].tp_bp = true;
    }

    let mut by_route_stop: HashMap<(String, String), bool> = HashMap::new();
    for r in records.iter() {
        *by_route_stop
            .entry((r.route_id.clone(), r.stop_id.clone()))
            .or_default() |= r.tp_bp;
    }
    for r in records.iter_mut() {
        r.tp_bp = by_route_stop[&(r.route_id.clone(), r.stop_id.clone())];
    }
}

/// Maps each stop-pair segment `"{route}-{stop}-{next_stop}"` to the tp_bp
/// pair it lies within.
pub fn timepoint_lookup(records: &[StopEvent]) -> BTreeMap<String, (String, String)> {
    let mut lookup = BTreeMap::new();

    for range in trip_ranges(records) {
        let trip = &records[range];
        let tpbp_positions: Vec<usize> = (0..trip.len()).filter(|i| trip[*i].tp_bp).collect();

        let mut current: Option<(String, String)> = None;
        for i in 0..trip.len().saturating_sub(1) {
            if trip[i].tp_bp {
                current = tpbp_positions
                    .iter()
                    .find(|p| **p > i)
                    .map(|p| (trip[i].stop_id.clone(), trip[*p].stop_id.clone()));
            }
            if let Some(pair) = &current {
                let key = format!("{}-{}-{}", trip[i].route_id, trip[i].stop_id, trip[i + 1].stop_id);
                lookup.insert(key, pair.clone());
            }
        }
    }

    lookup
}
