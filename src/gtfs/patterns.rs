//! Route patterns: the distinct stop sequences each route runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::feed::{ShapePoint, Stop, Trip};
use super::records::{StopEvent, trip_ranges};
use crate::error::RoveError;

/// A `(lat, lon)` coordinate.
pub type Coord = (f64, f64);

/// Ordered pair of consecutive stop ids.
pub type StopPair = (String, String);

/// The road between two consecutive stops of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub stop_pair: StopPair,
    pub coords: Vec<Coord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// `"{route_id}-{direction_id}-{n}"`.
    pub id: String,
    pub route_id: String,
    pub direction_id: u8,
    pub stop_ids: Vec<String>,
    pub trip_ids: Vec<String>,
    pub segments: Vec<Segment>,
}

/// SHA-256 of a stop sequence, hex encoded.
pub fn hash_stop_list(stop_ids: &[String]) -> String {
    let mut hasher = Sha256::new();
    for id in stop_ids {
        hasher.update(id.as_bytes());
        hasher.update([0x1fu8]);
    }
    hex::encode(hasher.finalize())
}

/// Groups trips into patterns and stamps each record with its pattern id.
///
/// Within a (route, direction), patterns are numbered from 1 in the order
/// their stop sequence first appears in the records.
pub fn generate_patterns(
    records: &mut [StopEvent],
    stops: &[Stop],
) -> Result<Vec<Pattern>, RoveError> {
    info!("Generating patterns from GTFS stop coordinates");

    let ranges = trip_ranges(records);

    let mut stops_by_hash: HashMap<String, Vec<String>> = HashMap::new();
    let mut trip_hashes = Vec::with_capacity(ranges.len());
    for range in &ranges {
        let stop_ids: Vec<String> = records[range.clone()].iter().map(|r| r.stop_id.clone()).collect();
        let hash = hash_stop_list(&stop_ids);
        stops_by_hash.entry(hash.clone()).or_insert(stop_ids);
        trip_hashes.push(hash);
    }

    let unique_lists: HashSet<Vec<&str>> = ranges
        .iter()
        .map(|range| records[range.clone()].iter().map(|r| r.stop_id.as_str()).collect())
        .collect();
    if unique_lists.len() != stops_by_hash.len() {
        return Err(RoveError::HashCollision {
            hashes: stops_by_hash.len(),
            stop_lists: unique_lists.len(),
        });
    }
    debug!(trips = ranges.len(), unique_stop_lists = unique_lists.len(), "Trip hashes verified");

    let coords: HashMap<&str, Coord> = stops
        .iter()
        .map(|s| (s.stop_id.as_str(), (s.stop_lat, s.stop_lon)))
        .collect();

    let mut order: HashMap<(String, u8), Vec<String>> = HashMap::new();
    let mut patterns: Vec<Pattern> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for (range, hash) in ranges.iter().zip(&trip_hashes) {
        let first = &records[range.start];
        let key = (first.route_id.clone(), first.direction_id);
        let seen = order.entry(key).or_default();
        let n = match seen.iter().position(|h| h == hash) {
            Some(pos) => pos + 1,
            None => {
                seen.push(hash.clone());
                seen.len()
            }
        };
        let pattern_id = format!("{}-{}-{}", first.route_id, first.direction_id, n);
        let trip_id = first.trip_id.clone();

        let idx = match index_by_id.get(&pattern_id) {
            Some(idx) => *idx,
            None => {
                let stop_ids = stops_by_hash[hash].clone();
                let segments = stop_segments(&stop_ids, &coords)?;
                patterns.push(Pattern {
                    id: pattern_id.clone(),
                    route_id: first.route_id.clone(),
                    direction_id: first.direction_id,
                    stop_ids,
                    trip_ids: Vec::new(),
                    segments,
                });
                index_by_id.insert(pattern_id.clone(), patterns.len() - 1);
                patterns.len() - 1
            }
        };
        patterns[idx].trip_ids.push(trip_id);

        for record in &mut records[range.clone()] {
            record.pattern = pattern_id.clone();
        }
    }

    info!(patterns = patterns.len(), "Patterns generated");
    Ok(patterns)
}

fn stop_segments(stop_ids: &[String], coords: &HashMap<&str, Coord>) -> Result<Vec<Segment>, RoveError> {
    let lookup = |id: &String| {
        coords
            .get(id.as_str())
            .copied()
            .ok_or_else(|| RoveError::UnknownStop(id.clone()))
    };

    let mut seen = HashSet::new();
    let mut segments = Vec::new();
    for pair in stop_ids.windows(2) {
        let stop_pair = (pair[0].clone(), pair[1].clone());
        // A loop that revisits a pair keeps the first segment.
        if !seen.insert(stop_pair.clone()) {
            continue;
        }
        segments.push(Segment {
            stop_pair,
            coords: vec![lookup(&pair[0])?, lookup(&pair[1])?],
        });
    }
    Ok(segments)
}

/// Replaces straight stop-to-stop segments with the matching slice of the
/// trip's GTFS shape, where the shape offers intermediate points.
pub fn improve_with_shapes(patterns: &mut [Pattern], trips: &[Trip], shape_points: &[ShapePoint]) {
    info!("Improving patterns with GTFS shapes");

    let mut shapes: HashMap<&str, Vec<&ShapePoint>> = HashMap::new();
    for point in shape_points {
        shapes.entry(point.shape_id.as_str()).or_default().push(point);
    }
    let shape_coords: HashMap<&str, Vec<Coord>> = shapes
        .into_iter()
        .map(|(id, mut points)| {
            points.sort_by_key(|p| p.shape_pt_sequence);
            (id, points.iter().map(|p| (p.shape_pt_lat, p.shape_pt_lon)).collect())
        })
        .collect();

    let trip_shape: HashMap<&str, &str> = trips
        .iter()
        .filter_map(|t| t.shape_id.as_deref().map(|s| (t.trip_id.as_str(), s)))
        .collect();

    for pattern in patterns.iter_mut() {
        let example = pattern
            .trip_ids
            .iter()
            .filter_map(|t| trip_shape.get(t.as_str()))
            .find_map(|shape_id| shape_coords.get(shape_id));
        let Some(full_shape) = example else {
            debug!(pattern = %pattern.id, "No example shape found for pattern");
            continue;
        };

        let mut remaining: &[Coord] = full_shape;
        for segment in pattern.segments.iter_mut() {
            let (Some(first), Some(last)) = (segment.coords.first(), segment.coords.last()) else {
                continue;
            };
            let (Some(start), Some(end)) = (nearest_point(remaining, *first), nearest_point(remaining, *last))
            else {
                break;
            };
            let intermediate = if start <= end { &remaining[start..=end] } else { &[][..] };
            if intermediate.len() > 2 {
                segment.coords = intermediate.to_vec();
            }
            remaining = &remaining[end..];
        }
    }
}

/// Index of the point in `coords` closest to `target`; ties go to the first.
fn nearest_point(coords: &[Coord], target: Coord) -> Option<usize> {
    coords
        .iter()
        .map(|(lat, lon)| (lat - target.0).powi(2) + (lon - target.1).powi(2))
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::records::tests::event;

    fn stop(id: &str, lat: f64, lon: f64) -> Stop {
        Stop {
            stop_id: id.to_string(),
            stop_name: id.to_string(),
            stop_lat: lat,
            stop_lon: lon,
            municipality: None,
        }
    }

    fn stops() -> Vec<Stop> {
        vec![stop("A", 0.0, 0.0), stop("B", 0.0, 1.0), stop("C", 0.0, 2.0)]
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        let ab = vec!["A".to_string(), "B".to_string()];
        let ba = vec!["B".to_string(), "A".to_string()];
        assert_ne!(hash_stop_list(&ab), hash_stop_list(&ba));
        assert_eq!(hash_stop_list(&ab), hash_stop_list(&ab.clone()));
        // the separator keeps ["AB"] and ["A", "B"] apart
        assert_ne!(hash_stop_list(&["AB".to_string()]), hash_stop_list(&ab));
    }

    #[test]
    fn test_patterns_numbered_by_first_appearance() {
        let mut records = vec![
            event("1", "T1", "A", 1, 0, true),
            event("1", "T1", "B", 2, 60, true),
            event("1", "T1", "C", 3, 120, true),
            event("1", "T2", "A", 1, 0, true),
            event("1", "T2", "B", 2, 60, true),
            event("1", "T3", "A", 1, 0, true),
            event("1", "T3", "B", 2, 60, true),
            event("1", "T3", "C", 3, 120, true),
        ];
        let patterns = generate_patterns(&mut records, &stops()).unwrap();

        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].id, "1-0-1");
        assert_eq!(patterns[0].trip_ids, vec!["T1", "T3"]);
        assert_eq!(patterns[1].id, "1-0-2");
        assert_eq!(records[3].pattern, "1-0-2");
        assert_eq!(records[7].pattern, "1-0-1");

        let pairs: Vec<_> = patterns[0].segments.iter().map(|s| s.stop_pair.clone()).collect();
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "B".to_string()),
                ("B".to_string(), "C".to_string())
            ]
        );
        assert_eq!(patterns[0].segments[0].coords, vec![(0.0, 0.0), (0.0, 1.0)]);
    }

    #[test]
    fn test_unknown_stop_is_an_error() {
        let mut records = vec![event("1", "T1", "A", 1, 0, true), event("1", "T1", "Z", 2, 60, true)];
        let result = generate_patterns(&mut records, &stops());
        assert!(matches!(result, Err(RoveError::UnknownStop(id)) if id == "Z"));
    }

    #[test]
    fn test_nearest_point_prefers_first_tie() {
        let coords = vec![(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)];
        assert_eq!(nearest_point(&coords, (0.1, 0.1)), Some(0));
        assert_eq!(nearest_point(&coords, (0.9, 0.9)), Some(1));
        assert_eq!(nearest_point(&[], (0.0, 0.0)), None);
    }

    #[test]
    fn test_improve_with_shapes_uses_intermediate_points() {
        let mut records = vec![
            event("1", "T1", "A", 1, 0, true),
            event("1", "T1", "B", 2, 60, true),
            event("1", "T1", "C", 3, 120, true),
        ];
        let mut patterns = generate_patterns(&mut records, &stops()).unwrap();
        let trips = vec![Trip {
            route_id: "1".to_string(),
            service_id: "WK".to_string(),
            trip_id: "T1".to_string(),
            direction_id: 0,
            shape_id: Some("S1".to_string()),
        }];
        let shape: Vec<ShapePoint> = [(0.0, 0.0), (0.1, 0.5), (0.0, 1.0), (0.0, 2.0)]
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| ShapePoint {
                shape_id: "S1".to_string(),
                shape_pt_lat: *lat,
                shape_pt_lon: *lon,
                shape_pt_sequence: i as u32 + 1,
            })
            .rev()
            .collect();

        improve_with_shapes(&mut patterns, &trips, &shape);

        // A-B gains the bend; B-C has no intermediate point and keeps stop coords.
        assert_eq!(
            patterns[0].segments[0].coords,
            vec![(0.0, 0.0), (0.1, 0.5), (0.0, 1.0)]
        );
        assert_eq!(patterns[0].segments[1].coords, vec![(0.0, 1.0), (0.0, 2.0)]);
    }
}
