//! Shape generation: road geometry and length of every pattern segment.
//!
//! Segments are map-matched against Valhalla when an endpoint is configured.
//! Otherwise, or when matching fails, the segment's own coordinates are kept
//! and its length is the great-circle distance along them.

pub mod valhalla;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::fetch::HttpClient;
use crate::gtfs::patterns::{Coord, Pattern, StopPair};
use valhalla::ValhallaClient;

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Geometry and length of one stop-to-stop segment of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeRecord {
    pub pattern: String,
    pub route_id: String,
    pub direction_id: u8,
    pub stop_pair: StopPair,
    pub geometry: Vec<Coord>,
    /// Kilometers.
    pub distance: f64,
}

/// Great-circle distance between two `(lat, lon)` points, in kilometers.
pub fn haversine_km(a: Coord, b: Coord) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let h = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Length of a polyline in kilometers.
pub fn path_length_km(coords: &[Coord]) -> f64 {
    coords.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
}

/// Builds [`ShapeRecord`]s for every segment of every pattern.
pub struct ShapeGenerator<C> {
    valhalla: Option<ValhallaClient<C>>,
    concurrency: usize,
}

impl<C: HttpClient + 'static> ShapeGenerator<C> {
    /// A generator that never calls out and measures segments geometrically.
    pub fn offline() -> Self {
        Self {
            valhalla: None,
            concurrency: 1,
        }
    }

    pub fn with_valhalla(client: ValhallaClient<C>, concurrency: usize) -> Self {
        Self {
            valhalla: Some(client),
            concurrency: concurrency.max(1),
        }
    }

    #[tracing::instrument(skip_all, fields(patterns = patterns.len(), map_matching = self.valhalla.is_some()))]
    pub async fn generate(&self, patterns: &[Pattern]) -> Vec<ShapeRecord> {
        info!("Generating shapes");

        let Some(valhalla) = &self.valhalla else {
            let shapes: Vec<ShapeRecord> = patterns.iter().flat_map(offline_shapes).collect();
            info!(segments = shapes.len(), "Shapes generated");
            return shapes;
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, pattern) in patterns.iter().cloned().enumerate() {
            let sem = semaphore.clone();
            let client = valhalla.clone();
            tasks.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (index, offline_shapes(&pattern));
                };
                (index, matched_shapes(&client, &pattern).await)
            });
        }

        let mut by_pattern: Vec<(usize, Vec<ShapeRecord>)> = Vec::with_capacity(patterns.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => by_pattern.push(result),
                Err(e) => warn!(error = %e, "Shape generation task failed"),
            }
        }
        by_pattern.sort_by_key(|(index, _)| *index);

        let shapes: Vec<ShapeRecord> = by_pattern.into_iter().flat_map(|(_, s)| s).collect();
        info!(segments = shapes.len(), "Shapes generated");
        shapes
    }
}

fn offline_shapes(pattern: &Pattern) -> Vec<ShapeRecord> {
    pattern
        .segments
        .iter()
        .map(|segment| ShapeRecord {
            pattern: pattern.id.clone(),
            route_id: pattern.route_id.clone(),
            direction_id: pattern.direction_id,
            stop_pair: segment.stop_pair.clone(),
            geometry: segment.coords.clone(),
            distance: path_length_km(&segment.coords),
        })
        .collect()
}

async fn matched_shapes<C: HttpClient>(client: &ValhallaClient<C>, pattern: &Pattern) -> Vec<ShapeRecord> {
    let mut shapes = offline_shapes(pattern);
    for shape in shapes.iter_mut() {
        match client.trace(&shape.geometry).await {
            Ok(matched) => {
                if !matched.geometry.is_empty() {
                    shape.geometry = matched.geometry;
                }
                shape.distance = matched.distance;
            }
            Err(e) => {
                warn!(
                    pattern = %pattern.id,
                    from = %shape.stop_pair.0,
                    to = %shape.stop_pair.1,
                    error = %e,
                    "Map matching failed, keeping straight-line geometry"
                );
            }
        }
    }
    debug!(pattern = %pattern.id, segments = shapes.len(), "Pattern matched");
    shapes
}

/// Reads shapes written by [`write_shapes`]; a missing file yields no shapes.
pub fn read_shapes(path: impl AsRef<Path>) -> Result<Vec<ShapeRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn write_shapes(path: impl AsRef<Path>, shapes: &[ShapeRecord]) -> Result<()> {
    crate::output::write_json(path, &shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use crate::gtfs::patterns::Segment;

    fn pattern() -> Pattern {
        Pattern {
            id: "1-0-1".to_string(),
            route_id: "1".to_string(),
            direction_id: 0,
            stop_ids: vec!["A".into(), "B".into(), "C".into()],
            trip_ids: vec!["T1".into()],
            segments: vec![
                Segment {
                    stop_pair: ("A".into(), "B".into()),
                    coords: vec![(0.0, 0.0), (0.0, 1.0)],
                },
                Segment {
                    stop_pair: ("B".into(), "C".into()),
                    coords: vec![(0.0, 1.0), (0.5, 1.0), (1.0, 1.0)],
                },
            ],
        }
    }

    #[test]
    fn test_haversine_one_degree_at_equator() {
        let d = haversine_km((0.0, 0.0), (0.0, 1.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_haversine_same_point() {
        assert_eq!(haversine_km((42.3, -71.1), (42.3, -71.1)), 0.0);
    }

    #[test]
    fn test_path_length_sums_legs() {
        let direct = haversine_km((0.0, 1.0), (1.0, 1.0));
        let path = path_length_km(&[(0.0, 1.0), (0.5, 1.0), (1.0, 1.0)]);
        assert!((direct - path).abs() < 1e-6);
        assert_eq!(path_length_km(&[(0.0, 0.0)]), 0.0);
    }

    #[tokio::test]
    async fn test_offline_generation_one_record_per_segment() {
        let generator: ShapeGenerator<BasicClient> = ShapeGenerator::offline();
        let shapes = generator.generate(&[pattern()]).await;

        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0].pattern, "1-0-1");
        assert_eq!(shapes[1].stop_pair, ("B".to_string(), "C".to_string()));
        assert_eq!(shapes[1].geometry.len(), 3);
        assert!(shapes[0].distance > 111.0);
    }

    #[test]
    fn test_shapes_file_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shapes/bus-shapes.json");
        assert!(read_shapes(&path).unwrap().is_empty());

        let shapes = offline_shapes(&pattern());
        write_shapes(&path, &shapes).unwrap();
        assert_eq!(read_shapes(&path).unwrap(), shapes);
    }
}
