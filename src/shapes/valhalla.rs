//! Map matching of pattern segments against a Valhalla `trace_attributes` endpoint.

use anyhow::{Context, Result, bail};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::haversine_km;
use crate::fetch::HttpClient;
use crate::gtfs::patterns::Coord;

/// Penalizes turns in matched routes. Range 0 - 100,000.
pub const TURN_PENALTY_FACTOR: u32 = 100_000;
/// Search radius when matching stop coordinates, in meters.
pub const STOP_RADIUS: u32 = 35;
/// Search radius when matching intermediate coordinates, in meters.
pub const INTERMEDIATE_RADIUS: u32 = 100;
/// Stop-to-stop distance above which intermediate coordinates are sent, in meters.
pub const STOP_DISTANCE_THRESHOLD: f64 = 1000.0;
/// Penalty for switching roads, in seconds. Range 0 - 43,200.
pub const MANEUVER_PENALTY: u32 = 43_200;

#[derive(Debug, Clone, Serialize)]
pub struct TracePoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub radius: u32,
    pub rank_candidates: bool,
    pub preferred_side: &'static str,
    pub node_snap_tolerance: u32,
    pub street_side_tolerance: u32,
}

impl TracePoint {
    fn new(coord: Coord, kind: &'static str, radius: u32) -> Self {
        Self {
            lat: coord.0,
            lon: coord.1,
            kind,
            radius,
            rank_candidates: true,
            preferred_side: "same",
            node_snap_tolerance: 0,
            street_side_tolerance: 0,
        }
    }
}

#[derive(Debug, Serialize)]
struct Filters {
    attributes: [&'static str; 3],
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct BusCosting {
    maneuver_penalty: u32,
}

#[derive(Debug, Serialize)]
struct CostingOptions {
    bus: BusCosting,
}

#[derive(Debug, Serialize)]
struct TraceOptions {
    turn_penalty_factor: u32,
}

/// Body of a `trace_attributes` request.
#[derive(Debug, Serialize)]
pub struct TraceRequest {
    shape: Vec<TracePoint>,
    costing: &'static str,
    shape_match: &'static str,
    filters: Filters,
    costing_options: CostingOptions,
    trace_options: TraceOptions,
}

impl TraceRequest {
    /// Builds a request for one segment. Endpoints are hard breaks; the
    /// intermediate coordinates are only sent for long segments.
    pub fn for_segment(coords: &[Coord]) -> Self {
        let mut shape = Vec::with_capacity(coords.len());
        if let (Some(first), Some(last)) = (coords.first(), coords.last()) {
            shape.push(TracePoint::new(*first, "break", STOP_RADIUS));
            let direct_m = haversine_km(*first, *last) * 1000.0;
            if direct_m > STOP_DISTANCE_THRESHOLD && coords.len() > 2 {
                for c in &coords[1..coords.len() - 1] {
                    shape.push(TracePoint::new(*c, "via", INTERMEDIATE_RADIUS));
                }
            }
            if coords.len() > 1 {
                shape.push(TracePoint::new(*last, "break", STOP_RADIUS));
            }
        }

        Self {
            shape,
            costing: "bus",
            shape_match: "map_snap",
            filters: Filters {
                attributes: ["edge.id", "edge.length", "shape"],
                action: "include",
            },
            costing_options: CostingOptions {
                bus: BusCosting {
                    maneuver_penalty: MANEUVER_PENALTY,
                },
            },
            trace_options: TraceOptions {
                turn_penalty_factor: TURN_PENALTY_FACTOR,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Edge {
    /// Kilometers.
    length: f64,
}

#[derive(Debug, Deserialize)]
struct TraceResponse {
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default)]
    shape: Option<String>,
}

/// A map-matched segment: road geometry and length in kilometers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedSegment {
    pub geometry: Vec<Coord>,
    pub distance: f64,
}

/// Thin client for the Valhalla `trace_attributes` action.
pub struct ValhallaClient<C> {
    client: Arc<C>,
    base_url: String,
}

impl<C> Clone for ValhallaClient<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            base_url: self.base_url.clone(),
        }
    }
}

impl<C: HttpClient> ValhallaClient<C> {
    pub fn new(client: C, base_url: &str) -> Self {
        Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn trace(&self, coords: &[Coord]) -> Result<MatchedSegment> {
        let url = format!("{}/trace_attributes", self.base_url);
        let body = serde_json::to_vec(&TraceRequest::for_segment(coords))?;

        let mut req = reqwest::Request::new(reqwest::Method::POST, url.parse()?);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(body.into());

        let resp = self.client.execute(req).await.context("Valhalla request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Valhalla returned status {status}: {body}");
        }
        let parsed: TraceResponse = resp.json().await.context("Failed to parse Valhalla response")?;
        debug!(edges = parsed.edges.len(), "Segment matched");
        parsed.into_matched()
    }
}

impl TraceResponse {
    fn into_matched(self) -> Result<MatchedSegment> {
        if self.edges.is_empty() {
            bail!("Valhalla matched no edges");
        }
        let distance = self.edges.iter().map(|e| e.length).sum();
        let geometry = match self.shape {
            Some(encoded) => decode_polyline6(&encoded)?,
            None => Vec::new(),
        };
        Ok(MatchedSegment { geometry, distance })
    }
}

/// Decodes a Valhalla polyline with six decimal digits of precision.
pub fn decode_polyline6(encoded: &str) -> Result<Vec<Coord>> {
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let (mut lat, mut lon) = (0i64, 0i64);
    let mut coords = Vec::new();

    let next_value = |index: &mut usize| -> Result<i64> {
        let mut result = 0i64;
        let mut shift = 0;
        loop {
            let Some(&byte) = bytes.get(*index) else {
                bail!("truncated polyline at byte {}", *index);
            };
            *index += 1;
            let chunk = (byte as i64) - 63;
            if !(0..64).contains(&chunk) || shift > 60 {
                bail!("invalid polyline byte {byte}");
            }
            result |= (chunk & 0x1f) << shift;
            shift += 5;
            if chunk < 0x20 {
                break;
            }
        }
        Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
    };

    while index < bytes.len() {
        lat += next_value(&mut index)?;
        lon += next_value(&mut index)?;
        coords.push((lat as f64 / 1e6, lon as f64 / 1e6));
    }
    Ok(coords)
}
