//! Static GTFS ingestion.
//!
//! [`Gtfs::load`] reads a feed, keeps the service of the analyzed days and
//! mode, and derives everything downstream stages need: the stop event
//! records (with timepoints and branchpoints), the route patterns, and the
//! lookups written for the frontend.

pub mod calendar;
pub mod feed;
pub mod patterns;
pub mod records;
pub mod time;

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

use crate::config::RoveParams;
use crate::error::RoveError;
use calendar::service_ids_by_date;
use feed::{Feed, FeedArchive};
use patterns::{Pattern, generate_patterns, improve_with_shapes};
use records::{StopEvent, add_branchpoints, build_records, timepoint_lookup};

/// Entry of the stop name lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopName {
    pub stop_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
}

/// Validated GTFS data for the analyzed days and mode.
#[derive(Debug)]
pub struct Gtfs {
    pub mode: String,
    /// Analyzed dates on which the feed runs any service.
    pub service_dates: Vec<NaiveDate>,
    pub feed: Feed,
    pub records: Vec<StopEvent>,
    pub patterns: Vec<Pattern>,
}

impl Gtfs {
    /// Loads and validates a feed, then derives records and patterns.
    ///
    /// `improve_shapes` enables supplementing pattern segments with GTFS
    /// shape points when the feed carries a `shapes` table.
    #[tracing::instrument(skip(archive, params), fields(agency = %params.agency, suffix = %params.suffix))]
    pub fn load(
        archive: &FeedArchive,
        params: &RoveParams,
        mode: &str,
        improve_shapes: bool,
    ) -> Result<Self, RoveError> {
        info!("Processing GTFS data");
        let route_types = params.backend_config.route_types_for(mode)?;

        info!("Loading gtfs data");
        let mut feed = Feed::read(archive)?;

        let (service_dates, service_ids) = select_service_ids(&feed, params)?;

        info!("Validating gtfs data");
        feed.routes.retain(|r| route_types.contains(&r.route_type));
        let route_ids: HashSet<&str> = feed.routes.iter().map(|r| r.route_id.as_str()).collect();
        feed.trips
            .retain(|t| route_ids.contains(t.route_id.as_str()) && service_ids.contains(&t.service_id));
        let trip_ids: HashSet<&str> = feed.trips.iter().map(|t| t.trip_id.as_str()).collect();
        feed.stop_times.retain(|st| trip_ids.contains(st.trip_id.as_str()));

        for (table, empty) in [
            ("routes", feed.routes.is_empty()),
            ("trips", feed.trips.is_empty()),
            ("stop_times", feed.stop_times.is_empty()),
        ] {
            if empty {
                return Err(RoveError::EmptyTable(table.to_string()));
            }
        }

        let mut records = build_records(&feed.stop_times, &feed.trips, feed.timepoint_column)?;
        add_branchpoints(&mut records);

        let mut patterns = generate_patterns(&mut records, &feed.stops)?;
        if improve_shapes {
            if let Some(shapes) = &feed.shapes {
                improve_with_shapes(&mut patterns, &feed.trips, shapes);
            }
        }

        info!(
            records = records.len(),
            trips = feed.trips.len(),
            patterns = patterns.len(),
            "GTFS data processed"
        );

        Ok(Self {
            mode: mode.to_string(),
            service_dates,
            feed,
            records,
            patterns,
        })
    }

    /// Segment `"{route}-{stop}-{next_stop}"` to its enclosing tp_bp pair.
    pub fn timepoint_lookup(&self) -> BTreeMap<String, (String, String)> {
        timepoint_lookup(&self.records)
    }

    /// Stop id to stop name, plus municipality when the feed has that column.
    pub fn stop_name_lookup(&self) -> BTreeMap<String, StopName> {
        let with_municipality = self.feed.has_municipality();
        self.feed
            .stops
            .iter()
            .filter(|s| !s.stop_name.is_empty())
            .map(|s| {
                (
                    s.stop_id.clone(),
                    StopName {
                        stop_name: s.stop_name.clone(),
                        municipality: if with_municipality {
                            s.municipality.clone()
                        } else {
                            None
                        },
                    },
                )
            })
            .collect()
    }
}

/// Analyzed dates with service, and the union of service ids active on them.
fn select_service_ids(
    feed: &Feed,
    params: &RoveParams,
) -> Result<(Vec<NaiveDate>, BTreeSet<String>), RoveError> {
    let by_date = service_ids_by_date(&feed.calendar, &feed.calendar_dates);

    if let (Some((min, _)), Some((max, _))) = (by_date.first_key_value(), by_date.last_key_value()) {
        info!(min_date = %min, max_date = %max, "Valid GTFS date range");
    }

    let available: Vec<NaiveDate> = params
        .date_list
        .iter()
        .filter(|d| by_date.contains_key(d))
        .copied()
        .collect();
    if available.is_empty() {
        return Err(RoveError::NoServiceDates(
            params.date_list.iter().map(|d| d.to_string()).collect(),
        ));
    }
    let skipped = params.date_list.len() - available.len();
    if skipped > 0 {
        warn!(skipped, "Some analyzed dates are outside the GTFS service range");
    }
    info!(days = available.len(), "Loaded GTFS data");

    let service_ids = available
        .iter()
        .flat_map(|d| by_date[d].iter().cloned())
        .collect();
    Ok((available, service_ids))
}
