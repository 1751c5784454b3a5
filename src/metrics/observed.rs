//! Metrics derived from AVL observations.
//!
//! Stop level values are matched to scheduled stop rows on
//! (route, trip, stop pair) and averaged over service dates. Route level
//! values are reduced per service date first (sum or peak), then averaged.

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::info;

use super::MetricCalculation;
use super::utility::{
    FEET_TO_MILES, FT_PER_MIN_TO_MPH, MAX_SPEED_MPH, MEAN_SPEED_MPH, mean, mean_by, round_to,
    sorted_diffs, speed_mph, sum_present,
};
use crate::avl::AvlRecord;
use crate::config::OnTimeWindow;
use crate::error::RoveError;

/// An observed stop event joined with the next observed stop of the same
/// trip on the same service date.
#[derive(Debug, Clone, PartialEq)]
pub struct AvlPair {
    pub svc_date: NaiveDate,
    pub route_id: String,
    pub trip_id: String,
    pub stop_id: String,
    pub next_stop: String,
    pub stop_time: i64,
    pub next_stop_arrival_time: i64,
    pub dwell_time: i64,
    pub passenger_on: Option<f64>,
    pub passenger_load: Option<f64>,
    pub seat_capacity: Option<f64>,
}

impl AvlPair {
    /// Running time from departure to the next arrival, in minutes.
    fn running_time(&self) -> f64 {
        let seconds = (self.next_stop_arrival_time - self.stop_time - self.dwell_time).max(0);
        round_to(seconds as f64 / 60.0, 2)
    }

    /// Running time from arrival to the next arrival, in minutes.
    fn running_time_with_dwell(&self) -> f64 {
        let seconds = (self.next_stop_arrival_time - self.stop_time).max(0);
        round_to(seconds as f64 / 60.0, 2)
    }

    fn crowding(&self) -> Option<f64> {
        match (self.passenger_load, self.seat_capacity) {
            (Some(load), Some(seats)) if seats > 0.0 => Some(load / seats * 100.0),
            _ => None,
        }
    }
}

/// Pairs consecutive records of each (svc_date, trip_id). The last stop of
/// each trip has no next stop and is dropped.
///
/// Records must be sorted by (svc_date, trip_id, stop_sequence), as
/// [`crate::avl::read_avl`] returns them.
pub fn prepare_avl_pairs(avl: &[AvlRecord]) -> Vec<AvlPair> {
    avl.windows(2)
        .filter(|w| w[0].svc_date == w[1].svc_date && w[0].trip_id == w[1].trip_id)
        .map(|w| {
            let (here, next) = (&w[0], &w[1]);
            AvlPair {
                svc_date: here.svc_date,
                route_id: here.route_id.clone(),
                trip_id: here.trip_id.clone(),
                stop_id: here.stop_id.clone(),
                next_stop: next.stop_id.clone(),
                stop_time: here.stop_time,
                next_stop_arrival_time: next.stop_time,
                dwell_time: here.dwell_time,
                passenger_on: here.passenger_on,
                passenger_load: here.passenger_load,
                seat_capacity: here.seat_capacity,
            }
        })
        .collect()
}

type StopKey<'a> = (&'a str, &'a str, &'a str, &'a str);
type TripKey<'a> = (&'a str, &'a str);

/// Mean over service dates per (route, trip, stop, next stop).
fn stop_means<'a>(
    pairs: &'a [AvlPair],
    value: impl Fn(&AvlPair) -> Option<f64>,
) -> HashMap<StopKey<'a>, f64> {
    mean_by(pairs.iter().map(|p| {
        (
            (p.route_id.as_str(), p.trip_id.as_str(), p.stop_id.as_str(), p.next_stop.as_str()),
            value(p),
        )
    }))
}

/// Reduces the values of each (svc_date, route, trip), then averages the
/// daily results per (route, trip). Days without any value are skipped.
fn trip_daily_means<'a>(
    pairs: &'a [AvlPair],
    value: impl Fn(&AvlPair) -> Option<f64>,
    reduce: impl Fn(&[f64]) -> f64,
) -> HashMap<TripKey<'a>, f64> {
    let mut days: HashMap<(NaiveDate, &str, &str), Vec<f64>> = HashMap::new();
    for p in pairs {
        let entry = days
            .entry((p.svc_date, p.route_id.as_str(), p.trip_id.as_str()))
            .or_default();
        if let Some(v) = value(p) {
            entry.push(v);
        }
    }
    mean_by(days.into_iter().map(|((_, route, trip), values)| {
        let reduced = (!values.is_empty()).then(|| reduce(&values));
        ((route, trip), reduced)
    }))
}

fn total(values: &[f64]) -> f64 {
    values.iter().sum()
}

fn peak(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::MIN, f64::max)
}

impl MetricCalculation {
    fn fill_stops(&mut self, means: &HashMap<StopKey<'_>, f64>, digits: i32, set: impl Fn(&mut super::types::StopMetric, Option<f64>)) {
        for row in self.stop_metrics.iter_mut() {
            let key = (
                row.route_id.as_str(),
                row.trip_id.as_str(),
                row.stop_id.as_str(),
                row.next_stop.as_str(),
            );
            let value = means.get(&key).map(|v| round_to(*v, digits));
            set(row, value);
        }
    }

    fn fill_routes(&mut self, means: &HashMap<TripKey<'_>, f64>, digits: i32, set: impl Fn(&mut super::types::RouteMetric, Option<f64>)) {
        for row in self.route_metrics.iter_mut() {
            let value = means
                .get(&(row.route_id.as_str(), row.trip_id.as_str()))
                .map(|v| round_to(*v, digits));
            set(row, value);
        }
    }

    /// Observed headway in minutes: the gap between consecutive observed
    /// arrivals of a route at the first stop of a stop pair on each day,
    /// averaged over all trips and service dates.
    pub fn observed_headway(&mut self, pairs: &[AvlPair]) {
        info!("Calculating observed headway");

        let diffs = sorted_diffs(pairs.iter().enumerate().map(|(i, p)| {
            (
                (p.svc_date, p.route_id.as_str(), p.stop_id.as_str(), p.next_stop.as_str()),
                i,
                p.stop_time,
            )
        }));
        let means = mean_by(pairs.iter().enumerate().map(|(i, p)| {
            (
                (p.route_id.as_str(), p.stop_id.as_str(), p.next_stop.as_str()),
                diffs.get(&i).map(|d| d / 60.0),
            )
        }));

        for row in self.stop_metrics.iter_mut() {
            let key = (row.route_id.as_str(), row.stop_id.as_str(), row.next_stop.as_str());
            row.observed_headway = means.get(&key).map(|v| round_to(*v, 2));
        }
    }

    /// Observed running time without dwell, in minutes.
    pub fn observed_running_time(&mut self, pairs: &[AvlPair]) {
        info!("Calculating observed running time without dwell");

        let stops = stop_means(pairs, |p| Some(p.running_time()));
        self.fill_stops(&stops, 2, |row, v| row.observed_running_time = v);

        let trips = trip_daily_means(pairs, |p| Some(p.running_time()), total);
        self.fill_routes(&trips, 2, |row, v| row.observed_running_time = v);

        let stops = &self.stop_metrics;
        for tpbp in self.tpbp_metrics.iter_mut() {
            tpbp.observed_running_time =
                sum_present(stops[tpbp.stop_rows.clone()].iter().map(|s| s.observed_running_time));
        }
    }

    /// Observed speed without dwell in mph.
    pub fn observed_speed_without_dwell(&mut self) {
        info!("Calculating observed speed without dwell");

        for row in self.stop_metrics.iter_mut() {
            row.observed_speed_without_dwell = speed_mph(row.stop_spacing, row.observed_running_time);
        }
        for row in self.route_metrics.iter_mut() {
            row.observed_speed_without_dwell = speed_mph(row.stop_spacing, row.observed_running_time);
        }
        for row in self.tpbp_metrics.iter_mut() {
            row.observed_speed_without_dwell = speed_mph(row.stop_spacing, row.observed_running_time);
        }
    }

    /// Observed running time including dwell at the first stop, in minutes.
    pub fn observed_running_time_with_dwell(&mut self, pairs: &[AvlPair]) {
        info!("Calculating observed running time with dwell");

        let stops = stop_means(pairs, |p| Some(p.running_time_with_dwell()));
        self.fill_stops(&stops, 2, |row, v| row.observed_running_time_with_dwell = v);

        let trips = trip_daily_means(pairs, |p| Some(p.running_time_with_dwell()), total);
        self.fill_routes(&trips, 2, |row, v| row.observed_running_time_with_dwell = v);

        let stops = &self.stop_metrics;
        for tpbp in self.tpbp_metrics.iter_mut() {
            tpbp.observed_running_time_with_dwell = sum_present(
                stops[tpbp.stop_rows.clone()]
                    .iter()
                    .map(|s| s.observed_running_time_with_dwell),
            );
        }
    }

    /// Observed speed with dwell in mph.
    pub fn observed_speed_with_dwell(&mut self) {
        info!("Calculating observed speed with dwell");

        for row in self.stop_metrics.iter_mut() {
            row.observed_speed_with_dwell =
                speed_mph(row.stop_spacing, row.observed_running_time_with_dwell);
        }
        for row in self.route_metrics.iter_mut() {
            row.observed_speed_with_dwell =
                speed_mph(row.stop_spacing, row.observed_running_time_with_dwell);
        }
        for row in self.tpbp_metrics.iter_mut() {
            row.observed_speed_with_dwell =
                speed_mph(row.stop_spacing, row.observed_running_time_with_dwell);
        }
    }

    /// Boardings in passengers.
    pub fn boardings(&mut self, pairs: &[AvlPair]) {
        info!("Calculating boardings");

        let stops = stop_means(pairs, |p| p.passenger_on);
        self.fill_stops(&stops, 0, |row, v| row.boardings = v);

        let trips = trip_daily_means(pairs, |p| p.passenger_on, total);
        self.fill_routes(&trips, 2, |row, v| row.boardings = v);

        let stops = &self.stop_metrics;
        for tpbp in self.tpbp_metrics.iter_mut() {
            tpbp.boardings = sum_present(stops[tpbp.stop_rows.clone()].iter().map(|s| s.boardings));
        }
    }

    /// On-time performance.
    ///
    /// Stop rows hold the mean delay in seconds against the scheduled arrival.
    /// Route rows hold the percentage of stops per trip whose delay falls
    /// strictly inside the window, averaged over service dates.
    pub fn on_time_performance(&mut self, pairs: &[AvlPair], window: OnTimeWindow) -> Result<(), RoveError> {
        info!("Calculating on time performance");

        window.validate()?;
        let (early, late) = (
            (window.no_earlier_than * 60) as f64,
            (window.no_later_than * 60) as f64,
        );

        let delays: Vec<Option<f64>> = {
            let scheduled: HashMap<StopKey<'_>, i64> = self
                .stop_metrics
                .iter()
                .map(|s| {
                    (
                        (s.route_id.as_str(), s.trip_id.as_str(), s.stop_id.as_str(), s.next_stop.as_str()),
                        s.arrival_time,
                    )
                })
                .collect();
            pairs
                .iter()
                .map(|p| {
                    let key = (p.route_id.as_str(), p.trip_id.as_str(), p.stop_id.as_str(), p.next_stop.as_str());
                    scheduled.get(&key).map(|arrival| (p.stop_time - arrival) as f64)
                })
                .collect()
        };

        let stops = mean_by(pairs.iter().zip(&delays).map(|(p, delay)| {
            (
                (p.route_id.as_str(), p.trip_id.as_str(), p.stop_id.as_str(), p.next_stop.as_str()),
                *delay,
            )
        }));
        self.fill_stops(&stops, 0, |row, v| row.on_time_performance = v);

        // Unmatched pairs count toward the total but are never on time.
        let mut days: HashMap<(NaiveDate, &str, &str), (usize, usize)> = HashMap::new();
        for (p, delay) in pairs.iter().zip(&delays) {
            let counts = days
                .entry((p.svc_date, p.route_id.as_str(), p.trip_id.as_str()))
                .or_default();
            if delay.is_some_and(|d| d > early && d < late) {
                counts.0 += 1;
            }
            counts.1 += 1;
        }
        let trips = mean_by(days.into_iter().map(|((_, route, trip), (on_time, total))| {
            ((route, trip), Some(on_time as f64 / total as f64 * 100.0))
        }));
        self.fill_routes(&trips, 0, |row, v| row.on_time_performance = v);

        Ok(())
    }

    /// Passenger load in passengers. Route rows hold the daily peak load.
    pub fn passenger_load(&mut self, pairs: &[AvlPair]) {
        info!("Calculating passenger load");

        let stops = stop_means(pairs, |p| p.passenger_load);
        self.fill_stops(&stops, 0, |row, v| row.passenger_load = v);

        let trips = trip_daily_means(pairs, |p| p.passenger_load, peak);
        self.fill_routes(&trips, 0, |row, v| row.passenger_load = v);
    }

    /// Crowding as a percentage of seated capacity. Route rows hold the daily
    /// peak crowding.
    pub fn crowding(&mut self, pairs: &[AvlPair]) {
        info!("Calculating crowding");

        let stops = stop_means(pairs, AvlPair::crowding);
        self.fill_stops(&stops, 0, |row, v| row.crowding = v);

        let trips = trip_daily_means(pairs, AvlPair::crowding, |values| round_to(peak(values), 0));
        self.fill_routes(&trips, 0, |row, v| row.crowding = v);
    }

    /// Vehicle congestion delay in min/mile and passenger congestion delay in
    /// pax-min/mile, against the fastest observed speed of each stop pair.
    pub fn congestion_delay(&mut self) {
        info!("Calculating congestion delay");

        let mut fastest: HashMap<(String, String), f64> = HashMap::new();
        for row in &self.stop_metrics {
            if let Some(speed) = row.observed_speed_without_dwell {
                let entry = fastest
                    .entry((row.stop_id.clone(), row.next_stop.clone()))
                    .or_insert(speed);
                *entry = entry.max(speed);
            }
        }

        for row in self.stop_metrics.iter_mut() {
            let free_flow = fastest
                .get(&(row.stop_id.clone(), row.next_stop.clone()))
                .map_or(MEAN_SPEED_MPH, |s| s.min(MAX_SPEED_MPH));
            row.free_flow_speed = Some(free_flow);

            row.vehicle_congestion_delay = match (row.stop_spacing, row.observed_speed_without_dwell) {
                (Some(spacing), Some(observed)) if spacing > 0.0 && observed > 0.0 => {
                    let free_flow_time = spacing / (free_flow / FT_PER_MIN_TO_MPH);
                    let observed_time = spacing / (observed / FT_PER_MIN_TO_MPH);
                    Some((observed_time - free_flow_time) / (spacing * FEET_TO_MILES))
                }
                _ => None,
            };
            row.passenger_congestion_delay = row
                .vehicle_congestion_delay
                .zip(row.passenger_load)
                .map(|(delay, load)| delay * load);
        }

        let delays: Vec<f64> = self
            .stop_metrics
            .iter()
            .filter_map(|r| r.vehicle_congestion_delay)
            .collect();
        info!(
            rows = delays.len(),
            mean_delay = mean(&delays),
            "Congestion delay calculated"
        );
    }
}
