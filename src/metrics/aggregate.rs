//! Time-period aggregation of the stop and route metric tables.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::MetricCalculation;
use super::utility::{mean, round_to};
use crate::config::TimePeriod;

/// Mean metrics of one stop pair of a route direction over a time period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopAggregate {
    pub route_id: String,
    pub direction_id: u8,
    pub stop_id: String,
    pub next_stop: String,
    pub trips: usize,
    #[serde(flatten)]
    pub metrics: BTreeMap<&'static str, f64>,
}

/// Mean trip metrics of one route direction over a time period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteAggregate {
    pub route_id: String,
    pub direction_id: u8,
    pub trips: usize,
    #[serde(flatten)]
    pub metrics: BTreeMap<&'static str, f64>,
}

/// Aggregated tables keyed by time period name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub stops: BTreeMap<String, Vec<StopAggregate>>,
    pub routes: BTreeMap<String, Vec<RouteAggregate>>,
}

#[derive(Default)]
struct Accumulator<'a> {
    trips: BTreeSet<&'a str>,
    values: BTreeMap<&'static str, Vec<f64>>,
}

impl<'a> Accumulator<'a> {
    fn add(&mut self, trip_id: &'a str, values: impl IntoIterator<Item = (&'static str, Option<f64>)>) {
        self.trips.insert(trip_id);
        for (name, value) in values {
            let entry = self.values.entry(name).or_default();
            if let Some(v) = value {
                entry.push(v);
            }
        }
    }

    /// Means of the metrics with at least one value.
    fn means(&self) -> BTreeMap<&'static str, f64> {
        self.values
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (*name, round_to(mean(values), 2)))
            .collect()
    }
}

/// Averages the metric tables over each time period, selecting trips by
/// their scheduled start time.
#[tracing::instrument(skip_all, fields(periods = periods.len()))]
pub fn aggregate(metrics: &MetricCalculation, periods: &[TimePeriod]) -> Aggregation {
    let mut aggregation = Aggregation::default();

    for period in periods {
        let mut stops: BTreeMap<(&str, u8, &str, &str), Accumulator> = BTreeMap::new();
        for row in metrics
            .stop_metrics
            .iter()
            .filter(|r| period.contains(r.trip_start_time))
        {
            stops
                .entry((row.route_id.as_str(), row.direction_id, row.stop_id.as_str(), row.next_stop.as_str()))
                .or_default()
                .add(&row.trip_id, row.metric_values());
        }

        let mut routes: BTreeMap<(&str, u8), Accumulator> = BTreeMap::new();
        for row in metrics
            .route_metrics
            .iter()
            .filter(|r| period.contains(r.trip_start_time))
        {
            routes
                .entry((row.route_id.as_str(), row.direction_id))
                .or_default()
                .add(&row.trip_id, row.metric_values());
        }

        debug!(
            period = %period.name,
            stop_pairs = stops.len(),
            routes = routes.len(),
            "Period aggregated"
        );

        let stop_rows = stops
            .into_iter()
            .map(|((route_id, direction_id, stop_id, next_stop), acc)| StopAggregate {
                route_id: route_id.to_string(),
                direction_id,
                stop_id: stop_id.to_string(),
                next_stop: next_stop.to_string(),
                trips: acc.trips.len(),
                metrics: acc.means(),
            })
            .collect();
        let route_rows = routes
            .into_iter()
            .map(|((route_id, direction_id), acc)| RouteAggregate {
                route_id: route_id.to_string(),
                direction_id,
                trips: acc.trips.len(),
                metrics: acc.means(),
            })
            .collect();

        aggregation.stops.insert(period.name.clone(), stop_rows);
        aggregation.routes.insert(period.name.clone(), route_rows);
    }

    info!(periods = aggregation.routes.len(), "Aggregation completed");
    aggregation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::records;

    /// T1 starts at 08:00 with 2 min running times; T2 starts at 16:00 with 4 min.
    fn two_trips() -> MetricCalculation {
        let mut recs = records();
        let mut later = records();
        for (i, r) in later.iter_mut().enumerate() {
            r.trip_id = "T2".to_string();
            r.arrival_time = 57_600 + 240 * i as i64;
            r.departure_time = r.arrival_time;
            r.trip_start_time = 57_600;
            r.trip_end_time = 58_320;
        }
        recs.extend(later);

        let mut m = MetricCalculation::prepare(&recs);
        m.scheduled_running_time();
        m
    }

    fn periods() -> Vec<TimePeriod> {
        vec![
            TimePeriod::new("full", 0, 48),
            TimePeriod::new("am_peak", 6, 9),
            TimePeriod::new("pm_peak", 15, 18),
            TimePeriod::new("night", 24, 30),
        ]
    }

    #[test]
    fn test_full_day_averages_both_trips() {
        let agg = aggregate(&two_trips(), &periods());

        let stops = &agg.stops["full"];
        assert_eq!(stops.len(), 3);
        assert_eq!(stops[0].stop_id, "A");
        assert_eq!(stops[0].trips, 2);
        assert_eq!(stops[0].metrics["scheduled_running_time"], 3.0);

        let routes = &agg.routes["full"];
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].trips, 2);
        assert_eq!(routes[0].metrics["scheduled_running_time"], 9.0);
    }

    #[test]
    fn test_periods_select_by_trip_start() {
        let agg = aggregate(&two_trips(), &periods());

        assert_eq!(agg.routes["am_peak"][0].metrics["scheduled_running_time"], 6.0);
        assert_eq!(agg.routes["pm_peak"][0].metrics["scheduled_running_time"], 12.0);
        assert!(agg.stops["night"].is_empty());
        assert!(agg.routes["night"].is_empty());
    }

    #[test]
    fn test_missing_metrics_are_left_out() {
        let agg = aggregate(&two_trips(), &periods());
        let metrics = &agg.stops["full"][0].metrics;
        assert!(!metrics.contains_key("boardings"));

        let json = serde_json::to_value(&agg.stops["full"][0]).unwrap();
        assert_eq!(json["route_id"], "1");
        assert_eq!(json["scheduled_running_time"], 3.0);
    }
}
