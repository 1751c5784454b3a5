//! Metrics derived from the GTFS schedule alone.

use std::collections::HashMap;
use tracing::{info, warn};

use super::MetricCalculation;
use super::utility::{KILOMETER_TO_FT, round_to, sorted_diffs, speed_mph, sum_present};
use crate::shapes::ShapeRecord;

impl MetricCalculation {
    /// Stop spacing in ft, from the shape distance of each (pattern, stop pair).
    pub fn stop_spacing(&mut self, shapes: &[ShapeRecord]) {
        info!("Calculating stop spacing");

        let distances: HashMap<(&str, &str, &str), f64> = shapes
            .iter()
            .map(|s| {
                (
                    (s.pattern.as_str(), s.stop_pair.0.as_str(), s.stop_pair.1.as_str()),
                    s.distance,
                )
            })
            .collect();

        let mut unmatched = 0usize;
        for row in self.stop_metrics.iter_mut() {
            let key = (row.pattern.as_str(), row.stop_id.as_str(), row.next_stop.as_str());
            row.stop_spacing = distances.get(&key).map(|km| round_to(km * KILOMETER_TO_FT, 2));
            if row.stop_spacing.is_none() {
                unmatched += 1;
            }
        }
        if unmatched > 0 {
            warn!(unmatched, "Stop pairs without a shape have no spacing");
        }

        let stops = &self.stop_metrics;
        for route in self.route_metrics.iter_mut() {
            route.stop_spacing = sum_present(stops[route.stop_rows.clone()].iter().map(|s| s.stop_spacing));
        }
        for tpbp in self.tpbp_metrics.iter_mut() {
            tpbp.stop_spacing = sum_present(stops[tpbp.stop_rows.clone()].iter().map(|s| s.stop_spacing));
        }
    }

    /// Scheduled headway in minutes: the gap between consecutive scheduled
    /// arrivals at the first stop of a stop pair, within a route, direction
    /// and pattern.
    pub fn scheduled_headway(&mut self) {
        info!("Calculating scheduled headway");

        let diffs = sorted_diffs(self.stop_metrics.iter().enumerate().map(|(i, s)| {
            (
                (s.route_id.as_str(), s.direction_id, s.pattern.as_str(), s.stop_pair()),
                i,
                s.arrival_time,
            )
        }));
        for (i, row) in self.stop_metrics.iter_mut().enumerate() {
            row.scheduled_headway = diffs.get(&i).map(|d| d / 60.0);
        }
    }

    /// Scheduled running time in minutes: departure at a stop to arrival at the next.
    pub fn scheduled_running_time(&mut self) {
        info!("Calculating scheduled running time");

        for row in self.stop_metrics.iter_mut() {
            let seconds = row.next_stop_arrival_time - row.departure_time;
            row.scheduled_running_time = Some(round_to(seconds as f64 / 60.0, 2));
        }

        let stops = &self.stop_metrics;
        for route in self.route_metrics.iter_mut() {
            route.scheduled_running_time =
                sum_present(stops[route.stop_rows.clone()].iter().map(|s| s.scheduled_running_time));
        }
        for tpbp in self.tpbp_metrics.iter_mut() {
            tpbp.scheduled_running_time =
                sum_present(stops[tpbp.stop_rows.clone()].iter().map(|s| s.scheduled_running_time));
        }
    }

    /// Scheduled speed in mph: stop spacing over scheduled running time.
    pub fn scheduled_speed(&mut self) {
        info!("Calculating scheduled speed");

        for row in self.stop_metrics.iter_mut() {
            row.scheduled_speed = speed_mph(row.stop_spacing, row.scheduled_running_time);
        }
        for route in self.route_metrics.iter_mut() {
            route.scheduled_speed = speed_mph(route.stop_spacing, route.scheduled_running_time);
        }
        for tpbp in self.tpbp_metrics.iter_mut() {
            tpbp.scheduled_speed = speed_mph(tpbp.stop_spacing, tpbp.scheduled_running_time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::records;

    fn shapes() -> Vec<ShapeRecord> {
        [("A", "B", 0.5), ("B", "C", 0.25), ("C", "D", 1.0)]
            .iter()
            .map(|(a, b, km)| ShapeRecord {
                pattern: "1-0-1".to_string(),
                route_id: "1".to_string(),
                direction_id: 0,
                stop_pair: (a.to_string(), b.to_string()),
                geometry: Vec::new(),
                distance: *km,
            })
            .collect()
    }

    #[test]
    fn test_stop_spacing_in_feet() {
        let mut m = MetricCalculation::prepare(&records());
        m.stop_spacing(&shapes());

        assert_eq!(m.stop_metrics[0].stop_spacing, Some(1640.42));
        assert_eq!(m.stop_metrics[1].stop_spacing, Some(820.21));
        assert_eq!(m.tpbp_metrics[0].stop_spacing, Some(1640.42 + 820.21));
        assert_eq!(m.route_metrics[0].stop_spacing, Some(1640.42 + 820.21 + 3280.84));
    }

    #[test]
    fn test_missing_shape_leaves_spacing_empty() {
        let mut m = MetricCalculation::prepare(&records());
        m.stop_spacing(&shapes()[..1]);
        assert!(m.stop_metrics[1].stop_spacing.is_none());
        assert_eq!(m.route_metrics[0].stop_spacing, Some(1640.42));
    }

    #[test]
    fn test_running_time_and_speed() {
        let mut m = MetricCalculation::prepare(&records());
        m.stop_spacing(&shapes());
        m.scheduled_running_time();
        m.scheduled_speed();

        assert_eq!(m.stop_metrics[0].scheduled_running_time, Some(2.0));
        assert_eq!(m.tpbp_metrics[0].scheduled_running_time, Some(4.0));
        assert_eq!(m.route_metrics[0].scheduled_running_time, Some(6.0));
        // 3280.84 ft in 2 minutes
        assert_eq!(m.stop_metrics[2].scheduled_speed, Some(18.64));
    }

    #[test]
    fn test_scheduled_headway_between_trips() {
        let mut recs = records();
        let mut second = records();
        for r in second.iter_mut() {
            r.trip_id = "T2".to_string();
            r.arrival_time += 900;
            r.departure_time += 900;
        }
        recs.extend(second);

        let mut m = MetricCalculation::prepare(&recs);
        m.scheduled_headway();

        assert_eq!(m.stop_metrics[0].scheduled_headway, None);
        assert_eq!(m.stop_metrics[3].scheduled_headway, Some(15.0));
    }
}
