//! Stop, timepoint and route level metric calculation.
//!
//! Metrics are computed per trip. When AVL data covers several service dates,
//! observed metrics of the same trip are averaged across dates, so every table
//! holds one row per (trip, stop pair). [`aggregate`] then averages trips over
//! time periods for the frontend.

pub mod aggregate;
pub mod observed;
pub mod scheduled;
pub mod types;
pub mod utility;

use tracing::info;

use crate::avl::AvlRecord;
use crate::config::{DataOption, OnTimeWindow};
use crate::error::RoveError;
use crate::gtfs::records::{StopEvent, trip_ranges};
use crate::shapes::ShapeRecord;
use types::{RouteMetric, StopMetric, TpbpMetric};

/// The three metric tables of a run.
#[derive(Debug, Clone, Default)]
pub struct MetricCalculation {
    pub stop_metrics: Vec<StopMetric>,
    pub tpbp_metrics: Vec<TpbpMetric>,
    pub route_metrics: Vec<RouteMetric>,
}

impl MetricCalculation {
    /// Computes scheduled metrics from GTFS records and shapes, then observed
    /// metrics when the data option includes AVL.
    #[tracing::instrument(skip_all, fields(records = records.len(), data_option = %data_option))]
    pub fn new(
        shapes: &[ShapeRecord],
        records: &[StopEvent],
        avl: Option<&[AvlRecord]>,
        data_option: DataOption,
        on_time: OnTimeWindow,
    ) -> Result<Self, RoveError> {
        info!("Calculating metrics");

        let mut metrics = Self::prepare(records);

        metrics.stop_spacing(shapes);
        metrics.scheduled_headway();
        metrics.scheduled_running_time();
        metrics.scheduled_speed();

        if data_option.has_avl() {
            let avl = avl.ok_or_else(|| RoveError::MissingAvl(data_option.to_string()))?;
            let pairs = observed::prepare_avl_pairs(avl);

            metrics.observed_headway(&pairs);
            metrics.observed_running_time(&pairs);
            metrics.observed_speed_without_dwell();
            metrics.observed_running_time_with_dwell(&pairs);
            metrics.observed_speed_with_dwell();
            metrics.boardings(&pairs);
            metrics.on_time_performance(&pairs, on_time)?;
            metrics.passenger_load(&pairs);
            metrics.crowding(&pairs);
            metrics.congestion_delay();
        }

        info!(
            stop_rows = metrics.stop_metrics.len(),
            tpbp_rows = metrics.tpbp_metrics.len(),
            route_rows = metrics.route_metrics.len(),
            "Metrics calculation completed"
        );
        Ok(metrics)
    }

    /// Builds the empty tables: a stop row per stop event with a next stop,
    /// a tpbp row per consecutive tp_bp pair, and a route row per trip with
    /// at least one stop pair.
    pub fn prepare(records: &[StopEvent]) -> Self {
        let mut stop_metrics = Vec::new();
        let mut tpbp_metrics = Vec::new();
        let mut route_metrics = Vec::new();

        for range in trip_ranges(records) {
            let trip = &records[range];
            let trip_start = stop_metrics.len();

            for pair in trip.windows(2) {
                let (here, next) = (&pair[0], &pair[1]);
                stop_metrics.push(StopMetric {
                    pattern: here.pattern.clone(),
                    route_id: here.route_id.clone(),
                    direction_id: here.direction_id,
                    trip_id: here.trip_id.clone(),
                    service_id: here.service_id.clone(),
                    stop_id: here.stop_id.clone(),
                    next_stop: next.stop_id.clone(),
                    stop_sequence: here.stop_sequence,
                    arrival_time: here.arrival_time,
                    departure_time: here.departure_time,
                    next_stop_arrival_time: next.arrival_time,
                    trip_start_time: here.trip_start_time,
                    trip_end_time: here.trip_end_time,
                    timepoint: here.timepoint,
                    tp_bp: here.tp_bp,
                    ..Default::default()
                });
            }
            let trip_end = stop_metrics.len();
            if trip_start == trip_end {
                continue;
            }

            // Each tp_bp stop opens a group of stop rows that runs up to the next tp_bp.
            let starts: Vec<usize> = (trip_start..trip_end).filter(|i| stop_metrics[*i].tp_bp).collect();
            for (k, start) in starts.iter().enumerate() {
                let end = starts.get(k + 1).copied().unwrap_or(trip_end);
                let first: &StopMetric = &stop_metrics[*start];
                let last: &StopMetric = &stop_metrics[end - 1];
                tpbp_metrics.push(TpbpMetric {
                    pattern: first.pattern.clone(),
                    route_id: first.route_id.clone(),
                    direction_id: first.direction_id,
                    trip_id: first.trip_id.clone(),
                    stop_id: first.stop_id.clone(),
                    next_stop: last.next_stop.clone(),
                    arrival_time: first.arrival_time,
                    next_stop_arrival_time: last.next_stop_arrival_time,
                    trip_start_time: first.trip_start_time,
                    stop_rows: *start..end,
                    ..Default::default()
                });
            }

            if let Some(first) = trip.first() {
                route_metrics.push(RouteMetric {
                    pattern: first.pattern.clone(),
                    route_id: first.route_id.clone(),
                    direction_id: first.direction_id,
                    trip_id: first.trip_id.clone(),
                    service_id: first.service_id.clone(),
                    trip_start_time: first.trip_start_time,
                    trip_end_time: first.trip_end_time,
                    stop_rows: trip_start..trip_end,
                    ..Default::default()
                });
            }
        }

        Self {
            stop_metrics,
            tpbp_metrics,
            route_metrics,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gtfs::records::tests::event;

    /// One trip A-B-C-D, timepoints at A and C, two minutes between stops.
    pub(crate) fn records() -> Vec<StopEvent> {
        let mut records = vec![
            event("1", "T1", "A", 1, 28_800, true),
            event("1", "T1", "B", 2, 28_920, false),
            event("1", "T1", "C", 3, 29_040, true),
            event("1", "T1", "D", 4, 29_160, false),
        ];
        for r in records.iter_mut() {
            r.pattern = "1-0-1".to_string();
            r.trip_start_time = 28_800;
            r.trip_end_time = 29_160;
            r.tp_bp = r.timepoint;
        }
        records[3].tp_bp = true;
        records
    }

    #[test]
    fn test_prepare_builds_three_tables() {
        let metrics = MetricCalculation::prepare(&records());

        assert_eq!(metrics.stop_metrics.len(), 3);
        assert_eq!(metrics.stop_metrics[2].stop_pair(), ("C", "D"));
        assert_eq!(metrics.stop_metrics[0].next_stop_arrival_time, 28_920);

        assert_eq!(metrics.tpbp_metrics.len(), 2);
        assert_eq!(metrics.tpbp_metrics[0].stop_id, "A");
        assert_eq!(metrics.tpbp_metrics[0].next_stop, "C");
        assert_eq!(metrics.tpbp_metrics[0].stop_rows, 0..2);
        assert_eq!(metrics.tpbp_metrics[1].next_stop, "D");

        assert_eq!(metrics.route_metrics.len(), 1);
        assert_eq!(metrics.route_metrics[0].stop_rows, 0..3);
    }

    #[test]
    fn test_single_stop_trip_has_no_rows() {
        let mut records = records();
        let mut lone = event("1", "T0", "A", 1, 28_000, true);
        lone.tp_bp = true;
        records.insert(0, lone);

        let metrics = MetricCalculation::prepare(&records);

        assert_eq!(metrics.stop_metrics.len(), 3);
        assert_eq!(metrics.route_metrics.len(), 1);
        assert_eq!(metrics.route_metrics[0].trip_id, "T1");
        assert!(metrics.tpbp_metrics.iter().all(|t| t.trip_id == "T1"));
    }

    #[test]
    fn test_avl_option_without_avl_records() {
        let result = MetricCalculation::new(
            &[],
            &records(),
            None,
            DataOption::GtfsAvl,
            OnTimeWindow::default(),
        );
        assert!(matches!(result, Err(RoveError::MissingAvl(_))));
    }
}
