//! Rows of the stop, timepoint and route metric tables.

use serde::Serialize;
use std::ops::Range;

/// Metrics of one scheduled stop pair of one trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StopMetric {
    pub pattern: String,
    pub route_id: String,
    pub direction_id: u8,
    pub trip_id: String,
    pub service_id: String,
    pub stop_id: String,
    pub next_stop: String,
    pub stop_sequence: u32,
    pub arrival_time: i64,
    pub departure_time: i64,
    pub next_stop_arrival_time: i64,
    pub trip_start_time: i64,
    pub trip_end_time: i64,
    pub timepoint: bool,
    pub tp_bp: bool,

    pub stop_spacing: Option<f64>,
    pub scheduled_headway: Option<f64>,
    pub scheduled_running_time: Option<f64>,
    pub scheduled_speed: Option<f64>,

    pub observed_headway: Option<f64>,
    pub observed_running_time: Option<f64>,
    pub observed_running_time_with_dwell: Option<f64>,
    pub observed_speed_without_dwell: Option<f64>,
    pub observed_speed_with_dwell: Option<f64>,
    pub boardings: Option<f64>,
    pub on_time_performance: Option<f64>,
    pub passenger_load: Option<f64>,
    pub crowding: Option<f64>,
    pub free_flow_speed: Option<f64>,
    pub vehicle_congestion_delay: Option<f64>,
    pub passenger_congestion_delay: Option<f64>,
}

impl StopMetric {
    pub fn stop_pair(&self) -> (&str, &str) {
        (&self.stop_id, &self.next_stop)
    }

    /// Named metric values, in output order.
    pub fn metric_values(&self) -> [(&'static str, Option<f64>); 15] {
        [
            ("stop_spacing", self.stop_spacing),
            ("scheduled_headway", self.scheduled_headway),
            ("scheduled_running_time", self.scheduled_running_time),
            ("scheduled_speed", self.scheduled_speed),
            ("observed_headway", self.observed_headway),
            ("observed_running_time", self.observed_running_time),
            ("observed_running_time_with_dwell", self.observed_running_time_with_dwell),
            ("observed_speed_without_dwell", self.observed_speed_without_dwell),
            ("observed_speed_with_dwell", self.observed_speed_with_dwell),
            ("boardings", self.boardings),
            ("on_time_performance", self.on_time_performance),
            ("passenger_load", self.passenger_load),
            ("crowding", self.crowding),
            ("vehicle_congestion_delay", self.vehicle_congestion_delay),
            ("passenger_congestion_delay", self.passenger_congestion_delay),
        ]
    }
}

/// Metrics between two consecutive timepoints or branchpoints of one trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TpbpMetric {
    pub pattern: String,
    pub route_id: String,
    pub direction_id: u8,
    pub trip_id: String,
    pub stop_id: String,
    pub next_stop: String,
    pub arrival_time: i64,
    pub next_stop_arrival_time: i64,
    pub trip_start_time: i64,

    pub stop_spacing: Option<f64>,
    pub scheduled_running_time: Option<f64>,
    pub scheduled_speed: Option<f64>,
    pub observed_running_time: Option<f64>,
    pub observed_running_time_with_dwell: Option<f64>,
    pub observed_speed_without_dwell: Option<f64>,
    pub observed_speed_with_dwell: Option<f64>,
    pub boardings: Option<f64>,

    /// Rows of the stop metrics table this pair spans.
    #[serde(skip)]
    pub stop_rows: Range<usize>,
}

/// Metrics of one whole trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteMetric {
    pub pattern: String,
    pub route_id: String,
    pub direction_id: u8,
    pub trip_id: String,
    pub service_id: String,
    pub trip_start_time: i64,
    pub trip_end_time: i64,

    pub stop_spacing: Option<f64>,
    pub scheduled_running_time: Option<f64>,
    pub scheduled_speed: Option<f64>,
    pub observed_running_time: Option<f64>,
    pub observed_running_time_with_dwell: Option<f64>,
    pub observed_speed_without_dwell: Option<f64>,
    pub observed_speed_with_dwell: Option<f64>,
    pub boardings: Option<f64>,
    pub on_time_performance: Option<f64>,
    pub passenger_load: Option<f64>,
    pub crowding: Option<f64>,

    #[serde(skip)]
    pub stop_rows: Range<usize>,
}

impl RouteMetric {
    pub fn metric_values(&self) -> [(&'static str, Option<f64>); 11] {
        [
            ("stop_spacing", self.stop_spacing),
            ("scheduled_running_time", self.scheduled_running_time),
            ("scheduled_speed", self.scheduled_speed),
            ("observed_running_time", self.observed_running_time),
            ("observed_running_time_with_dwell", self.observed_running_time_with_dwell),
            ("observed_speed_without_dwell", self.observed_speed_without_dwell),
            ("observed_speed_with_dwell", self.observed_speed_with_dwell),
            ("boardings", self.boardings),
            ("on_time_performance", self.on_time_performance),
            ("passenger_load", self.passenger_load),
            ("crowding", self.crowding),
        ]
    }
}
