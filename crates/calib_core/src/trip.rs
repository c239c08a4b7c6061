use serde::{Deserialize, Serialize};

use crate::bounds::TripParameters;
use crate::detection::{DetectionEvent, DetectorRoute};

/// Working record for one measured vehicle.
///
/// A trip is rebuilt for every candidate from the same template with
/// [`Trip::with_parameters`]; nothing mutates a shared instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub detector_id: String,
    pub route_id: String,
    pub from_edge: String,
    pub to_edge: String,
    pub depart_lane: u32,
    pub max_speed: f64,
    pub time_detector_real: i64,
    pub speed_detector_real: f64,
    pub depart: i64,
    pub speed_factor: f64,
    pub depart_speed: f64,
}

impl Trip {
    /// Template trip departing one nominal travel time before the measured crossing.
    pub fn from_event(event: &DetectionEvent, route: &DetectorRoute) -> Self {
        Self {
            id: event.id.clone(),
            detector_id: event.detector_id.clone(),
            route_id: route.route_id(),
            from_edge: route.from_edge.clone(),
            to_edge: route.to_edge.clone(),
            depart_lane: route.lane_index,
            max_speed: route.max_speed,
            time_detector_real: event.time_detector_real,
            speed_detector_real: event.speed_detector_real,
            depart: event.time_detector_real - route.travel_time_offset,
            speed_factor: 1.0,
            depart_speed: route.max_speed,
        }
    }

    pub fn with_parameters(&self, params: TripParameters) -> Self {
        Self {
            depart: params.depart,
            speed_factor: params.speed_factor,
            depart_speed: params.speed_factor * self.max_speed,
            ..self.clone()
        }
    }

    /// Simulation time at which a trial saves its checkpoint.
    pub fn checkpoint_time(&self) -> i64 {
        self.depart + 1
    }
}
