//! Measured detector crossings and the static route each detector is fed by.

use serde::{Deserialize, Serialize};

/// One real vehicle passing a detector. Produced upstream, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: String,
    pub detector_id: String,
    /// Crossing time in whole seconds of the simulation day.
    pub time_detector_real: i64,
    /// Crossing speed in m/s.
    pub speed_detector_real: f64,
}

impl DetectionEvent {
    pub fn new(
        id: impl Into<String>,
        detector_id: impl Into<String>,
        time_detector_real: i64,
        speed_detector_real: f64,
    ) -> Self {
        Self {
            id: id.into(),
            detector_id: detector_id.into(),
            time_detector_real,
            speed_detector_real,
        }
    }
}

/// Network placement of a detector and the route injected vehicles follow to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorRoute {
    pub detector_id: String,
    /// Lane id the induction loop sits on.
    pub lane: String,
    /// Lane index vehicles depart on.
    pub lane_index: u32,
    pub from_edge: String,
    pub to_edge: String,
    pub route_edges: Vec<String>,
    /// Typical seconds from route start to the detector.
    pub travel_time_offset: i64,
    /// Speed limit at the detector in m/s.
    pub max_speed: f64,
}

impl DetectorRoute {
    /// Route id registered with the simulator for this detector.
    pub fn route_id(&self) -> String {
        format!("{}_route", self.detector_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_id_is_derived_from_detector() {
        let route = DetectorRoute {
            detector_id: "w2e_out".into(),
            lane: "151884974#0_0".into(),
            lane_index: 0,
            from_edge: "151884975#0".into(),
            to_edge: "151884974#0".into(),
            route_edges: vec!["151884975#0".into(), "151884974#0".into()],
            travel_time_offset: 51,
            max_speed: 13.89,
        };
        assert_eq!(route.route_id(), "w2e_out_route");
    }
}
