//! Detector placements and the routes feeding them.

use calib_core::DetectorRoute;
use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

const EAST_TO_WEST_ROUTE: &str =
    "24225358#0 1285834640 110107986#2 1243253630#0 98438064#0 1243253622#0";
const WEST_TO_EAST_ROUTE: &str = "151884975#0 1080999537#0 151884977#0 151884977#4 151884974#0";

const EAST_TO_WEST_MAX_SPEED: f64 = 8.33;
const WEST_TO_EAST_MAX_SPEED: f64 = 13.89;

/// Every detector a run may target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectorCatalog {
    routes: Vec<DetectorRoute>,
}

impl DetectorCatalog {
    pub fn new(routes: Vec<DetectorRoute>) -> Self {
        Self { routes }
    }

    /// The four Hornsgatan loops, both directions, inner and outer lane.
    pub fn hornsgatan() -> Self {
        let e2w = |detector: &str, lane: &str, lane_index: u32| DetectorRoute {
            detector_id: detector.to_string(),
            lane: lane.to_string(),
            lane_index,
            from_edge: "24225358#0".to_string(),
            to_edge: "1243253622#0".to_string(),
            route_edges: split_edges(EAST_TO_WEST_ROUTE),
            travel_time_offset: 28,
            max_speed: EAST_TO_WEST_MAX_SPEED,
        };
        let w2e = |detector: &str, lane: &str, lane_index: u32| DetectorRoute {
            detector_id: detector.to_string(),
            lane: lane.to_string(),
            lane_index,
            from_edge: "151884975#0".to_string(),
            to_edge: "151884974#0".to_string(),
            route_edges: split_edges(WEST_TO_EAST_ROUTE),
            travel_time_offset: 51,
            max_speed: WEST_TO_EAST_MAX_SPEED,
        };
        Self::new(vec![
            e2w("e2w_out", "1285834640_0", 0),
            e2w("e2w_in", "1285834640_1", 1),
            w2e("w2e_out", "151884974#0_0", 0),
            w2e("w2e_in", "151884974#0_1", 1),
        ])
    }

    pub fn routes(&self) -> &[DetectorRoute] {
        &self.routes
    }

    pub fn get(&self, detector_id: &str) -> Result<&DetectorRoute, RunnerError> {
        self.routes
            .iter()
            .find(|route| route.detector_id == detector_id)
            .ok_or_else(|| RunnerError::UnknownDetector(detector_id.to_string()))
    }
}

impl Default for DetectorCatalog {
    fn default() -> Self {
        Self::hornsgatan()
    }
}

fn split_edges(route: &str) -> Vec<String> {
    route.split_whitespace().map(str::to_string).collect()
}
