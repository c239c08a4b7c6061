//! Admissible search interval for one vehicle and the integer candidate encoding.
//!
//! The optimizer works on an integer grid: a depart offset in seconds from
//! `depart_min`, and the speed factor scaled by [`SPEED_FACTOR_RESOLUTION`].

use serde::{Deserialize, Serialize};

use crate::optimizer::{IntegerDimension, SearchSpace};

pub const SPEED_FACTOR_MIN: f64 = 0.6;
pub const SPEED_FACTOR_MAX: f64 = 3.2;
pub const SPEED_FACTOR_RESOLUTION: i64 = 20;

/// How far before its measured crossing the first vehicle may depart.
pub const FIRST_VEHICLE_LOOKBACK_SECS: i64 = 100;
/// Latest departure is this many seconds before the measured crossing.
pub const DEPART_HEADROOM_SECS: i64 = 10;
/// Smallest depart span, so the interval never collapses.
pub const MIN_DEPART_SPAN_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub depart_min: i64,
    pub depart_max: i64,
    pub speed_factor_min: f64,
    pub speed_factor_max: f64,
    pub resolution: i64,
}

/// Point of the integer search grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub depart_offset: i64,
    pub speed_factor_scaled: i64,
}

/// Decoded trip parameters of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripParameters {
    pub depart: i64,
    pub speed_factor: f64,
}

impl Candidate {
    pub fn new(depart_offset: i64, speed_factor_scaled: i64) -> Self {
        Self {
            depart_offset,
            speed_factor_scaled,
        }
    }

    pub fn to_point(self) -> Vec<i64> {
        vec![self.depart_offset, self.speed_factor_scaled]
    }

    /// Build a candidate from an optimizer point. Returns `None` unless the point is 2-D.
    pub fn from_point(point: &[i64]) -> Option<Self> {
        match point {
            [depart_offset, speed_factor_scaled] => {
                Some(Self::new(*depart_offset, *speed_factor_scaled))
            }
            _ => None,
        }
    }
}

impl SearchBounds {
    /// Bounds for a vehicle measured at `time_detector_real`.
    ///
    /// `previous_depart` is the committed depart of the vehicle calibrated just
    /// before this one, if any. It takes precedence over the lookback window so
    /// that committed departures stay strictly increasing.
    pub fn for_vehicle(time_detector_real: i64, previous_depart: Option<i64>) -> Self {
        let depart_min = match previous_depart {
            Some(depart) => depart + 1,
            None => time_detector_real - FIRST_VEHICLE_LOOKBACK_SECS,
        };
        let depart_max =
            (time_detector_real - DEPART_HEADROOM_SECS).max(depart_min + MIN_DEPART_SPAN_SECS);

        Self {
            depart_min,
            depart_max,
            speed_factor_min: SPEED_FACTOR_MIN,
            speed_factor_max: SPEED_FACTOR_MAX,
            resolution: SPEED_FACTOR_RESOLUTION,
        }
    }

    pub fn depart_span(&self) -> i64 {
        self.depart_max - self.depart_min
    }

    /// Inclusive range of the scaled speed factor dimension.
    pub fn speed_factor_scaled_range(&self) -> (i64, i64) {
        let scale = self.resolution as f64;
        (
            (self.speed_factor_min * scale).round() as i64,
            (self.speed_factor_max * scale).round() as i64,
        )
    }

    pub fn search_space(&self) -> SearchSpace {
        let (low, high) = self.speed_factor_scaled_range();
        SearchSpace::new(vec![
            IntegerDimension::new(0, self.depart_span()),
            IntegerDimension::new(low, high),
        ])
    }

    pub fn decode(&self, candidate: Candidate) -> TripParameters {
        TripParameters {
            depart: self.depart_min + candidate.depart_offset,
            speed_factor: candidate.speed_factor_scaled as f64 / self.resolution as f64,
        }
    }

    /// Inverse of [`Self::decode`] for values on the grid; off-grid speed factors are rounded.
    pub fn encode(&self, params: TripParameters) -> Candidate {
        Candidate {
            depart_offset: params.depart - self.depart_min,
            speed_factor_scaled: (params.speed_factor * self.resolution as f64).round() as i64,
        }
    }

    pub fn contains(&self, candidate: Candidate) -> bool {
        let (low, high) = self.speed_factor_scaled_range();
        (0..=self.depart_span()).contains(&candidate.depart_offset)
            && (low..=high).contains(&candidate.speed_factor_scaled)
    }

    /// Speed factor mapped to `[0, 1]` over its admissible range.
    pub fn normalized_speed_factor(&self, speed_factor: f64) -> f64 {
        (speed_factor - self.speed_factor_min) / (self.speed_factor_max - self.speed_factor_min)
    }

    /// Depart mapped to `[0, 1]` over `[depart_min, depart_max]`.
    pub fn normalized_depart(&self, depart: i64) -> f64 {
        (depart - self.depart_min) as f64 / self.depart_span() as f64
    }
}
