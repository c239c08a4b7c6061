//! Time-ordered iteration over measured vehicles.

use std::collections::VecDeque;

use crate::bounds::{SearchBounds, FIRST_VEHICLE_LOOKBACK_SECS};
use crate::detection::{DetectionEvent, DetectorRoute};
use crate::error::CalibrationError;
use crate::record::CalibrationRecord;
use crate::trip::Trip;

/// A vehicle handed out for calibration and not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTrip {
    /// Zero-based position in calibration order.
    pub index: usize,
    pub event: DetectionEvent,
    pub template: Trip,
    pub bounds: SearchBounds,
}

/// Hands out vehicles one at a time in ascending measured-crossing order.
///
/// Each vehicle's bounds depend on the depart committed for the one before
/// it, so a trip must be committed before the next can be requested.
#[derive(Debug)]
pub struct TripSequencer {
    events: VecDeque<DetectionEvent>,
    route: DetectorRoute,
    previous_depart: Option<i64>,
    pending: Option<String>,
    handed_out: usize,
}

impl TripSequencer {
    /// Sort `events` by crossing time (stable) and keep the first `cap`.
    /// A `cap` of zero or less keeps every event.
    pub fn new(mut events: Vec<DetectionEvent>, route: DetectorRoute, cap: i64) -> Self {
        events.sort_by_key(|event| event.time_detector_real);
        if cap > 0 {
            events.truncate(cap as usize);
        }
        Self {
            events: events.into(),
            route,
            previous_depart: None,
            pending: None,
            handed_out: 0,
        }
    }

    pub fn route(&self) -> &DetectorRoute {
        &self.route
    }

    /// Vehicles not yet handed out.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Simulation begin time: the first template's depart minus the first-vehicle lookback.
    pub fn begin_time(&self) -> Option<i64> {
        self.events.front().map(|event| {
            event.time_detector_real - self.route.travel_time_offset - FIRST_VEHICLE_LOOKBACK_SECS
        })
    }

    /// Next vehicle and its search bounds, or `None` when all vehicles are done.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Sequencing`] if the previous trip was not committed.
    pub fn next_trip(&mut self) -> Result<Option<PendingTrip>, CalibrationError> {
        if let Some(pending) = &self.pending {
            return Err(CalibrationError::Sequencing {
                pending: pending.clone(),
            });
        }
        let Some(event) = self.events.pop_front() else {
            return Ok(None);
        };

        let bounds = SearchBounds::for_vehicle(event.time_detector_real, self.previous_depart);
        let template = Trip::from_event(&event, &self.route);
        let index = self.handed_out;
        self.handed_out += 1;
        self.pending = Some(event.id.clone());

        Ok(Some(PendingTrip {
            index,
            event,
            template,
            bounds,
        }))
    }

    /// Commit the outcome of the pending trip, unlocking the next one.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Sequencing`] if `record` is not for the pending trip.
    pub fn commit(&mut self, record: &CalibrationRecord) -> Result<(), CalibrationError> {
        match &self.pending {
            Some(pending) if *pending == record.veh_id => {
                debug_assert!(
                    self.previous_depart.map_or(true, |previous| record.depart > previous),
                    "committed departs must increase"
                );
                self.previous_depart = Some(record.depart);
                self.pending = None;
                Ok(())
            }
            Some(pending) => Err(CalibrationError::Sequencing {
                pending: pending.clone(),
            }),
            None => Err(CalibrationError::Sequencing {
                pending: record.veh_id.clone(),
            }),
        }
    }
}
