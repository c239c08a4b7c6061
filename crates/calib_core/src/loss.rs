//! Biased squared-error loss between simulated and measured detector readings.

use serde::{Deserialize, Serialize};

use crate::bounds::{SearchBounds, TripParameters};

/// Weight of the speed-factor reward. Kept below the depart penalty's weight.
pub const SPEED_FACTOR_BIAS: f64 = 0.5;
/// Weight of the penalty for departing late within the interval.
pub const DEPART_BIAS: f64 = 1.0;

/// Which measured quantities enter the squared error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossMode {
    #[default]
    TimeAndSpeed,
    /// Ignore the speed error, e.g. when measured speeds are unreliable.
    TimeOnly,
}

/// Loss of one trial.
///
/// The squared errors dominate; the two bias terms only separate candidates
/// whose errors are nearly equal, preferring higher speed factors and earlier
/// departures.
pub fn calibration_loss(
    bounds: &SearchBounds,
    params: TripParameters,
    time_error: f64,
    speed_error: f64,
    mode: LossMode,
) -> f64 {
    let squared = match mode {
        LossMode::TimeAndSpeed => time_error.powi(2) + speed_error.powi(2),
        LossMode::TimeOnly => time_error.powi(2),
    };

    squared - SPEED_FACTOR_BIAS * bounds.normalized_speed_factor(params.speed_factor)
        + DEPART_BIAS * bounds.normalized_depart(params.depart)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> SearchBounds {
        SearchBounds::for_vehicle(1000, None)
    }

    #[test]
    fn exact_match_at_fastest_earliest_candidate_is_negative() {
        let bounds = bounds();
        let params = TripParameters {
            depart: bounds.depart_min,
            speed_factor: 3.2,
        };
        let loss = calibration_loss(&bounds, params, 0.0, 0.0, LossMode::TimeAndSpeed);
        assert!((loss + 0.5).abs() < 1e-12);
    }

    #[test]
    fn higher_speed_factor_strictly_lowers_loss() {
        let bounds = bounds();
        let mut previous = f64::INFINITY;
        for scaled in 12..=64 {
            let params = TripParameters {
                depart: 950,
                speed_factor: scaled as f64 / 20.0,
            };
            let loss = calibration_loss(&bounds, params, 2.0, 1.5, LossMode::TimeAndSpeed);
            assert!(loss < previous);
            previous = loss;
        }
    }

    #[test]
    fn later_depart_strictly_raises_loss() {
        let bounds = bounds();
        let mut previous = f64::NEG_INFINITY;
        for depart in bounds.depart_min..=bounds.depart_max {
            let params = TripParameters {
                depart,
                speed_factor: 1.0,
            };
            let loss = calibration_loss(&bounds, params, 2.0, 1.5, LossMode::TimeAndSpeed);
            assert!(loss > previous);
            previous = loss;
        }
    }

    #[test]
    fn time_only_mode_ignores_speed_error() {
        let bounds = bounds();
        let params = TripParameters {
            depart: 920,
            speed_factor: 1.5,
        };
        let slow = calibration_loss(&bounds, params, 3.0, 0.0, LossMode::TimeOnly);
        let fast = calibration_loss(&bounds, params, 3.0, 8.0, LossMode::TimeOnly);
        assert_eq!(slow, fast);

        let with_speed = calibration_loss(&bounds, params, 3.0, 8.0, LossMode::TimeAndSpeed);
        assert!((with_speed - fast - 64.0).abs() < 1e-9);
    }
}
