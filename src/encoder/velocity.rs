//! Exponential-forgetting velocity estimator for the winch counter.
//!
//! The counter only resolves centimetres, so raw backward differences are
//! noisy at low speed. Each step reports the instantaneous velocity along
//! with a forgetting weight
//!
//! ```text
//! w = exp(-|dz| / tau_depth - dt / tau_time)
//! ```
//!
//! which stays near 1 for short, small steps and decays toward 0 after a
//! long pause or a large displacement. [`SmoothedVelocity`] uses `w` to blend
//! successive velocities when smoothing is enabled.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default time constant (s): history is mostly forgotten after 5-10 s.
pub const DEFAULT_TAU_TIME: f64 = 5.0;

/// Default displacement constant (m): forgotten after moving 2-4 cm.
pub const DEFAULT_TAU_DEPTH: f64 = 0.02;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum EstimateError {
    /// `dt <= 0` or not finite. The state was not advanced.
    #[error("non-positive or non-finite time step (dt = {dt})")]
    NonPositiveInterval { dt: f64 },
}

/// Last accepted sample. Owned by the caller and replaced on every
/// successful step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorState {
    pub last_position: f64,
    /// Monotonic seconds
    pub last_timestamp: f64,
}

impl EstimatorState {
    pub fn new(position: f64, timestamp: f64) -> Self {
        Self {
            last_position: position,
            last_timestamp: timestamp,
        }
    }
}

/// One counter reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: f64,
    /// Monotonic seconds
    pub timestamp: f64,
}

/// Decay constants for the forgetting weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayConstants {
    pub tau_time: f64,
    pub tau_depth: f64,
}

impl Default for DecayConstants {
    fn default() -> Self {
        Self {
            tau_time: DEFAULT_TAU_TIME,
            tau_depth: DEFAULT_TAU_DEPTH,
        }
    }
}

/// Output of one estimator step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub position: f64,
    /// `dz / dt`
    pub velocity: f64,
    /// Forgetting weight in (0, 1]
    pub weight: f64,
    pub dt: f64,
    pub dz: f64,
}

/// Advance the estimator by one sample.
pub fn estimate(
    state: EstimatorState,
    sample: Sample,
    constants: &DecayConstants,
) -> Result<(EstimatorState, Estimate), EstimateError> {
    let dt = sample.timestamp - state.last_timestamp;
    if !dt.is_finite() || dt <= 0.0 {
        return Err(EstimateError::NonPositiveInterval { dt });
    }
    let dz = sample.position - state.last_position;
    let weight = (-dz.abs() / constants.tau_depth - dt / constants.tau_time).exp();

    let next = EstimatorState::new(sample.position, sample.timestamp);
    Ok((
        next,
        Estimate {
            position: sample.position,
            velocity: dz / dt,
            weight,
            dt,
            dz,
        },
    ))
}

/// Weight-blended velocity: `v_s = w * v_s_prev + (1 - w) * v`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SmoothedVelocity {
    value: Option<f64>,
}

impl SmoothedVelocity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend in a new estimate and return the smoothed velocity.
    /// The first estimate is taken as-is.
    pub fn update(&mut self, estimate: &Estimate) -> f64 {
        let blended = match self.value {
            Some(prev) => estimate.weight * prev + (1.0 - estimate.weight) * estimate.velocity,
            None => estimate.velocity,
        };
        self.value = Some(blended);
        blended
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worked_example() {
        let state = EstimatorState::new(10.0, 100.0);
        let sample = Sample {
            position: 11.0,
            timestamp: 102.0,
        };
        let (next, est) = estimate(state, sample, &DecayConstants::default()).unwrap();
        assert_eq!(est.velocity, 0.5);
        assert_eq!(est.dt, 2.0);
        assert_eq!(est.dz, 1.0);
        assert!((est.weight - (-50.4f64).exp()).abs() < 1e-30);
        assert_eq!(next, EstimatorState::new(11.0, 102.0));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let state = EstimatorState::new(1.0, 5.0);
        let sample = Sample {
            position: 2.0,
            timestamp: 5.0,
        };
        let err = estimate(state, sample, &DecayConstants::default()).unwrap_err();
        assert_eq!(err, EstimateError::NonPositiveInterval { dt: 0.0 });
    }

    #[test]
    fn test_non_finite_timestamp_rejected() {
        let state = EstimatorState::new(1.0, 5.0);
        let sample = Sample {
            position: 2.0,
            timestamp: f64::NAN,
        };
        assert!(estimate(state, sample, &DecayConstants::default()).is_err());
    }

    #[test]
    fn test_stationary_short_step_keeps_weight_high() {
        let state = EstimatorState::new(3.0, 0.0);
        let sample = Sample {
            position: 3.0,
            timestamp: 0.1,
        };
        let (_, est) = estimate(state, sample, &DecayConstants::default()).unwrap();
        assert_eq!(est.velocity, 0.0);
        assert!((est.weight - (-0.02f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_smoothing_blends_with_weight() {
        let mut smooth = SmoothedVelocity::new();
        let first = Estimate {
            position: 0.0,
            velocity: 1.0,
            weight: 0.5,
            dt: 0.1,
            dz: 0.1,
        };
        assert_eq!(smooth.update(&first), 1.0);
        let second = Estimate {
            velocity: 3.0,
            ..first
        };
        assert_eq!(smooth.update(&second), 2.0);
        smooth.reset();
        assert!(smooth.value().is_none());
    }
}
