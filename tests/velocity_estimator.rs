//! Velocity Estimator Tests
//!
//! Drives the estimator through realistic winch motion: steady paying out,
//! a stop, a long pause and a bad clock step.

use dl20_logger::encoder::{estimate, DecayConstants, EstimateError, EstimatorState, Sample, SmoothedVelocity};

fn run(samples: &[(f64, f64)], constants: &DecayConstants) -> Vec<Result<f64, EstimateError>> {
    let (z0, t0) = samples[0];
    let mut state = EstimatorState::new(z0, t0);
    samples[1..]
        .iter()
        .map(|&(position, timestamp)| {
            estimate(state, Sample { position, timestamp }, constants).map(|(next, est)| {
                state = next;
                est.velocity
            })
        })
        .collect()
}

#[test]
fn worked_example_from_the_design() {
    let state = EstimatorState::new(10.0, 100.0);
    let (next, est) = estimate(
        state,
        Sample {
            position: 11.0,
            timestamp: 102.0,
        },
        &DecayConstants::default(),
    )
    .unwrap();
    assert_eq!(est.dz, 1.0);
    assert_eq!(est.dt, 2.0);
    assert_eq!(est.velocity, 0.5);
    // 1/0.02 + 2/5 = 50.4
    assert!((est.weight - (-50.4f64).exp()).abs() < 1e-30);
    assert_eq!(next, EstimatorState::new(11.0, 102.0));
}

#[test]
fn steady_descent_reports_winch_speed() {
    let samples: Vec<(f64, f64)> = (0..50).map(|i| (i as f64 * 0.08, i as f64 * 0.1)).collect();
    for v in run(&samples, &DecayConstants::default()) {
        assert!((v.unwrap() - 0.8).abs() < 1e-9);
    }
}

#[test]
fn weight_falls_after_a_long_pause() {
    let constants = DecayConstants::default();
    let state = EstimatorState::new(5.0, 0.0);
    let (_, quick) = estimate(state, Sample { position: 5.0, timestamp: 0.1 }, &constants).unwrap();
    let (_, slow) = estimate(state, Sample { position: 5.0, timestamp: 30.0 }, &constants).unwrap();
    assert!(quick.weight > 0.95);
    assert!(slow.weight < 0.01);
    assert_eq!(slow.velocity, 0.0);
}

#[test]
fn clock_step_backwards_is_rejected_and_recoverable() {
    let samples = [(0.0, 1.0), (0.1, 1.1), (0.2, 1.05), (0.3, 1.3)];
    let results = run(&samples, &DecayConstants::default());
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(EstimateError::NonPositiveInterval { .. })
    ));
    // State was not advanced by the rejected sample: (0.1, 1.1) -> (0.3, 1.3)
    assert!((results[2].unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn smoothing_holds_velocity_through_a_small_jitter() {
    let constants = DecayConstants {
        tau_time: 5.0,
        tau_depth: 0.5,
    };
    let mut smoothed = SmoothedVelocity::new();
    let mut state = EstimatorState::new(0.0, 0.0);
    let mut last = 0.0;
    for (i, position) in [0.01, 0.02, 0.03, 0.04, 0.06, 0.06, 0.07].into_iter().enumerate() {
        let sample = Sample {
            position,
            timestamp: (i + 1) as f64 * 0.1,
        };
        let (next, est) = estimate(state, sample, &constants).unwrap();
        state = next;
        last = smoothed.update(&est);
    }
    // Raw velocities jump between 0.0 and 0.2; the blend stays in between
    assert!(last > 0.0 && last < 0.2, "smoothed velocity {last}");
}
