//! Integration tests for G33: stopping rules, rollback and failure
//! handling against the mock machine, plus an end-to-end run on the
//! simulated delta.

use crate::mock_hw::{self, CollectSink, MockMachine};

use zprobe::adapters::sim::SimMachine;
use zprobe::app::events::StatusEvent;
use zprobe::app::ports::GeometryPort;
use zprobe::calibration::geometry::GeometryParameters;
use zprobe::calibration::{CalibrateArgs, CalibrationOutcome, Calibrator};
use zprobe::config::CalibrationSettings;
use zprobe::error::{CalibrationError, ProbeError};
use zprobe::kinematics::DeltaKinematics;
use zprobe::probe::ProbeEngine;
use zprobe::probe::actuator::FixedNone;

fn calibrator() -> Calibrator<DeltaKinematics> {
    Calibrator::new(DeltaKinematics::new(250.0, 140.0), CalibrationSettings::default(), 100.0)
}

fn args(points: u8) -> CalibrateArgs {
    CalibrateArgs { points: Some(points), ..CalibrateArgs::default() }
}

// ── Stopping rules ────────────────────────────────────────────

#[test]
fn flat_machine_is_ok_on_the_first_pass() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();

    let report = calibrator().run(&mut engine, &mut hw, &args(2), &mut sink).unwrap();

    assert_eq!(report.outcome, CalibrationOutcome::Converged { std_dev: 0.0 });
    assert_eq!(report.iterations, 1);
    assert!(sink.contains_line("Checking... AC"));
    assert!(sink.contains_line("Calibration OK, std dev: 0.000"));
    assert!(sink.contains_line("Save with M500"));
    assert!(hw.applied.is_empty());
}

#[test]
fn height_error_is_corrected_and_published() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_pass_heights(&[-0.4, 0.0]);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();

    let report = calibrator().run(&mut engine, &mut hw, &args(1), &mut sink).unwrap();

    assert_eq!(report.outcome, CalibrationOutcome::Converged { std_dev: 0.0 });
    assert_eq!(report.iterations, 2);
    assert!((report.geometry.height - 250.4).abs() < 0.01, "{}", report.geometry);
    assert_eq!(hw.geometry(), report.geometry);
    assert_eq!(hw.applied.len(), 1);
    assert_eq!(hw.homes, 2, "initial home plus one after publishing");
    assert!(sink.contains_line("Iteration : 01 std dev: 0.400"));
}

#[test]
fn default_verbosity_reports_start_and_end_settings() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_pass_heights(&[-0.4, 0.0]);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();
    assert_eq!(args(1).verbosity, 1);

    let report = calibrator().run(&mut engine, &mut hw, &args(1), &mut sink).unwrap();

    let settings: Vec<GeometryParameters> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            StatusEvent::Settings(g) => Some(*g),
            _ => None,
        })
        .collect();
    assert_eq!(settings.len(), 2, "start and end only");
    assert_eq!(settings[0], GeometryParameters::default());
    assert_eq!(settings[1], report.geometry);
}

#[test]
fn forced_iterations_keep_going_after_a_perfect_pass() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();
    let a = CalibrateArgs { force_iterations: 2, ..args(1) };

    let report = calibrator().run(&mut engine, &mut hw, &a, &mut sink).unwrap();
    assert_eq!(report.outcome, CalibrationOutcome::Converged { std_dev: 0.0 });
    assert_eq!(report.iterations, 2);
}

#[test]
fn worse_metric_rolls_back_to_the_best_geometry() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_pass_heights(&[0.5, 0.1, 0.3]);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();

    let report = calibrator().run(&mut engine, &mut hw, &args(1), &mut sink).unwrap();

    assert_eq!(report.outcome, CalibrationOutcome::RolledBack { std_dev: 0.1 });
    assert_eq!(report.iterations, 3);
    let first = hw.applied[0];
    assert!((first.height - 249.5).abs() < 0.01);
    assert_eq!(report.geometry, first);
    assert_eq!(hw.geometry(), first);
    assert_eq!(hw.homes, 4);
    assert!(sink.events.contains(&StatusEvent::RollingBack));
}

#[test]
fn iteration_cap_restores_the_best_and_reports_it() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_pass_heights(&[0.5, 0.4, 0.3, 0.2]);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();
    let settings = CalibrationSettings { max_iterations: 3, ..CalibrationSettings::default() };
    let cal = Calibrator::new(DeltaKinematics::new(250.0, 140.0), settings, 100.0);

    let report = cal.run(&mut engine, &mut hw, &args(1), &mut sink).unwrap();

    assert_eq!(report.outcome, CalibrationOutcome::NoConvergence { std_dev: 0.3 });
    assert_eq!(report.iterations, 3);
    assert_eq!(report.geometry, hw.applied[1]);
    assert!(sink.contains_line("No convergence std dev: 0.300"));
}

// ── Dry run and normalise-only ────────────────────────────────

#[test]
fn dry_run_reports_without_changing_geometry() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.2);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();
    let a = CalibrateArgs { verbosity: 0, ..args(1) };

    let report = calibrator().run(&mut engine, &mut hw, &a, &mut sink).unwrap();

    assert_eq!(report.outcome, CalibrationOutcome::DryRun { std_dev: 0.2 });
    assert!(sink.contains_line("Checking... AC (DRY-RUN)"));
    assert!(sink.contains_line("End DRY-RUN std dev: 0.200"));
    assert!(sink.events.iter().any(|e| matches!(e, StatusEvent::PointHeights { .. })));
    assert!(hw.applied.is_empty());
}

#[test]
fn p0_only_normalises_the_endstops() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    hw.geometry.endstop_adj = [-0.2, 0.1, 0.0];
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();

    let report = calibrator().run(&mut engine, &mut hw, &args(0), &mut sink).unwrap();

    assert_eq!(report.outcome, CalibrationOutcome::Normalised);
    let g = hw.geometry();
    assert!((g.height - 249.9).abs() < 1e-4);
    let expected = [-0.3, 0.0, -0.1];
    for (a, e) in g.endstop_adj.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6);
    }
    assert_eq!(hw.triggers, 0);
    assert!(sink.contains_line("Save with M500"));
}

// ── Rejections and failures ───────────────────────────────────

#[test]
fn implausible_arguments_are_rejected_before_motion() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();

    let err = calibrator().run(&mut engine, &mut hw, &args(11), &mut sink).unwrap_err();
    assert!(matches!(err, CalibrationError::InvalidParameter(_)));
    assert!(sink.contains_line("?(P)oints is implausible (0 - 10)."));
    assert_eq!(hw.homes, 0);
}

#[test]
fn unreachable_radius_is_rejected_before_motion() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();
    let a = CalibrateArgs { radius: Some(150.0), ..args(2) };

    let err = calibrator().run(&mut engine, &mut hw, &a, &mut sink).unwrap_err();
    assert_eq!(err, CalibrationError::RadiusUnreachable);
    assert!(sink.contains_line("?(M665 B)ed radius is implausible."));
    assert_eq!(hw.homes, 0);
}

#[test]
fn probe_failure_rolls_back_and_asks_for_manual_correction() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.3);
    // P2 is four sites of two samples each: the probe dies in pass two.
    hw.dead_after = Some(8);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();

    let err = calibrator().run(&mut engine, &mut hw, &args(2), &mut sink).unwrap_err();

    assert_eq!(err, CalibrationError::ProbingFailed(ProbeError::NoTrigger));
    assert_eq!(hw.geometry(), GeometryParameters::default());
    assert_eq!(hw.homes, 2, "rollback is not followed by a home");
    assert!(sink.contains_line("Probing failed"));
    assert!(sink.contains_line("Correct delta settings with M665 and M666"));
}

// ── End to end on the simulated delta ─────────────────────────

#[test]
fn simulated_delta_endstop_errors_are_found() {
    let d = mock_hw::detector();
    let kinematics = DeltaKinematics::new(250.0, 140.0);
    let firmware = GeometryParameters::default();
    let actual = GeometryParameters { height: 250.5, endstop_adj: [0.0, -0.3, -0.1], ..firmware };
    let mut sim = SimMachine::new(&d, kinematics, firmware, actual, [0.0; 3]);
    let mut engine = ProbeEngine::new(&d, FixedNone, mock_hw::config().probe);
    let mut sink = CollectSink::new();
    let cal = Calibrator::new(kinematics, CalibrationSettings::default(), 100.0);
    let a = CalibrateArgs { precision: 0.02, ..args(2) };

    let report = cal.run(&mut engine, &mut sim, &a, &mut sink).unwrap();

    let std_dev = match report.outcome {
        CalibrationOutcome::Converged { std_dev } | CalibrationOutcome::RolledBack { std_dev } => std_dev,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert!(std_dev <= 0.02, "std dev {std_dev}");
    let g = sim.geometry();
    let diff = |a: &GeometryParameters, i: usize| a.endstop_adj[i] - a.endstop_adj[0];
    for i in 1..3 {
        assert!((diff(&g, i) - diff(&actual, i)).abs() < 0.05, "{g}");
    }
}
