//! Integration tests for the measurement engine: sample policies, quiet
//! window, failure handling and deploy/stow sequencing.

use crate::mock_hw::{self, MockMachine};

use zprobe::config::ProbeSettings;
use zprobe::endstops::Axis;
use zprobe::error::{MotionError, ProbeError};
use zprobe::probe::actuator::{FixedNone, ServoSwing};
use zprobe::probe::{ProbeEngine, ProbeState, RaisePolicy};

fn settings() -> ProbeSettings {
    mock_hw::config().probe
}

// ── Sample policies ───────────────────────────────────────────

#[test]
fn single_sample_reads_the_surface() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.25).homed();
    let mut engine = ProbeEngine::new(&d, FixedNone, ProbeSettings { samples: 1, ..settings() });

    let z = engine.probe_at_point(&mut hw, 10.0, -20.0, RaisePolicy::RaiseClearance, true).unwrap();
    assert_eq!(z, 0.25);
    assert_eq!(hw.triggers, 1, "fast pre-descent stops short of the bed");
    assert_eq!(engine.state(), ProbeState::Idle);
}

#[test]
fn double_probe_of_a_steady_surface_is_exact() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(-0.375).homed();
    let mut engine = ProbeEngine::new(&d, FixedNone, settings());

    let z = engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::RaiseClearance, true).unwrap();
    assert_eq!(z, -0.375);
    assert_eq!(hw.triggers, 2);
}

#[test]
fn double_probe_weights_the_slow_pass() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).with_jitter(&[0.5, 0.0]).homed();
    let mut engine = ProbeEngine::new(&d, FixedNone, settings());

    let z = engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::None, true).unwrap();
    assert!((z - 0.2).abs() < 1e-6, "got {z}");
}

#[test]
fn extra_samples_discard_the_outlier() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.2).with_jitter(&[0.0, 0.0, 1.0, 0.0]).homed();
    let s = ProbeSettings { samples: 3, extra_samples: 1, ..settings() };
    let mut engine = ProbeEngine::new(&d, FixedNone, s);

    let z = engine.probe_at_point(&mut hw, 5.0, 5.0, RaisePolicy::RaiseClearance, true).unwrap();
    assert!((z - 0.2).abs() < 1e-5, "got {z}");
    assert_eq!(hw.triggers, 4);
}

#[test]
fn multi_sample_approaches_fast_before_sampling_slow() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    let s = ProbeSettings { samples: 3, ..settings() };
    let mut engine = ProbeEngine::new(&d, FixedNone, s.clone());

    let z = engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::RaiseClearance, true).unwrap();
    assert!(z.abs() < 1e-6, "got {z}");
    assert_eq!(hw.triggers, 3, "fast approach stops short of the bed");
    assert_eq!(hw.descent_speeds.len(), 4);
    assert_eq!(hw.descent_speeds[0], s.fast_speed);
    assert!(hw.descent_speeds[1..].iter().all(|&v| v == s.slow_speed));
}

// ── Quiet window ──────────────────────────────────────────────

#[test]
fn heaters_fans_and_stall_are_muted_only_while_sampling() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    let mut s = settings();
    s.stall_axes.push(Axis::X).unwrap();
    s.stall_axes.push(Axis::Z).unwrap();
    s.stall_current_ma = 1200;
    let mut engine = ProbeEngine::new(&d, FixedNone, s);

    engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::RaiseClearance, true).unwrap();

    assert!(!hw.descent_quiet.is_empty());
    for q in &hw.descent_quiet {
        assert!(q.heaters_paused && q.fans_paused);
        assert_eq!(q.stall, [true, false, true]);
    }
    assert!(!hw.quiet.heaters_paused && !hw.quiet.fans_paused);
    assert_eq!(hw.quiet.stall, [false; 3]);
    assert_eq!(hw.current_ma, [800; 3]);
    assert_eq!(hw.stealth, [true; 3]);
}

#[test]
fn excluded_axes_keep_their_driver_settings() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    let mut s = settings();
    s.stall_axes.push(Axis::X).unwrap();
    s.stall_axes.push(Axis::Y).unwrap();
    let mut engine = ProbeEngine::new(&d, FixedNone, s);
    engine.set_tune_axes([true, false, true]);

    engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::None, true).unwrap();
    assert!(hw.descent_quiet.iter().all(|q| q.stall == [true, false, false]));
}

#[test]
fn kill_mid_descent_restores_quiet_state() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    hw.kill_after_polls = Some(100);
    let mut engine = ProbeEngine::new(&d, FixedNone, settings());

    let err = engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::None, true).unwrap_err();
    assert_eq!(err, ProbeError::Motion(MotionError::Killed));
    assert!(!hw.quiet.heaters_paused && !hw.quiet.fans_paused);
    assert!(!d.is_probe_enabled(), "probe input disarmed after abort");
}

// ── Failures ──────────────────────────────────────────────────

#[test]
fn dead_probe_reports_no_trigger() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    hw.dead_after = Some(0);
    let mut engine = ProbeEngine::new(&d, FixedNone, settings());

    let err = engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::None, true).unwrap_err();
    assert_eq!(err, ProbeError::NoTrigger);
    assert_eq!(engine.state(), ProbeState::Idle);
    assert!(!hw.quiet.heaters_paused);
}

#[test]
fn trigger_above_the_allowed_height_is_rejected() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(4.0).homed();
    let mut engine = ProbeEngine::new(&d, FixedNone, settings());

    let err = engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::None, true).unwrap_err();
    assert_eq!(err, ProbeError::TriggeredTooEarly);
}

#[test]
fn unreachable_point_fails_before_any_motion() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).homed();
    let mut engine = ProbeEngine::new(&d, FixedNone, settings());

    let err = engine.probe_at_point(&mut hw, 150.0, 0.0, RaisePolicy::None, true).unwrap_err();
    assert_eq!(err, ProbeError::Unreachable);
    assert_eq!(hw.polls, 0);
}

#[test]
fn probe_offset_is_applied_to_the_target_and_the_reading() {
    let d = mock_hw::detector();
    // The mock stops the nozzle at the surface; the tip sits 1.5 below it.
    let mut hw = MockMachine::new(&d).with_surface(1.0).homed();
    let s = ProbeSettings { offset: [10.0, 5.0, -1.5], ..settings() };
    let mut engine = ProbeEngine::new(&d, FixedNone, s);

    let z = engine.probe_at_point(&mut hw, 30.0, 30.0, RaisePolicy::None, true).unwrap();
    assert_eq!((hw.pos[0], hw.pos[1]), (20.0, 25.0));
    assert_eq!(z, -0.5);
}

// ── Deploy / stow ─────────────────────────────────────────────

#[test]
fn servo_probe_deploys_then_stows_on_request() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    let servo = ServoSwing { index: 0, deploy_angle: 10, stow_angle: 90, settle_ms: 0 };
    let mut engine = ProbeEngine::new(&d, servo, settings());
    assert!(!engine.is_deployed());

    engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::RaiseClearance, true).unwrap();
    assert!(engine.is_deployed());
    assert_eq!(hw.servos[0], Some(10));

    engine.probe_at_point(&mut hw, 20.0, 0.0, RaisePolicy::Stow, true).unwrap();
    assert!(!engine.is_deployed());
    assert_eq!(hw.servos[0], Some(90));
    assert!(hw.pos[2] >= settings().clearance_deploy, "stow happens at deploy clearance");
}

#[test]
fn failed_measurement_stows_a_deployable_probe() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    hw.dead_after = Some(0);
    let servo = ServoSwing { index: 1, deploy_angle: 10, stow_angle: 90, settle_ms: 0 };
    let mut engine = ProbeEngine::new(&d, servo, settings());

    assert!(engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::None, true).is_err());
    assert!(!engine.is_deployed());
    assert_eq!(hw.servos[1], Some(90));
}

#[test]
fn fixed_probe_stays_deployed_through_failure_and_stow() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    hw.dead_after = Some(0);
    let s = ProbeSettings { pause_for_operator: true, ..settings() };
    let mut engine = ProbeEngine::new(&d, FixedNone, s);
    assert!(engine.is_deployed());

    assert!(engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::None, true).is_err());
    assert!(engine.is_deployed());
    engine.stow(&mut hw).unwrap();
    assert!(engine.is_deployed());
    assert!(hw.prompts.is_empty(), "nothing to deploy or stow");
}

#[test]
fn operator_is_asked_before_deploy_and_stow() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    let servo = ServoSwing { index: 0, deploy_angle: 10, stow_angle: 90, settle_ms: 0 };
    let mut engine = ProbeEngine::new(&d, servo, ProbeSettings { pause_for_operator: true, ..settings() });

    engine.probe_at_point(&mut hw, 0.0, 0.0, RaisePolicy::Stow, true).unwrap();
    assert_eq!(hw.prompts, vec!["Deploy Z-Probe", "Stow Z-Probe"]);
}
