//! Integration tests for `ProbeService` command handling: status lines,
//! argument validation, settings persistence and the grid/repeatability
//! runs, all against the mock machine.

use crate::mock_hw::{self, CollectSink, GridMesh, MockMachine};

use zprobe::adapters::settings::PostcardSettingsStore;
use zprobe::adapters::sim::SimMachine;
use zprobe::app::commands::MachineCommand;
use zprobe::app::events::StatusEvent;
use zprobe::app::ports::GeometryPort;
use zprobe::app::service::ProbeService;
use zprobe::calibration::CalibrateArgs;
use zprobe::calibration::geometry::GeometryParameters;
use zprobe::endstops::{EndstopDetector, EndstopId, EndstopInputs, TriggerState};
use zprobe::error::Error;
use zprobe::kinematics::DeltaKinematics;
use zprobe::probe::actuator::{FixedNone, ProbeActuator, ServoSwing};
use zprobe::probe::selftest::ProbeKind;

fn service<A: ProbeActuator>(d: &EndstopDetector, actuator: A) -> ProbeService<'_, A, DeltaKinematics> {
    ProbeService::from_config(d, actuator, DeltaKinematics::new(250.0, 140.0), &mock_hw::config()).unwrap()
}

struct Harness {
    store: PostcardSettingsStore,
    mesh: GridMesh,
    sink: CollectSink,
}

impl Harness {
    fn new() -> Self {
        Self { store: PostcardSettingsStore::new(), mesh: GridMesh::default(), sink: CollectSink::new() }
    }

    fn run<A: ProbeActuator>(
        &mut self,
        svc: &mut ProbeService<'_, A, DeltaKinematics>,
        hw: &mut MockMachine<'_>,
        cmd: MachineCommand,
    ) -> Result<(), Error> {
        svc.handle_command(cmd, hw, &mut self.store, &mut self.mesh, &mut self.sink)
    }
}

struct Levels(TriggerState);

impl EndstopInputs for Levels {
    fn read_raw(&mut self) -> TriggerState {
        self.0
    }
}

// ── Single point and repeatability ────────────────────────────

#[test]
fn g30_reports_the_bed_height() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.125).homed();
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    h.run(&mut svc, &mut hw, MachineCommand::G30 { x: 10.0, y: -5.5 }).unwrap();
    assert!(h.sink.contains_line("Bed X: 10.00 Y: -5.50 Z: 0.125"));
}

#[test]
fn g30_failure_is_reported_to_the_operator() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0).homed();
    hw.dead_after = Some(0);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    let err = h.run(&mut svc, &mut hw, MachineCommand::G30 { x: 0.0, y: 0.0 }).unwrap_err();
    assert!(matches!(err, Error::Probe(_)));
    assert!(h.sink.contains_line("Probing failed"));
}

#[test]
fn m48_on_a_steady_surface_has_zero_deviation() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.25).homed();
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    h.run(&mut svc, &mut hw, MachineCommand::M48 { samples: 5, x: Some(0.0), y: Some(0.0) }).unwrap();

    let stats = h.sink.events.iter().find_map(|e| match *e {
        StatusEvent::Repeatability { samples, mean, std_dev, min, max } => Some((samples, mean, std_dev, min, max)),
        _ => None,
    });
    assert_eq!(stats, Some((5, 0.25, 0.0, 0.25, 0.25)));
}

#[test]
fn m48_rejects_a_sample_count_out_of_range() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).homed();
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    let err = h.run(&mut svc, &mut hw, MachineCommand::M48 { samples: 3, x: None, y: None }).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(h.sink.contains_line("?Sample size not plausible (4-50)."));
    assert_eq!(hw.triggers, 0);
}

// ── Grid ──────────────────────────────────────────────────────

fn tilted(x: f32, _y: f32) -> f32 {
    x * 0.01
}

#[test]
fn g29_walks_a_serpentine_grid() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_tilt(tilted);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    h.run(&mut svc, &mut hw, MachineCommand::G29 { grid: 3 }).unwrap();

    assert_eq!(h.mesh.points.len(), 9);
    let order: Vec<(u8, u8)> = h.mesh.points.iter().map(|&(ix, iy, _)| (ix, iy)).collect();
    assert_eq!(order[..6], [(0, 0), (1, 0), (2, 0), (2, 1), (1, 1), (0, 1)]);

    let half = mock_hw::config().delta.calibration_radius * core::f32::consts::FRAC_1_SQRT_2;
    for &(ix, _, z) in &h.mesh.points {
        let x = -half + half * f32::from(ix);
        assert!((z - tilted(x, 0.0)).abs() < 1e-4, "ix {ix}: {z}");
    }
    assert_eq!(hw.homes, 1);
}

#[test]
fn g29_rejects_a_degenerate_grid() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    assert!(h.run(&mut svc, &mut hw, MachineCommand::G29 { grid: 1 }).is_err());
    assert!(h.sink.contains_line("?Probe points (X) is implausible (2-15)."));
    assert!(h.mesh.points.is_empty());
    assert_eq!(hw.homes, 0);
}

// ── Probe offset and settings ─────────────────────────────────

#[test]
fn m851_sets_and_reports_the_offset() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    h.run(&mut svc, &mut hw, MachineCommand::M851 { z_offset: Some(-1.25) }).unwrap();
    assert!(h.sink.contains_line("Probe Offset Z: -1.25"));

    assert!(h.run(&mut svc, &mut hw, MachineCommand::M851 { z_offset: Some(25.0) }).is_err());
    assert!(h.sink.contains_line("?Z out of range (-20 to 20)"));
    assert_eq!(svc.engine().z_offset(), -1.25);
}

#[test]
fn m500_then_m501_restores_geometry_and_offset() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();
    let tuned = GeometryParameters { height: 249.2, endstop_adj: [0.0, -0.25, -0.1], ..Default::default() };
    hw.geometry = tuned;

    h.run(&mut svc, &mut hw, MachineCommand::M851 { z_offset: Some(-0.8) }).unwrap();
    h.run(&mut svc, &mut hw, MachineCommand::M500).unwrap();
    assert!(h.sink.contains_line("Settings Stored"));
    assert_eq!(h.store.writes(), 1);

    hw.geometry = GeometryParameters::default();
    h.run(&mut svc, &mut hw, MachineCommand::M851 { z_offset: Some(0.0) }).unwrap();
    h.run(&mut svc, &mut hw, MachineCommand::M501).unwrap();

    assert!(h.sink.contains_line("Settings Loaded"));
    assert_eq!(hw.geometry(), tuned);
    assert_eq!(svc.engine().z_offset(), -0.8);
}

#[test]
fn m501_without_stored_settings_fails() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    let err = h.run(&mut svc, &mut hw, MachineCommand::M501).unwrap_err();
    assert_eq!(err, Error::Settings("not found"));
    assert!(!h.sink.contains_line("Settings Loaded"));
    assert!(hw.applied.is_empty());
}

// ── Servo and deploy/stow ─────────────────────────────────────

#[test]
fn m280_moves_and_reports_servos() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    h.run(&mut svc, &mut hw, MachineCommand::M280 { index: 2, angle: Some(45), sweep_ms: 0 }).unwrap();
    h.run(&mut svc, &mut hw, MachineCommand::M280 { index: 2, angle: None, sweep_ms: 0 }).unwrap();
    assert!(h.sink.events.contains(&StatusEvent::ServoAngle { index: 2, angle: 45 }));

    let err = h.run(&mut svc, &mut hw, MachineCommand::M280 { index: 2, angle: Some(200), sweep_ms: 0 });
    assert!(err.is_err());
    assert!(h.sink.contains_line("?(S)ervo angle is implausible (0 - 180)."));
    assert_eq!(hw.servos[2], Some(45));
}

#[test]
fn m401_and_m402_drive_the_servo_probe() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).homed();
    let servo = ServoSwing { index: 0, deploy_angle: 10, stow_angle: 90, settle_ms: 0 };
    let mut svc = service(&d, servo);
    let mut h = Harness::new();

    h.run(&mut svc, &mut hw, MachineCommand::M401).unwrap();
    assert!(svc.engine().is_deployed());
    assert_eq!(hw.servos[0], Some(10));

    h.run(&mut svc, &mut hw, MachineCommand::M402).unwrap();
    assert!(!svc.engine().is_deployed());
    assert_eq!(hw.servos[0], Some(90));
}

#[test]
fn m402_parks_the_nozzle_clear_of_the_bed() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).homed();
    hw.pos = [10.0, 0.0, 1.0];
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    h.run(&mut svc, &mut hw, MachineCommand::M402).unwrap();
    assert!(hw.pos[2] >= mock_hw::config().probe.clearance_between);
    assert_eq!(&hw.pos[..2], &[10.0, 0.0]);
}

// ── Calibration through the service ───────────────────────────

#[test]
fn g33_through_the_service_reports_ok() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d).with_surface(0.0);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    let cmd = MachineCommand::G33(CalibrateArgs { points: Some(4), ..CalibrateArgs::default() });
    h.run(&mut svc, &mut hw, cmd).unwrap();
    assert!(h.sink.contains_line("Calibration OK, std dev: 0.000"));
}

// ── Unexpected endstop hits ───────────────────────────────────

#[test]
fn stray_axis_hit_is_reported_after_the_command() {
    let d = mock_hw::detector();
    let mut hw = MockMachine::new(&d);
    let mut svc = service(&d, FixedNone);
    let mut h = Harness::new();

    d.poll(&mut Levels(TriggerState::EMPTY.with(EndstopId::XMax, true)));
    h.run(&mut svc, &mut hw, MachineCommand::M851 { z_offset: None }).unwrap();

    let hit = h.sink.events.iter().find_map(|e| match *e {
        StatusEvent::EndstopsHit(state) => Some(state),
        _ => None,
    });
    assert!(hit.is_some_and(|s| s.contains(EndstopId::XMax)));

    // Reported once.
    h.sink.events.clear();
    h.run(&mut svc, &mut hw, MachineCommand::M851 { z_offset: None }).unwrap();
    assert!(!h.sink.events.iter().any(|e| matches!(e, StatusEvent::EndstopsHit(_))));
}

// ── Self-test on the simulated delta ──────────────────────────

#[test]
fn m43s_classifies_a_short_press_as_a_pulse_probe() {
    let d = mock_hw::detector();
    let kinematics = DeltaKinematics::new(250.0, 140.0);
    let geometry = GeometryParameters::default();
    let mut sim = SimMachine::new(&d, kinematics, geometry, geometry, [0.0; 3]);
    sim.press_probe(5_000, 10);
    let mut svc = ProbeService::from_config(&d, FixedNone, kinematics, &mock_hw::config()).unwrap();
    let (mut store, mut mesh, mut sink) = (PostcardSettingsStore::new(), GridMesh::default(), CollectSink::new());

    svc.handle_command(MachineCommand::M43S, &mut sim, &mut store, &mut mesh, &mut sink).unwrap();

    assert!(sink.contains_line("Please trigger probe"));
    let kind = sink.events.iter().find_map(|e| match *e {
        StatusEvent::ProbeClassified(report) => Some(report.kind),
        _ => None,
    });
    assert!(matches!(kind, Some(ProbeKind::PulseProbe { width_ms }) if (9..=11).contains(&width_ms)));
}
