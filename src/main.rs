//! zprobe simulator: runs the probing core against a simulated delta.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  SimMachine         LogStatusSink   PostcardSettingsStore    │
//! │  (every ProbeHost   (EventSink)     (SettingsPort)           │
//! │   port)             RecordedMesh (MeshSink)                  │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │            ProbeService (pure logic)                   │  │
//! │  │  EndstopDetector · ProbeEngine · Calibrator            │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `zprobe-sim [config.json] [points]`.  The simulated machine is
//! built slightly off from the configured geometry; the session calibrates
//! it, stores the result and then exercises the single-point, repeatability
//! and grid commands.

#![deny(unused_must_use)]

use anyhow::{Result, anyhow, bail};
use log::{LevelFilter, info, warn};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use zprobe::adapters::log_sink::LogStatusSink;
use zprobe::adapters::settings::PostcardSettingsStore;
use zprobe::adapters::sim::{RecordedMesh, SimMachine};
use zprobe::app::commands::MachineCommand;
use zprobe::app::ports::{GeometryPort, TimePort};
use zprobe::app::service::ProbeService;
use zprobe::calibration::CalibrateArgs;
use zprobe::calibration::geometry::GeometryParameters;
use zprobe::config::{ActuatorConfig, MachineConfig};
use zprobe::endstops::EndstopDetector;
use zprobe::kinematics::DeltaKinematics;
use zprobe::probe::actuator::{AllenKeyDock, FixedNone, ProbeActuator, ServoSwing};

/// How far the simulated machine is built from its nominal geometry.
fn build_error(nominal: &GeometryParameters) -> GeometryParameters {
    GeometryParameters {
        height: nominal.height + 0.8,
        endstop_adj: [0.0, -0.35, -0.15],
        radius: nominal.radius + 0.6,
        tower_angle_trim: [0.25, -0.1, -0.15],
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    TermLogger::init(LevelFilter::Info, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    info!("╔══════════════════════════════════════╗");
    info!("║  zprobe simulator v{}             ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 1. Configuration ──────────────────────────────────────
    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str::<MachineConfig>(&text).map_err(|e| anyhow!("{}: {}", path, e))?
        }
        None => MachineConfig::default(),
    };
    config.validate().map_err(|e| anyhow!("config: {}", e))?;
    let points = match args.get(2) {
        Some(p) => Some(p.parse::<u8>()?),
        None => None,
    };

    // ── 2. Simulated machine ──────────────────────────────────
    let detector = EndstopDetector::new(&config.endstops);
    let kinematics = DeltaKinematics::new(config.delta.diagonal_rod, config.delta.printable_radius);
    let actual = build_error(&config.geometry);
    info!("Simulated machine: {}", actual);
    let mut machine = SimMachine::new(&detector, kinematics, config.geometry, actual, config.probe.offset);

    // ── 3. Probe service ──────────────────────────────────────
    match config.probe.actuator.clone() {
        ActuatorConfig::Fixed => session(&config, &detector, FixedNone, kinematics, &mut machine, points),
        ActuatorConfig::Servo { index, deploy_angle, stow_angle } => {
            let servo = ServoSwing { index, deploy_angle, stow_angle, settle_ms: config.probe.deploy_settle_ms };
            session(&config, &detector, servo, kinematics, &mut machine, points)
        }
        ActuatorConfig::AllenKey { deploy, stow } => {
            session(&config, &detector, AllenKeyDock { deploy, stow }, kinematics, &mut machine, points)
        }
        other => bail!("{:?} needs GPIO and cannot run in the simulator", other),
    }
}

fn session<A: ProbeActuator>(
    config: &MachineConfig,
    detector: &EndstopDetector,
    actuator: A,
    kinematics: DeltaKinematics,
    machine: &mut SimMachine<'_>,
    points: Option<u8>,
) -> Result<()> {
    let mut service = ProbeService::from_config(detector, actuator, kinematics, config)
        .map_err(|e| anyhow!("service: {}", e))?;
    let mut store = PostcardSettingsStore::new();
    let mut mesh = RecordedMesh::new();
    let mut sink = LogStatusSink::new();

    let script = [
        MachineCommand::M501,
        MachineCommand::G33(CalibrateArgs { points, precision: 0.01, ..CalibrateArgs::default() }),
        MachineCommand::M500,
        MachineCommand::G30 { x: 0.0, y: 0.0 },
        MachineCommand::M48 { samples: 10, x: Some(30.0), y: Some(-20.0) },
        MachineCommand::G29 { grid: 5 },
        MachineCommand::M851 { z_offset: None },
    ];

    info!("System ready. Running {} commands.", script.len());
    for cmd in script {
        info!("> {:?}", cmd);
        if let Err(e) = service.handle_command(cmd, machine, &mut store, &mut mesh, &mut sink) {
            warn!("{:?} failed: {}", cmd, e);
        }
    }

    info!(
        "Done: {} status lines, {} mesh points, {} homes, {} ms simulated",
        sink.emitted(),
        mesh.points.len(),
        machine.homes(),
        machine.now_ms()
    );
    info!("Firmware geometry: {}", machine.geometry());
    Ok(())
}
