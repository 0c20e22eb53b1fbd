//! Probe service: the hexagonal core.
//!
//! [`ProbeService`] owns the measurement engine and the calibration solver
//! and turns [`MachineCommand`]s into port calls.  All I/O flows through
//! port traits injected at call sites, so the whole service runs against
//! mock adapters in tests.
//!
//! ```text
//!  MachineCommand ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                     │       ProbeService        │ ──▶ MeshSink
//!      ProbeHost ◀────│  ProbeEngine · Calibrator │ ◀─▶ SettingsPort
//!                     └──────────────────────────┘
//! ```

use core::f32::consts::FRAC_1_SQRT_2;

use heapless::Vec;
use log::{info, warn};

use crate::calibration::{CalibrateArgs, Calibrator};
use crate::config::{MachineConfig, PersistedSettings};
use crate::endstops::EndstopDetector;
use crate::error::{Error, Result};
use crate::kinematics::Kinematics;
use crate::probe::actuator::ProbeActuator;
use crate::probe::selftest::run_self_test;
use crate::probe::{ProbeEngine, RaisePolicy};

use super::commands::MachineCommand;
use super::events::StatusEvent;
use super::ports::{EventSink, MeshSink, ProbeHost, SettingsPort};

/// Largest M48 run.
pub const MAX_REPEATABILITY_SAMPLES: usize = 50;
/// Largest G29 grid side.
pub const MAX_GRID: u8 = 15;

// ───────────────────────────────────────────────────────────────
// ProbeService
// ───────────────────────────────────────────────────────────────

pub struct ProbeService<'d, A: ProbeActuator, K: Kinematics> {
    engine: ProbeEngine<'d, A>,
    calibrator: Calibrator<K>,
    /// Radius of the circle the G29 grid is inscribed in.
    grid_radius: f32,
}

impl<'d, A: ProbeActuator, K: Kinematics> ProbeService<'d, A, K> {
    pub fn new(engine: ProbeEngine<'d, A>, calibrator: Calibrator<K>, grid_radius: f32) -> Self {
        Self { engine, calibrator, grid_radius }
    }

    /// Wire the engine and solver from one validated configuration.
    pub fn from_config(
        detector: &'d EndstopDetector,
        actuator: A,
        kinematics: K,
        config: &MachineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let engine = ProbeEngine::new(detector, actuator, config.probe.clone());
        let radius = config.delta.calibration_radius;
        let calibrator = Calibrator::new(kinematics, config.calibration.clone(), radius);
        info!("PROBE: service ready, calibration radius {:.1}", radius);
        Ok(Self::new(engine, calibrator, radius))
    }

    pub fn engine(&self) -> &ProbeEngine<'d, A> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ProbeEngine<'d, A> {
        &mut self.engine
    }

    pub fn calibrator(&self) -> &Calibrator<K> {
        &self.calibrator
    }

    // ── Command handling ──────────────────────────────────────

    /// Run one command to completion.  Operator-visible outcomes go to
    /// `sink`; the returned error is for the dispatcher.
    pub fn handle_command<H: ProbeHost>(
        &mut self,
        cmd: MachineCommand,
        host: &mut H,
        store: &mut impl SettingsPort,
        mesh: &mut impl MeshSink,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let result = self.dispatch(cmd, host, store, mesh, sink);
        if let Some(hits) = self.engine.detector().report_state() {
            warn!("ENDSTOPS: unexpected hit during {:?}", cmd);
            sink.emit(&StatusEvent::EndstopsHit(hits));
        }
        result
    }

    fn dispatch<H: ProbeHost>(
        &mut self,
        cmd: MachineCommand,
        host: &mut H,
        store: &mut impl SettingsPort,
        mesh: &mut impl MeshSink,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        match cmd {
            MachineCommand::G29 { grid } => self.probe_grid(grid, host, mesh, sink),
            MachineCommand::G30 { x, y } => {
                let z = self.probe_or_report(host, x, y, RaisePolicy::Stow, sink)?;
                sink.emit(&StatusEvent::BedHeight { x, y, z });
                Ok(())
            }
            MachineCommand::G33(args) => self.calibrate(&args, host, sink),
            MachineCommand::M48 { samples, x, y } => self.repeatability(samples, x, y, host, sink),
            MachineCommand::M401 => Ok(self.engine.deploy(host)?),
            MachineCommand::M402 => Ok(self.engine.stow_and_park(host)?),
            MachineCommand::M280 { index, angle, sweep_ms } => {
                match angle {
                    None => {
                        if let Some(angle) = host.servo_angle(index) {
                            sink.emit(&StatusEvent::ServoAngle { index, angle });
                        }
                    }
                    Some(angle) if angle > 180 => {
                        sink.emit(&StatusEvent::Implausible("?(S)ervo angle is implausible (0 - 180)."));
                        return Err(Error::Config("servo angle out of range"));
                    }
                    Some(angle) if sweep_ms > 0 => host.sweep_servo(index, angle, sweep_ms)?,
                    Some(angle) => host.set_servo_angle(index, angle)?,
                }
                Ok(())
            }
            MachineCommand::M43S => {
                self.engine.stow(host)?;
                let detector = self.engine.detector();
                let report = run_self_test(host, self.engine.actuator_mut(), detector, sink)?;
                info!("PROBE: self-test {:?}", report);
                Ok(())
            }
            MachineCommand::M851 { z_offset } => {
                if let Some(z) = z_offset {
                    if !(-20.0..=20.0).contains(&z) {
                        sink.emit(&StatusEvent::Implausible("?Z out of range (-20 to 20)"));
                        return Err(Error::Config("probe z offset out of range"));
                    }
                    self.engine.set_z_offset(z);
                }
                sink.emit(&StatusEvent::ProbeOffset(self.engine.z_offset()));
                Ok(())
            }
            MachineCommand::M500 => {
                let settings = PersistedSettings {
                    geometry: host.geometry(),
                    probe_z_offset: self.engine.z_offset(),
                };
                store.save(&settings)?;
                info!("SETTINGS: stored {}", settings.geometry);
                sink.emit(&StatusEvent::SettingsStored);
                Ok(())
            }
            MachineCommand::M501 => {
                let settings = store.load()?;
                settings.validate()?;
                host.apply_geometry(&settings.geometry);
                self.engine.set_z_offset(settings.probe_z_offset);
                info!("SETTINGS: loaded {}", settings.geometry);
                sink.emit(&StatusEvent::SettingsLoaded);
                Ok(())
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────

    fn calibrate<H: ProbeHost>(
        &mut self,
        args: &CalibrateArgs,
        host: &mut H,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let report = self.calibrator.run(&mut self.engine, host, args, sink)?;
        info!("CAL: {:?} after {} iterations", report.outcome, report.iterations);
        Ok(())
    }

    fn probe_grid<H: ProbeHost>(
        &mut self,
        grid: u8,
        host: &mut H,
        mesh: &mut impl MeshSink,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        if !(2..=MAX_GRID).contains(&grid) {
            sink.emit(&StatusEvent::Implausible("?Probe points (X) is implausible (2-15)."));
            return Err(Error::Config("grid size out of range"));
        }
        let half = self.grid_radius * FRAC_1_SQRT_2;
        let pitch = 2.0 * half / f32::from(grid - 1);
        let last = u16::from(grid) * u16::from(grid) - 1;

        host.home()?;
        let mut visited = 0u16;
        for iy in 0..grid {
            for k in 0..grid {
                // Serpentine: odd rows run right to left.
                let ix = if iy % 2 == 0 { k } else { grid - 1 - k };
                let x = -half + pitch * f32::from(ix);
                let y = -half + pitch * f32::from(iy);
                let raise = if visited == last { RaisePolicy::Stow } else { RaisePolicy::RaiseClearance };
                visited += 1;

                if !self.engine.can_reach(&*host, x, y, true) {
                    warn!("G29: skipping unreachable ({:.1}, {:.1})", x, y);
                    continue;
                }
                let z = self.probe_or_report(host, x, y, raise, sink)?;
                mesh.record(ix, iy, z);
                sink.emit(&StatusEvent::BedHeight { x, y, z });
            }
        }
        // The last site may have been skipped.
        self.engine.stow(host)?;
        Ok(())
    }

    fn repeatability<H: ProbeHost>(
        &mut self,
        samples: u8,
        x: Option<f32>,
        y: Option<f32>,
        host: &mut H,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        if !(4..=MAX_REPEATABILITY_SAMPLES).contains(&usize::from(samples)) {
            sink.emit(&StatusEvent::Implausible("?Sample size not plausible (4-50)."));
            return Err(Error::Config("sample count out of range"));
        }
        let [px, py, _] = host.position();
        let (x, y) = (x.unwrap_or(px), y.unwrap_or(py));

        let mut zs: Vec<f32, MAX_REPEATABILITY_SAMPLES> = Vec::new();
        for k in 0..samples {
            let raise = if k + 1 == samples { RaisePolicy::Stow } else { RaisePolicy::RaiseClearance };
            let z = self.probe_or_report(host, x, y, raise, sink)?;
            // Bounded by the check above.
            let _ = zs.push(z);
        }

        let n = zs.len() as f32;
        let mean = zs.iter().sum::<f32>() / n;
        let var = zs.iter().map(|z| (z - mean) * (z - mean)).sum::<f32>() / n;
        let min = zs.iter().copied().fold(f32::INFINITY, f32::min);
        let max = zs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        sink.emit(&StatusEvent::Repeatability { samples, mean, std_dev: var.sqrt(), min, max });
        Ok(())
    }

    fn probe_or_report<H: ProbeHost>(
        &mut self,
        host: &mut H,
        x: f32,
        y: f32,
        raise: RaisePolicy,
        sink: &mut impl EventSink,
    ) -> Result<f32> {
        self.engine
            .probe_at_point(host, x, y, raise, true)
            .inspect_err(|_| sink.emit(&StatusEvent::ProbingFailed))
            .map_err(Error::from)
    }
}
