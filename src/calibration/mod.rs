//! Delta geometry auto-calibration (G33).
//!
//! ```text
//!  Init ──▶ ProbePattern ──▶ Evaluate ──┬──▶ Converged
//!              ▲                        ├──▶ RolledBack      (metric got worse)
//!              │                        ├──▶ NoConvergence   (iteration cap)
//!              └── correct + re-home ◀──┘
//! ```
//!
//! Each pass probes the pattern, folds it into seven nominal heights and
//! scores it with the zero-plane standard deviation.  The correction is one
//! linear solve against a sensitivity matrix computed once per session.  A
//! probe failure anywhere aborts the run with the best geometry restored.

pub mod geometry;
pub mod pattern;
pub mod sensitivity;
pub mod session;

use heapless::Vec;
use log::{debug, info, warn};

use crate::app::events::StatusEvent;
use crate::app::ports::{EventSink, ProbeHost};
use crate::config::CalibrationSettings;
use crate::error::{CalibrationError, ProbeError};
use crate::kinematics::Kinematics;
use crate::probe::actuator::ProbeActuator;
use crate::probe::{ProbeEngine, RaisePolicy};

use geometry::GeometryParameters;
use pattern::{MAX_SITES, NPP, ProbePattern};
use sensitivity::Sensitivity;
use session::CalibrationSession;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Parsed G33 arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrateArgs {
    /// `P`: pattern density; `None` uses the configured default.
    pub points: Option<u8>,
    /// `R`: calibration radius override.
    pub radius: Option<f32>,
    /// `C`: stop once the std dev is at or below this.
    pub precision: f32,
    /// `F`: minimum number of iterations.
    pub force_iterations: u8,
    /// `V`: 0 dry run, 1 start/end settings, 2 settings every iteration,
    /// 3 also point heights.
    pub verbosity: u8,
    /// `E`: stow after every point.
    pub stow_after_each: bool,
    /// `O`: sites are probe positions rather than nozzle positions.
    pub probe_at_offset: bool,
    /// Cleared by `T`: no tower-angle correction.
    pub towers: bool,
    /// Cleared per axis by `X`/`Y`/`Z`: no sensorless tuning.
    pub tune_axes: [bool; 3],
}

impl Default for CalibrateArgs {
    fn default() -> Self {
        Self {
            points: None,
            radius: None,
            precision: 0.0,
            force_iterations: 0,
            verbosity: 1,
            stow_after_each: false,
            probe_at_offset: false,
            towers: true,
            tune_axes: [true; 3],
        }
    }
}

impl CalibrateArgs {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let fail = |msg| Err(CalibrationError::InvalidParameter(msg));
        if self.points.is_some_and(|p| p > 10) {
            return fail("?(P)oints is implausible (0 - 10).");
        }
        if !(self.precision >= 0.0) {
            return fail("?(C)alibration precision is implausible (>=0).");
        }
        if self.force_iterations > 30 {
            return fail("?(F)orce iteration is implausible (0 - 30).");
        }
        if self.verbosity > 3 {
            return fail("?(V)erbose level is implausible (0 - 3).");
        }
        if self.radius.is_some_and(|r| !(r > 0.0)) {
            return fail("?(R)adius is implausible.");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    /// P0: geometry normalised without probing.
    Normalised,
    DryRun { std_dev: f32 },
    Converged { std_dev: f32 },
    /// The metric stopped improving; best geometry restored.
    RolledBack { std_dev: f32 },
    /// Iteration cap reached; best geometry restored.
    NoConvergence { std_dev: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationReport {
    pub outcome: CalibrationOutcome,
    /// Geometry left published on the machine.
    pub geometry: GeometryParameters,
    pub iterations: u8,
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

pub struct Calibrator<K: Kinematics> {
    kinematics: K,
    settings: CalibrationSettings,
    radius: f32,
}

impl<K: Kinematics> Calibrator<K> {
    /// `radius` is the default calibration radius (overridden by `R`).
    pub fn new(kinematics: K, settings: CalibrationSettings, radius: f32) -> Self {
        Self { kinematics, settings, radius }
    }

    pub fn kinematics(&self) -> &K {
        &self.kinematics
    }

    /// Run one G33 session.  Invalid arguments and an unreachable radius are
    /// reported through `sink` and return before any motion.
    pub fn run<H: ProbeHost, A: ProbeActuator>(
        &self,
        engine: &mut ProbeEngine<'_, A>,
        host: &mut H,
        args: &CalibrateArgs,
        sink: &mut impl EventSink,
    ) -> Result<CalibrationReport, CalibrationError> {
        args.validate().inspect_err(|e| {
            if let CalibrationError::InvalidParameter(msg) = *e {
                sink.emit(&StatusEvent::Implausible(msg));
            }
        })?;

        let points = args.points.unwrap_or(self.settings.default_points);
        let radius = args.radius.unwrap_or(self.radius);
        let pattern = ProbePattern::new(points, args.towers, radius)?;

        let reachable = pattern
            .sites()
            .iter()
            .all(|s| engine.can_reach(&*host, s.x, s.y, args.probe_at_offset));
        if !reachable {
            sink.emit(&StatusEvent::Implausible("?(M665 B)ed radius is implausible."));
            return Err(CalibrationError::RadiusUnreachable);
        }

        info!(
            "CAL: G33 P{} R{:.1} C{:.3} F{} V{}{}",
            points,
            radius,
            args.precision,
            args.force_iterations,
            args.verbosity,
            if args.towers { "" } else { " T" }
        );
        let start = host.geometry();
        sink.emit(&StatusEvent::Checking { dry_run: args.verbosity == 0 });
        sink.emit(&StatusEvent::Settings(start));

        engine.set_tune_axes(args.tune_axes);
        let result = host
            .home()
            .map_err(CalibrationError::from)
            .and_then(|()| self.iterate(engine, host, &pattern, args, start, sink));
        engine.set_tune_axes([true; 3]);

        if let Err(e) = engine.stow(host) {
            warn!("CAL: stow after calibration failed: {}", e);
        }
        result
    }

    fn iterate<H: ProbeHost, A: ProbeActuator>(
        &self,
        engine: &mut ProbeEngine<'_, A>,
        host: &mut H,
        pattern: &ProbePattern,
        args: &CalibrateArgs,
        start: GeometryParameters,
        sink: &mut impl EventSink,
    ) -> Result<CalibrationReport, CalibrationError> {
        let dry_run = args.verbosity == 0;
        let report = |outcome, geometry, iterations| CalibrationReport { outcome, geometry, iterations };

        if pattern.points() == 0 {
            if dry_run {
                sink.emit(&StatusEvent::DryRun { std_dev: 0.0 });
                return Ok(report(CalibrationOutcome::DryRun { std_dev: 0.0 }, start, 0));
            }
            let mut g = start;
            g.normalise(false);
            host.apply_geometry(&g);
            info!("CAL: normalised {}", g);
            sink.emit(&StatusEvent::Settings(g));
            sink.emit(&StatusEvent::SaveHint);
            return Ok(report(CalibrationOutcome::Normalised, g, 0));
        }

        let sensitivity = if dry_run {
            None
        } else {
            Some(Sensitivity::compute(&self.kinematics, &start, pattern, self.settings.sensitivity_step)?)
        };
        let trims = pattern.points() >= 3 && args.towers;
        let raise = if args.stow_after_each { RaisePolicy::Stow } else { RaisePolicy::RaiseClearance };
        let mut session = CalibrationSession::new(start);

        loop {
            let n = session.begin_iteration();
            let z = match probe_pattern(engine, host, pattern, raise, args.probe_at_offset) {
                Ok(z) => z,
                Err(e) => {
                    let g = session.roll_back();
                    host.apply_geometry(&g);
                    warn!("CAL: probing failed in iteration {} ({}), geometry rolled back", n, e);
                    sink.emit(&StatusEvent::ProbingFailed);
                    sink.emit(&StatusEvent::CorrectManually);
                    return Err(CalibrationError::ProbingFailed(e));
                }
            };

            let std_dev = pattern.std_dev(&z);
            session.record(std_dev);
            debug!("CAL: iteration {} heights {:?} std dev {:.3}", n, z, std_dev);
            if args.verbosity == 3 || dry_run {
                sink.emit(&StatusEvent::PointHeights {
                    z,
                    towers: pattern.has_tower_results(),
                    opposites: pattern.has_opposite_results(),
                });
            }

            let Some(sensitivity) = sensitivity.as_ref() else {
                sink.emit(&StatusEvent::DryRun { std_dev });
                return Ok(report(CalibrationOutcome::DryRun { std_dev }, start, n));
            };

            let forced_done = n >= args.force_iterations;
            if std_dev <= args.precision && forced_done {
                let g = *session.current();
                info!("CAL: converged after {} iterations, std dev {:.3}", n, std_dev);
                sink.emit(&StatusEvent::CalibrationOk { std_dev });
                self.finish(&g, sink);
                return Ok(report(CalibrationOutcome::Converged { std_dev }, g, n));
            }

            if forced_done && session.previous_std_dev().is_some_and(|prev| std_dev >= prev) {
                let best = session.best_std_dev().unwrap_or(std_dev);
                let g = session.roll_back();
                warn!("CAL: std dev {:.3} did not improve, rolling back to {:.3}", std_dev, best);
                publish(host, &g)?;
                sink.emit(&StatusEvent::RollingBack);
                self.finish(&g, sink);
                return Ok(report(CalibrationOutcome::RolledBack { std_dev: best }, g, n));
            }

            if n >= self.settings.max_iterations {
                let best = session.best_std_dev().unwrap_or(std_dev);
                let g = session.roll_back();
                warn!("CAL: no convergence after {} iterations", n);
                publish(host, &g)?;
                sink.emit(&StatusEvent::NoConvergence { std_dev: best });
                sink.emit(&StatusEvent::Settings(g));
                return Ok(report(CalibrationOutcome::NoConvergence { std_dev: best }, g, n));
            }

            let active = pattern.active();
            let mut errors = [0.0f64; NPP + 1];
            for (e, &i) in errors.iter_mut().zip(active) {
                *e = f64::from(z[i]);
            }
            let delta = match sensitivity.solve(&errors[..active.len()], f64::from(self.settings.damping)) {
                Ok(d) => d,
                Err(e) => {
                    let g = session.roll_back();
                    publish(host, &g)?;
                    warn!("CAL: correction solve failed: {}", e);
                    return Err(e);
                }
            };
            let mut next = sensitivity.apply(session.current(), &delta);
            next.normalise(trims);
            session.advance(next);

            info!("CAL: iteration {} std dev {:.3} -> {}", n, std_dev, next);
            sink.emit(&StatusEvent::Iteration { n, std_dev });
            if args.verbosity > 1 {
                sink.emit(&StatusEvent::Settings(next));
            }
            publish(host, &next)?;
        }
    }

    /// End report for every non-dry run: final settings, then the save hint.
    fn finish(&self, g: &GeometryParameters, sink: &mut impl EventSink) {
        sink.emit(&StatusEvent::Settings(*g));
        sink.emit(&StatusEvent::SaveHint);
    }
}

/// Publish a geometry and re-establish a trusted zero with it.
fn publish<H: ProbeHost>(host: &mut H, g: &GeometryParameters) -> Result<(), CalibrationError> {
    host.apply_geometry(g);
    host.home()?;
    Ok(())
}

/// Probe every site of `pattern` and fold the readings into the nominal
/// heights.
pub fn probe_pattern<H: ProbeHost, A: ProbeActuator>(
    engine: &mut ProbeEngine<'_, A>,
    host: &mut H,
    pattern: &ProbePattern,
    raise: RaisePolicy,
    probe_relative: bool,
) -> Result<[f32; NPP + 1], ProbeError> {
    let mut readings: Vec<f32, MAX_SITES> = Vec::new();
    for site in pattern.sites() {
        let z = engine.probe_at_point(host, site.x, site.y, raise, probe_relative)?;
        // Patterns never exceed MAX_SITES.
        let _ = readings.push(z);
    }
    if pattern.points() >= 2 {
        let z = host.position()[2];
        host.move_to([0.0, 0.0, z], engine.settings().xy_speed)?;
    }
    Ok(pattern.reduce(&readings))
}
