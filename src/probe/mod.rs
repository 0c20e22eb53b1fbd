//! Probe measurement engine.
//!
//! Turns a mechanical/electrical trigger into one trustworthy Z value at an
//! XY location, or a definitive failure.
//!
//! ```text
//!  Idle ──▶ Deploying ──▶ Sampling(k) ──▶ Triggered ──▶ StowOrHold ──▶ Idle
//!                │              │
//!                └──────────────┴──▶ Failed ──▶ (stow attempt) ──▶ Idle
//! ```
//!
//! Aggregation by configured sample count N:
//!
//! | N   | Passes                          | Result                          |
//! |-----|---------------------------------|---------------------------------|
//! | 1   | (fast pre-descent) + slow       | slow Z                          |
//! | 2   | fast, raise, slow               | (3·slow + 2·fast) / 5           |
//! | ≥ 3 | N + E slow passes with raises   | mean of the N closest to median |

pub mod actuator;
pub mod quiet;
pub mod selftest;

use heapless::Vec;
use log::{debug, error, info, warn};

use crate::app::ports::{MoveStatus, ProbeHost};
use crate::config::{MAX_PROBE_SAMPLES, ProbeSettings};
use crate::endstops::EndstopDetector;
use crate::error::{ActuatorError, ProbeError};
use actuator::{ActuatorKind, ProbeActuator};
use quiet::ProbeWindow;

/// Extra height over the deploy clearance above which a single probe first
/// descends at the fast speed.
const FAST_DESCENT_MARGIN: f32 = 5.0;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeState {
    Idle,
    Deploying,
    Sampling(u8),
    Triggered,
    Failed,
    StowOrHold,
}

/// Outcome of one physical descent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Trigger seen; nozzle Z at the stop.
    Triggered(f32),
    /// Reached the low point without a validated trigger.
    NoTrigger,
    /// Fired above the allowed height: jammed or spurious.
    TriggeredTooEarly,
}

/// One physical measurement attempt.  Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    pub outcome: SampleOutcome,
    /// mm/s
    pub feedrate: f32,
    pub timestamp_ms: u64,
}

impl ProbeSample {
    pub fn z(&self) -> Result<f32, ProbeError> {
        match self.outcome {
            SampleOutcome::Triggered(z) => Ok(z),
            SampleOutcome::NoTrigger => Err(ProbeError::NoTrigger),
            SampleOutcome::TriggeredTooEarly => Err(ProbeError::TriggeredTooEarly),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Single,
    DoubleWeighted,
    TrimmedMean { kept: u8, discarded: u8 },
}

/// Reduction of 1..N samples at one XY into a single nozzle Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub z: f32,
    pub aggregation: Aggregation,
    pub samples: u8,
}

/// What to do after a point has been measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaisePolicy {
    None,
    RaiseClearance,
    BigRaise,
    Stow,
}

// ---------------------------------------------------------------------------
// Aggregation helpers
// ---------------------------------------------------------------------------

/// Double-probe weighting, `(3·slow + 2·fast) / 5`, written so identical
/// inputs come back bit-exact.
pub fn weighted_double(fast: f32, slow: f32) -> f32 {
    slow + (fast - slow) * 0.4
}

/// Sort, take the median, drop the `discard` samples farthest from it and
/// average the rest.
pub fn trimmed_mean(samples: &mut [f32], discard: usize) -> Option<f32> {
    if samples.is_empty() || discard >= samples.len() {
        return None;
    }
    samples.sort_by(f32::total_cmp);
    let n = samples.len();
    let median = if n % 2 == 1 {
        samples[n / 2]
    } else {
        (samples[n / 2 - 1] + samples[n / 2]) / 2.0
    };
    samples.sort_by(|a, b| (a - median).abs().total_cmp(&(b - median).abs()));
    let kept = &samples[..n - discard];
    Some(kept.iter().sum::<f32>() / kept.len() as f32)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Not reentrant: the command layer runs one probe call at a time.
pub struct ProbeEngine<'d, A: ProbeActuator> {
    detector: &'d EndstopDetector,
    actuator: A,
    settings: ProbeSettings,
    state: ProbeState,
    deployed: bool,
    tune_axes: [bool; 3],
}

impl<'d, A: ProbeActuator> ProbeEngine<'d, A> {
    pub fn new(detector: &'d EndstopDetector, actuator: A, settings: ProbeSettings) -> Self {
        let deployed = actuator.kind() == ActuatorKind::Fixed;
        Self {
            detector,
            actuator,
            settings,
            state: ProbeState::Idle,
            deployed,
            tune_axes: [true; 3],
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn detector(&self) -> &'d EndstopDetector {
        self.detector
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    pub fn z_offset(&self) -> f32 {
        self.settings.offset[2]
    }

    pub fn set_z_offset(&mut self, z: f32) {
        info!("PROBE: Z offset {:.3} -> {:.3}", self.settings.offset[2], z);
        self.settings.offset[2] = z;
    }

    /// Exclude axes from sensorless tuning (G33 X/Y/Z).
    pub fn set_tune_axes(&mut self, tune: [bool; 3]) {
        self.tune_axes = tune;
    }

    /// Whether a probe-relative point can be measured.
    pub fn can_reach<H: ProbeHost>(&self, host: &H, x: f32, y: f32, probe_relative: bool) -> bool {
        if probe_relative {
            let [ox, oy, _] = self.settings.offset;
            host.is_reachable(x, y) && host.is_reachable(x - ox, y - oy)
        } else {
            host.is_reachable(x, y)
        }
    }

    // ── Deploy / stow ─────────────────────────────────────────

    pub fn deploy<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ProbeError> {
        self.set_deployed(host, true)
    }

    pub fn stow<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ProbeError> {
        self.set_deployed(host, false)
    }

    /// Stow, then leave the tip at least the between-points clearance above
    /// the bed.
    pub fn stow_and_park<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ProbeError> {
        self.stow(host)?;
        self.raise_to(host, self.settings.clearance_between)
    }

    fn set_deployed<H: ProbeHost>(&mut self, host: &mut H, deploy: bool) -> Result<(), ProbeError> {
        // A fixed probe is always deployed.
        if self.actuator.kind() == ActuatorKind::Fixed {
            self.deployed = true;
            return Ok(());
        }
        if self.deployed == deploy {
            return Ok(());
        }
        self.state = if deploy { ProbeState::Deploying } else { ProbeState::StowOrHold };
        let verb = if deploy { "deploy" } else { "stow" };

        let start = host.position();
        self.raise_to(host, self.settings.clearance_deploy.max(self.settings.clearance_between))?;

        if self.settings.pause_for_operator {
            host.await_operator(if deploy { "Deploy Z-Probe" } else { "Stow Z-Probe" })?;
        }

        let mut confirmed = false;
        for attempt in 0..2 {
            if deploy {
                self.actuator.deploy(host)?;
            } else {
                self.actuator.stow(host)?;
            }
            let settle = self.actuator.settle_ms();
            if settle > 0 {
                host.delay_ms(settle);
            }
            if !self.settings.triggered_when_stowed_test
                || self.actuator.is_triggered(self.detector) != deploy
            {
                confirmed = true;
                break;
            }
            warn!("PROBE: {} not confirmed (attempt {})", verb, attempt + 1);
        }
        if !confirmed {
            error!("PROBE: Z-Probe failed to {}", verb);
            self.state = ProbeState::Failed;
            return Err(ActuatorError::NotConfirmed { deploy }.into());
        }

        // Docking strategies wander in XY; return to where we were.
        let now = host.position();
        if now[0] != start[0] || now[1] != start[1] {
            host.move_to([start[0], start[1], now[2]], self.settings.xy_speed)?;
        }

        self.deployed = deploy;
        info!("PROBE: {}ed", verb);
        Ok(())
    }

    // ── Single descent ────────────────────────────────────────

    /// One bounded descent toward `z_low`, polling the debounced trigger
    /// every control tick.  Heaters, fans and stall tuning are muted for
    /// the duration and restored on every exit path.
    pub fn probe_down_to<H: ProbeHost>(
        &mut self,
        host: &mut H,
        z_low: f32,
        feedrate: f32,
    ) -> Result<ProbeSample, ProbeError> {
        let mut window = ProbeWindow::open(host, &self.settings, self.tune_axes);
        let detector = self.detector;

        let stale = detector.hit_on_purpose();
        if !stale.is_empty() {
            debug!("PROBE: cleared stale hits {}", stale);
        }
        detector.probe_enabled(true);
        let descent = Self::descend(detector, &mut *window, z_low, feedrate);
        detector.probe_enabled(false);
        let hit = descent?;

        let pos = window.sync_from_steppers();
        detector.hit_on_purpose();
        let timestamp_ms = window.now_ms();
        drop(window);

        let surface = pos[2] + self.settings.offset[2];
        let outcome = if !hit {
            SampleOutcome::NoTrigger
        } else if surface > self.settings.early_trigger_height {
            SampleOutcome::TriggeredTooEarly
        } else {
            SampleOutcome::Triggered(pos[2])
        };
        debug!("PROBE: {:?} at {:.1} mm/s", outcome, feedrate);
        Ok(ProbeSample { outcome, feedrate, timestamp_ms })
    }

    fn descend<H: ProbeHost>(
        detector: &EndstopDetector,
        host: &mut H,
        z_low: f32,
        feedrate: f32,
    ) -> Result<bool, ProbeError> {
        if detector.probe_triggered() {
            return Ok(true);
        }
        let [x, y, _] = host.position();
        host.start_move([x, y, z_low], feedrate)?;
        loop {
            let status = host.poll_move()?;
            if detector.probe_hit() {
                host.quick_stop();
                return Ok(true);
            }
            if status == MoveStatus::Done {
                return Ok(false);
            }
        }
    }

    // ── Aggregation ───────────────────────────────────────────

    /// Measure at the current XY with the configured sample policy.
    /// `sanity_check` rejects early triggers; without it they are accepted
    /// as ordinary readings.
    pub fn run_z_probe<H: ProbeHost>(
        &mut self,
        host: &mut H,
        sanity_check: bool,
    ) -> Result<ProbeResult, ProbeError> {
        let s = &self.settings;
        let (n, extra) = (s.samples.max(1), s.extra_samples);
        let total = usize::from(n) + usize::from(extra);
        if total > MAX_PROBE_SAMPLES {
            return Err(ProbeError::TooManySamples);
        }
        let (fast, slow) = (s.fast_speed, s.slow_speed);
        let offset_z = s.offset[2];
        let between = s.clearance_between;
        let multi = s.clearance_multi;
        let z_low = if host.is_homed() { s.low_point - offset_z } else { -10.0 };
        let pre_descent = s.clearance_deploy + FAST_DESCENT_MARGIN - offset_z.min(0.0);

        // The double-touch policy already starts with a fast pass.
        if n != 2 && host.position()[2] > pre_descent {
            self.state = ProbeState::Sampling(0);
            let sample = self.probe_down_to(host, pre_descent, fast)?;
            if sample.outcome != SampleOutcome::NoTrigger {
                let z = host.position()[2];
                self.raise_to(host, z + between)?;
            }
        }

        let result = match n {
            1 => {
                self.state = ProbeState::Sampling(1);
                let z = self.take(host, z_low, slow, sanity_check)?;
                ProbeResult { z, aggregation: Aggregation::Single, samples: 1 }
            }
            2 => {
                self.state = ProbeState::Sampling(0);
                let first = self.take(host, z_low, fast, sanity_check)?;
                self.raise_to(host, first + between)?;
                self.state = ProbeState::Sampling(1);
                let second = self.take(host, z_low, slow, sanity_check)?;
                debug!("PROBE: 1st {:.3} 2nd {:.3} discrepancy {:.3}", first, second, first - second);
                ProbeResult {
                    z: weighted_double(first, second),
                    aggregation: Aggregation::DoubleWeighted,
                    samples: 2,
                }
            }
            _ => {
                let mut zs: Vec<f32, MAX_PROBE_SAMPLES> = Vec::new();
                for k in 0..total {
                    self.state = ProbeState::Sampling(k as u8);
                    let z = self.take(host, z_low, slow, sanity_check)?;
                    zs.push(z).map_err(|_| ProbeError::TooManySamples)?;
                    if k + 1 < total {
                        self.raise_to(host, z + multi)?;
                    }
                }
                let z = trimmed_mean(&mut zs, extra as usize).ok_or(ProbeError::TooManySamples)?;
                ProbeResult {
                    z,
                    aggregation: Aggregation::TrimmedMean { kept: n, discarded: extra },
                    samples: total as u8,
                }
            }
        };
        self.state = ProbeState::Triggered;
        Ok(result)
    }

    fn take<H: ProbeHost>(
        &mut self,
        host: &mut H,
        z_low: f32,
        feedrate: f32,
        sanity_check: bool,
    ) -> Result<f32, ProbeError> {
        let sample = self.probe_down_to(host, z_low, feedrate)?;
        match sample.outcome {
            SampleOutcome::TriggeredTooEarly if !sanity_check => Ok(host.position()[2]),
            _ => sample.z(),
        }
    }

    // ── Point measurement ─────────────────────────────────────

    /// Measure the bed at `(x, y)` and return the surface Z (probe offset
    /// applied).  On any failure after motion has started the probe is
    /// stowed before the error is returned.
    pub fn probe_at_point<H: ProbeHost>(
        &mut self,
        host: &mut H,
        x: f32,
        y: f32,
        raise: RaisePolicy,
        probe_relative: bool,
    ) -> Result<f32, ProbeError> {
        if !self.can_reach(host, x, y, probe_relative) {
            warn!("PROBE: ({:.1}, {:.1}) unreachable", x, y);
            return Err(ProbeError::Unreachable);
        }
        let (nx, ny) = if probe_relative {
            (x - self.settings.offset[0], y - self.settings.offset[1])
        } else {
            (x, y)
        };

        match self.measure_at(host, nx, ny, raise) {
            Ok(z) => {
                self.state = ProbeState::Idle;
                Ok(z)
            }
            Err(e) => {
                self.state = ProbeState::Failed;
                error!("Probing failed: {}", e);
                // A failed deploy may have moved the mechanism part way.
                self.deployed = true;
                if let Err(stow_err) = self.stow(host) {
                    warn!("PROBE: stow after failure also failed: {}", stow_err);
                }
                self.state = ProbeState::Idle;
                Err(e)
            }
        }
    }

    fn measure_at<H: ProbeHost>(
        &mut self,
        host: &mut H,
        nx: f32,
        ny: f32,
        raise: RaisePolicy,
    ) -> Result<f32, ProbeError> {
        let z = host.position()[2].max(self.settings.clearance_between);
        host.move_to([nx, ny, z], self.settings.xy_speed)?;

        self.deploy(host)?;
        let result = self.run_z_probe(host, true)?;
        let measured = result.z + self.settings.offset[2];
        info!(
            "PROBE: X{:.2} Y{:.2} Z{:.3} ({:?}, {} samples)",
            nx, ny, measured, result.aggregation, result.samples
        );

        self.state = ProbeState::StowOrHold;
        let here = host.position()[2];
        match raise {
            RaisePolicy::None => {}
            RaisePolicy::RaiseClearance => self.raise_to(host, here + self.settings.clearance_between)?,
            RaisePolicy::BigRaise => self.raise_to(host, here + self.settings.big_raise)?,
            RaisePolicy::Stow => self.stow(host)?,
        }
        Ok(measured)
    }

    /// Raise to at least `z` (never lowers).  A negative probe offset is
    /// added so the tip clears by the requested amount.
    fn raise_to<H: ProbeHost>(&self, host: &mut H, z: f32) -> Result<(), ProbeError> {
        let target = z - self.settings.offset[2].min(0.0);
        let [x, y, cur] = host.position();
        if target > cur {
            host.move_to([x, y, target], self.settings.fast_speed)?;
        }
        Ok(())
    }
}
