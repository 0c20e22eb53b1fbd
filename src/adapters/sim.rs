//! Simulated delta machine.
//!
//! Implements every port the probing core consumes so the whole stack can
//! run on a host: the simulator binary and the integration tests drive the
//! real [`ProbeEngine`](crate::probe::ProbeEngine) and calibration solver
//! against it.
//!
//! The machine has a *true* geometry and a *firmware* geometry.  The bed is
//! flat at true Z = 0; the reading the firmware gets at an XY is whatever
//! the geometry mismatch makes it, via [`apparent_bed_height`].  Each
//! [`MotionPort::poll_move`] and each millisecond of [`DelayNs`] is one
//! control tick: the nozzle advances and the endstop detector is polled,
//! the same ordering the stepper ISR and endstop timer give on hardware.

use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::app::ports::{
    GeometryPort, MeshSink, MotionPort, MoveStatus, OperatorPort, QuietPort, ServoPort, StallPort,
    TimePort,
};
use crate::calibration::geometry::GeometryParameters;
use crate::endstops::{Axis, EndstopDetector, EndstopInputs, TriggerState};
use crate::error::{ActuatorError, MotionError};
use crate::kinematics::{DeltaKinematics, Kinematics, apparent_bed_height};

/// Length of one control tick.
pub const TICK_MS: u32 = 1;
const NANOS_PER_TICK: u64 = TICK_MS as u64 * 1_000_000;
const SIM_SERVOS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Move {
    target: [f32; 3],
    /// mm/s
    speed: f32,
}

/// Probe level for one detector poll.
struct SimPins(TriggerState);

impl EndstopInputs for SimPins {
    fn read_raw(&mut self) -> TriggerState {
        self.0
    }
}

pub struct SimMachine<'d> {
    kinematics: DeltaKinematics,
    detector: &'d EndstopDetector,

    firmware: GeometryParameters,
    actual: GeometryParameters,
    /// Firmware geometry in force at the last home; fixes the carriage
    /// offsets until the next one.
    homed_with: GeometryParameters,
    probe_offset: [f32; 3],
    /// Cached bed reading at the current nozzle XY.
    surface: Option<([f32; 2], f32)>,

    pos: [f32; 3],
    active: Option<Move>,
    homed: bool,
    homes: u32,

    now_ms: u64,
    pending_ns: u64,
    kill_at_ms: Option<u64>,
    /// Operator presses the probe at `.0` for `.1` ms.
    press: Option<(u64, u32)>,
    prompts: u32,

    heaters_paused: bool,
    fans_paused: bool,
    stall: [bool; 3],
    stealth: [bool; 3],
    current_ma: [u16; 3],
    servos: [Option<u8>; SIM_SERVOS],
}

impl<'d> SimMachine<'d> {
    pub fn new(
        detector: &'d EndstopDetector,
        kinematics: DeltaKinematics,
        firmware: GeometryParameters,
        actual: GeometryParameters,
        probe_offset: [f32; 3],
    ) -> Self {
        Self {
            kinematics,
            detector,
            firmware,
            actual,
            homed_with: firmware,
            probe_offset,
            surface: None,
            pos: [0.0, 0.0, firmware.height],
            active: None,
            homed: false,
            homes: 0,
            now_ms: 0,
            pending_ns: 0,
            kill_at_ms: None,
            press: None,
            prompts: 0,
            heaters_paused: false,
            fans_paused: false,
            stall: [false; 3],
            stealth: [true; 3],
            current_ma: [800; 3],
            servos: [None; SIM_SERVOS],
        }
    }

    // ── Scenario controls ─────────────────────────────────────

    /// Raise an operator kill once the clock reaches `at_ms`.
    pub fn kill_at(&mut self, at_ms: u64) {
        self.kill_at_ms = Some(at_ms);
    }

    /// Hold the probe triggered by hand for `hold_ms`, `after_ms` from now.
    pub fn press_probe(&mut self, after_ms: u64, hold_ms: u32) {
        self.press = Some((self.now_ms + after_ms, hold_ms));
    }

    pub fn actual(&self) -> &GeometryParameters {
        &self.actual
    }

    pub fn homes(&self) -> u32 {
        self.homes
    }

    pub fn prompts(&self) -> u32 {
        self.prompts
    }

    pub fn heaters_paused(&self) -> bool {
        self.heaters_paused
    }

    // ── Tick ──────────────────────────────────────────────────

    fn check_kill(&self) -> Result<(), MotionError> {
        match self.kill_at_ms {
            Some(at) if self.now_ms >= at => Err(MotionError::Killed),
            _ => Ok(()),
        }
    }

    /// Firmware Z at which the bed is met at the current nozzle XY.
    fn surface_z(&mut self) -> f32 {
        let xy = [self.pos[0], self.pos[1]];
        if let Some((at, z)) = self.surface {
            if at == xy {
                return z;
            }
        }
        let z = apparent_bed_height(
            &self.kinematics,
            &self.homed_with,
            &self.actual,
            f64::from(xy[0]),
            f64::from(xy[1]),
        )
        .map_or(f32::NEG_INFINITY, |z| z as f32);
        self.surface = Some((xy, z));
        z
    }

    fn probe_level(&mut self) -> bool {
        let contact = self.pos[2] + self.probe_offset[2] <= self.surface_z();
        let pressed = self
            .press
            .is_some_and(|(at, hold)| self.now_ms >= at && self.now_ms < at + u64::from(hold));
        contact || pressed
    }

    fn tick(&mut self) {
        self.now_ms += u64::from(TICK_MS);
        let level = self.probe_level();
        let pins = TriggerState::EMPTY.with(self.detector.probe_id(), level);
        self.detector.poll(&mut SimPins(pins));
    }

    fn step_towards(&mut self, mv: Move) -> bool {
        let step = mv.speed * TICK_MS as f32 / 1000.0;
        let d = [
            mv.target[0] - self.pos[0],
            mv.target[1] - self.pos[1],
            mv.target[2] - self.pos[2],
        ];
        let dist = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        if dist <= step {
            self.pos = mv.target;
            return true;
        }
        let k = step / dist;
        for (p, di) in self.pos.iter_mut().zip(d) {
            *p += di * k;
        }
        false
    }
}

// ── MotionPort implementation ─────────────────────────────────

impl MotionPort for SimMachine<'_> {
    fn position(&self) -> [f32; 3] {
        self.pos
    }

    fn is_homed(&self) -> bool {
        self.homed
    }

    fn is_reachable(&self, x: f32, y: f32) -> bool {
        self.kinematics.is_reachable(&self.firmware, f64::from(x), f64::from(y))
    }

    fn move_to(&mut self, target: [f32; 3], speed: f32) -> Result<(), MotionError> {
        self.start_move(target, speed)?;
        while self.poll_move()? == MoveStatus::InProgress {}
        Ok(())
    }

    fn start_move(&mut self, target: [f32; 3], speed: f32) -> Result<(), MotionError> {
        self.check_kill()?;
        if !self.is_reachable(target[0], target[1]) {
            return Err(MotionError::Unreachable);
        }
        self.active = Some(Move { target, speed: speed.max(0.1) });
        Ok(())
    }

    fn poll_move(&mut self) -> Result<MoveStatus, MotionError> {
        self.check_kill()?;
        let Some(mv) = self.active else {
            return Ok(MoveStatus::Done);
        };
        let arrived = self.step_towards(mv);
        self.tick();
        if arrived {
            self.active = None;
            Ok(MoveStatus::Done)
        } else {
            Ok(MoveStatus::InProgress)
        }
    }

    fn quick_stop(&mut self) {
        self.active = None;
    }

    fn sync_from_steppers(&mut self) -> [f32; 3] {
        self.pos
    }

    fn home(&mut self) -> Result<(), MotionError> {
        self.check_kill()?;
        self.active = None;
        self.homed_with = self.firmware;
        self.surface = None;
        self.pos = [0.0, 0.0, self.firmware.height];
        self.homed = true;
        self.homes += 1;
        debug!("SIM: homed at Z{:.2}", self.pos[2]);
        Ok(())
    }
}

// ── GeometryPort implementation ───────────────────────────────

impl GeometryPort for SimMachine<'_> {
    fn geometry(&self) -> GeometryParameters {
        self.firmware
    }

    fn apply_geometry(&mut self, geometry: &GeometryParameters) {
        self.firmware = *geometry;
    }
}

// ── Quiet / stall ports ───────────────────────────────────────

impl QuietPort for SimMachine<'_> {
    fn set_heaters_paused(&mut self, paused: bool) -> bool {
        core::mem::replace(&mut self.heaters_paused, paused)
    }

    fn set_fans_paused(&mut self, paused: bool) -> bool {
        core::mem::replace(&mut self.fans_paused, paused)
    }
}

impl StallPort for SimMachine<'_> {
    fn set_stall_detection(&mut self, axis: Axis, enable: bool) -> bool {
        core::mem::replace(&mut self.stall[axis.index()], enable)
    }

    fn set_current_ma(&mut self, axis: Axis, milliamps: u16) -> u16 {
        core::mem::replace(&mut self.current_ma[axis.index()], milliamps)
    }

    fn set_stealth(&mut self, axis: Axis, enable: bool) -> bool {
        core::mem::replace(&mut self.stealth[axis.index()], enable)
    }
}

// ── ServoPort implementation ──────────────────────────────────

impl ServoPort for SimMachine<'_> {
    fn set_servo_angle(&mut self, index: u8, angle: u8) -> Result<(), ActuatorError> {
        let slot = self
            .servos
            .get_mut(usize::from(index))
            .ok_or(ActuatorError::PwmWriteFailed)?;
        *slot = Some(angle);
        Ok(())
    }

    fn servo_angle(&self, index: u8) -> Option<u8> {
        self.servos.get(usize::from(index)).copied().flatten()
    }
}

// ── Time / operator ───────────────────────────────────────────

impl TimePort for SimMachine<'_> {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }
}

impl OperatorPort for SimMachine<'_> {
    fn await_operator(&mut self, prompt: &'static str) -> Result<(), MotionError> {
        self.check_kill()?;
        info!("SIM: operator prompt: {}", prompt);
        self.prompts += 1;
        Ok(())
    }
}

impl DelayNs for SimMachine<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.pending_ns += u64::from(ns);
        while self.pending_ns >= NANOS_PER_TICK {
            self.pending_ns -= NANOS_PER_TICK;
            self.tick();
        }
    }
}

// ── Mesh recorder ─────────────────────────────────────────────

/// [`MeshSink`] that keeps every reported grid point.
#[derive(Debug, Default, Clone)]
pub struct RecordedMesh {
    pub points: Vec<(u8, u8, f32)>,
}

impl RecordedMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ix: u8, iy: u8) -> Option<f32> {
        self.points.iter().find(|p| p.0 == ix && p.1 == iy).map(|p| p.2)
    }
}

impl MeshSink for RecordedMesh {
    fn record(&mut self, ix: u8, iy: u8, z: f32) {
        self.points.push((ix, iy, z));
    }
}
