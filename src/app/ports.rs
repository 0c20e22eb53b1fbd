//! Port traits: the hexagonal boundary between the probing core and the
//! rest of the machine.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ProbeEngine / calibration solver
//! ```
//!
//! Driven adapters (motion planner, heater/fan control, stepper drivers,
//! servo PWM, settings store, status output) implement these traits.  The
//! core consumes them via generics, so it never touches hardware directly.
//!
//! Every blocking call on [`MotionPort`] is a suspension point: the endstop
//! interrupt keeps running underneath it, and an operator kill surfaces as
//! [`MotionError::Killed`].

use embedded_hal::delay::DelayNs;

use crate::calibration::geometry::GeometryParameters;
use crate::config::PersistedSettings;
use crate::endstops::Axis;
use crate::error::{ActuatorError, MotionError};

use super::events::StatusEvent;

// ───────────────────────────────────────────────────────────────
// Motion port (domain → planner / steppers)
// ───────────────────────────────────────────────────────────────

/// Progress of a move started with [`MotionPort::start_move`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    InProgress,
    Done,
}

pub trait MotionPort {
    /// Believed nozzle position (X, Y, Z) in mm.
    fn position(&self) -> [f32; 3];

    /// Whether every axis has a trusted reference.
    fn is_homed(&self) -> bool;

    /// Whether the nozzle can reach `(x, y)`.
    fn is_reachable(&self, x: f32, y: f32) -> bool;

    /// Blocking move.  Returns once the planner is idle.
    fn move_to(&mut self, target: [f32; 3], speed: f32) -> Result<(), MotionError>;

    /// Queue a move without waiting for it.
    fn start_move(&mut self, target: [f32; 3], speed: f32) -> Result<(), MotionError>;

    /// Advance the in-flight move by one control tick.
    fn poll_move(&mut self) -> Result<MoveStatus, MotionError>;

    /// Abort the in-flight move immediately.
    fn quick_stop(&mut self);

    /// Re-derive the believed position from the stepper counts after an
    /// aborted move.
    fn sync_from_steppers(&mut self) -> [f32; 3];

    /// Home all axes.
    fn home(&mut self) -> Result<(), MotionError>;
}

// ───────────────────────────────────────────────────────────────
// Geometry port (domain → kinematics)
// ───────────────────────────────────────────────────────────────

/// Publishes geometry to the kinematics used by the planner.  Only called
/// between calibration iterations, never while a sample is in flight.
pub trait GeometryPort {
    fn geometry(&self) -> GeometryParameters;
    fn apply_geometry(&mut self, geometry: &GeometryParameters);
}

// ───────────────────────────────────────────────────────────────
// Quiet-probing ports
// ───────────────────────────────────────────────────────────────

/// Heater and fan muting.  Each setter returns the previous state so the
/// caller can restore it exactly.
pub trait QuietPort {
    fn set_heaters_paused(&mut self, paused: bool) -> bool;
    fn set_fans_paused(&mut self, paused: bool) -> bool;
}

/// Stepper-driver tuning for sensorless probing.  Each setter returns the
/// previous value.
pub trait StallPort {
    fn set_stall_detection(&mut self, axis: Axis, enable: bool) -> bool;
    fn set_current_ma(&mut self, axis: Axis, milliamps: u16) -> u16;
    fn set_stealth(&mut self, axis: Axis, enable: bool) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Servo port
// ───────────────────────────────────────────────────────────────

pub trait ServoPort {
    fn set_servo_angle(&mut self, index: u8, angle: u8) -> Result<(), ActuatorError>;
    fn servo_angle(&self, index: u8) -> Option<u8>;

    /// Move linearly to `angle` over `duration_ms`.  Adapters without a
    /// timebase jump straight to the target.
    fn sweep_servo(&mut self, index: u8, angle: u8, duration_ms: u32) -> Result<(), ActuatorError> {
        let _ = duration_ms;
        self.set_servo_angle(index, angle)
    }
}

// ───────────────────────────────────────────────────────────────
// Time and operator
// ───────────────────────────────────────────────────────────────

pub trait TimePort {
    /// Milliseconds since boot (monotonic).
    fn now_ms(&self) -> u64;
}

/// Manual-deploy pauses.  Implementations keep servicing the rest of the
/// machine (heaters, host link) while they wait.
pub trait OperatorPort {
    fn await_operator(&mut self, prompt: &'static str) -> Result<(), MotionError>;
}

/// Everything the measurement engine needs from the machine, as one bound.
pub trait ProbeHost:
    MotionPort + GeometryPort + QuietPort + StallPort + ServoPort + TimePort + OperatorPort + DelayNs
{
}

impl<T> ProbeHost for T where
    T: MotionPort + GeometryPort + QuietPort + StallPort + ServoPort + TimePort + OperatorPort + DelayNs
{
}

// ───────────────────────────────────────────────────────────────
// Status sink (domain → host link / LCD)
// ───────────────────────────────────────────────────────────────

/// The core emits operator-visible [`StatusEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &StatusEvent);
}

// ───────────────────────────────────────────────────────────────
// Mesh sink (domain → bed-level mesh builder)
// ───────────────────────────────────────────────────────────────

pub trait MeshSink {
    fn record(&mut self, ix: u8, iy: u8, z: f32);
}

// ───────────────────────────────────────────────────────────────
// Settings port (domain ↔ persistent settings)
// ───────────────────────────────────────────────────────────────

/// Loads and persists calibration results.
///
/// Implementations MUST validate values before persisting.
pub trait SettingsPort {
    fn load(&self) -> Result<PersistedSettings, ConfigError>;
    fn save(&mut self, settings: &PersistedSettings) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from configuration validation and [`SettingsPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Nothing stored yet (first boot).
    NotFound,
    /// Stored blob failed deserialization.
    Corrupted,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage failed.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "settings not found"),
            Self::Corrupted => write!(f, "settings corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::NotFound => Self::Settings("not found"),
            ConfigError::Corrupted => Self::Settings("corrupted"),
            ConfigError::IoError => Self::Settings("I/O error"),
        }
    }
}
