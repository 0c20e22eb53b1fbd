//! Unified error types for the probing and calibration core.
//!
//! A single `Error` enum that every layer can convert into, keeping the
//! command layer's error reporting uniform.  All variants are `Copy` so they
//! can be passed through the measurement engine and calibration solver
//! without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A probe measurement failed.
    Probe(ProbeError),
    /// Probe deploy/stow hardware failed.
    Actuator(ActuatorError),
    /// The motion collaborator refused or aborted a move.
    Motion(MotionError),
    /// The calibration solver could not run or finish.
    Calibration(CalibrationError),
    /// The settings store rejected a load or save.
    Settings(&'static str),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe(e) => write!(f, "probe: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Motion(e) => write!(f, "motion: {e}"),
            Self::Calibration(e) => write!(f, "calibration: {e}"),
            Self::Settings(msg) => write!(f, "settings: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Motion errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionError {
    /// Operator abort (kill) arrived while a move was in flight.
    Killed,
    /// Target lies outside the reachable envelope.
    Unreachable,
    /// Homing did not find every endstop.
    HomingFailed,
}

impl fmt::Display for MotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed => write!(f, "killed"),
            Self::Unreachable => write!(f, "position unreachable"),
            Self::HomingFailed => write!(f, "homing failed"),
        }
    }
}

impl From<MotionError> for Error {
    fn from(e: MotionError) -> Self {
        Self::Motion(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// The probe pin did not confirm the requested state after settling.
    NotConfirmed { deploy: bool },
    /// GPIO set failed.
    GpioWriteFailed,
    /// PWM duty-cycle write failed.
    PwmWriteFailed,
    /// Docking scripts need known carriage positions.
    Unhomed,
    /// A docking move failed.
    Motion(MotionError),
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfirmed { deploy: true } => write!(f, "deploy not confirmed"),
            Self::NotConfirmed { deploy: false } => write!(f, "stow not confirmed"),
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::PwmWriteFailed => write!(f, "PWM write failed"),
            Self::Unhomed => write!(f, "axes not homed"),
            Self::Motion(e) => write!(f, "dock move: {e}"),
        }
    }
}

impl From<MotionError> for ActuatorError {
    fn from(e: MotionError) -> Self {
        Self::Motion(e)
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Probe errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// The probe (or nozzle) cannot reach the requested XY.
    Unreachable,
    /// The downward move reached its low point without a validated trigger.
    NoTrigger,
    /// The probe fired above the allowed clearance: jammed or spurious.
    TriggeredTooEarly,
    /// Sample count exceeds the fixed sample buffer.
    TooManySamples,
    /// Deploy or stow failed.
    Actuator(ActuatorError),
    /// A move failed or was killed mid-sample.
    Motion(MotionError),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "point unreachable"),
            Self::NoTrigger => write!(f, "no trigger"),
            Self::TriggeredTooEarly => write!(f, "triggered too early"),
            Self::TooManySamples => write!(f, "too many samples"),
            Self::Actuator(e) => write!(f, "{e}"),
            Self::Motion(e) => write!(f, "{e}"),
        }
    }
}

impl From<ActuatorError> for ProbeError {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

impl From<MotionError> for ProbeError {
    fn from(e: MotionError) -> Self {
        Self::Motion(e)
    }
}

impl From<ProbeError> for Error {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::Actuator(a) => Self::Actuator(a),
            ProbeError::Motion(m) => Self::Motion(m),
            other => Self::Probe(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    /// A G33 argument is out of range.
    InvalidParameter(&'static str),
    /// A calibration point on the configured radius is unreachable.
    RadiusUnreachable,
    /// A probe failed mid-pattern; geometry was rolled back.
    ProbingFailed(ProbeError),
    /// The sensitivity system could not be solved.
    Singular,
    /// Homing between iterations failed.
    Motion(MotionError),
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::RadiusUnreachable => write!(f, "calibration radius unreachable"),
            Self::ProbingFailed(e) => write!(f, "probing failed: {e}"),
            Self::Singular => write!(f, "singular sensitivity matrix"),
            Self::Motion(e) => write!(f, "{e}"),
        }
    }
}

impl From<MotionError> for CalibrationError {
    fn from(e: MotionError) -> Self {
        Self::Motion(e)
    }
}

impl From<CalibrationError> for Error {
    fn from(e: CalibrationError) -> Self {
        Self::Calibration(e)
    }
}
