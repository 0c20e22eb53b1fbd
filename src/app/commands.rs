//! Inbound commands to the probe service.
//!
//! These are the already-parsed forms of the G-/M-codes that reach the
//! probing core.  Tokenising and dispatch live outside this crate; the
//! [`ProbeService`](super::service::ProbeService) interprets these.

use crate::calibration::CalibrateArgs;

/// Commands the dispatcher can send into the probing core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MachineCommand {
    /// Probe an N×N serpentine grid and feed the mesh builder.
    G29 { grid: u8 },

    /// Probe once at a point and report "Bed X: Y: Z:".
    G30 { x: f32, y: f32 },

    /// Delta auto-calibration.
    G33(CalibrateArgs),

    /// Probe repeatability test; `None` coordinates mean "here".
    M48 { samples: u8, x: Option<f32>, y: Option<f32> },

    /// Deploy the probe.
    M401,

    /// Stow the probe.
    M402,

    /// Servo position; no angle reports the current one, `sweep_ms > 0`
    /// moves there linearly.
    M280 { index: u8, angle: Option<u8>, sweep_ms: u32 },

    /// Interactive probe-type self-test.
    M43S,

    /// Set (or report) the probe Z offset.
    M851 { z_offset: Option<f32> },

    /// Persist geometry and probe offset.
    M500,

    /// Reload geometry and probe offset.
    M501,
}
