//! Outbound status events.
//!
//! The probing core and the [`ProbeService`](super::service::ProbeService)
//! emit these through the [`EventSink`](super::ports::EventSink) port.  The
//! `Display` impl renders the exact operator-visible status line; adapters
//! decide where it goes (host serial, LCD, log).

use core::fmt;

use crate::calibration::geometry::GeometryParameters;
use crate::calibration::pattern::NPP;
use crate::endstops::TriggerState;
use crate::probe::selftest::{ProbeKind, SelfTestReport};

/// Operator-visible status produced by the probing core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusEvent {
    /// Free-form prompt or notice.
    Prompt(&'static str),

    /// An argument failed validation; carries the full message.
    Implausible(&'static str),

    // -- Probing --
    ProbingFailed,
    BedHeight { x: f32, y: f32, z: f32 },
    Repeatability { samples: u8, mean: f32, std_dev: f32, min: f32, max: f32 },
    EndstopsHit(TriggerState),
    ProbeOffset(f32),
    ServoAngle { index: u8, angle: u8 },
    ProbeClassified(SelfTestReport),

    // -- Calibration --
    Checking { dry_run: bool },
    Settings(GeometryParameters),
    PointHeights { z: [f32; NPP + 1], towers: bool, opposites: bool },
    Iteration { n: u8, std_dev: f32 },
    CalibrationOk { std_dev: f32 },
    RollingBack,
    NoConvergence { std_dev: f32 },
    DryRun { std_dev: f32 },
    CorrectManually,
    SaveHint,

    // -- Settings --
    SettingsStored,
    SettingsLoaded,
}

fn signed(f: &mut fmt::Formatter<'_>, label: &str, v: f32) -> fmt::Result {
    write!(f, "  {label}:{v:+.2}")
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Prompt(msg) | Self::Implausible(msg) => f.write_str(msg),

            Self::ProbingFailed => f.write_str("Probing failed"),
            Self::BedHeight { x, y, z } => write!(f, "Bed X: {x:.2} Y: {y:.2} Z: {z:.3}"),
            Self::Repeatability { samples, mean, std_dev, min, max } => write!(
                f,
                "{samples} samples Mean: {mean:.6} Min: {min:.3} Max: {max:.3} Range: {:.3} Standard Deviation: {std_dev:.6}",
                max - min
            ),
            Self::EndstopsHit(state) => write!(f, "endstops hit: {state}"),
            Self::ProbeOffset(z) => write!(f, "Probe Offset Z: {z:.2}"),
            Self::ServoAngle { index, angle } => write!(f, "Servo {index}: {angle}"),
            Self::ProbeClassified(report) => {
                match report.kind {
                    ProbeKind::PulseProbe { width_ms } => {
                        write!(f, "= BLTouch compatible probe ({width_ms} ms pulse) =")?;
                    }
                    ProbeKind::MechanicalSwitch => f.write_str("= Mechanical switch probe =")?,
                }
                if report.triggered_when_stowed {
                    f.write_str(" triggered when stowed")?;
                }
                if !report.consistent {
                    f.write_str(" (inconsistent deploy/stow readings)")?;
                }
                Ok(())
            }

            Self::Checking { dry_run } => {
                f.write_str("Checking... AC")?;
                if dry_run {
                    f.write_str(" (DRY-RUN)")?;
                }
                Ok(())
            }
            Self::Settings(g) => write!(f, "{g}"),
            Self::PointHeights { z, towers, opposites } => {
                f.write_str(".")?;
                signed(f, "  c", z[0])?;
                if towers {
                    signed(f, " x", z[1])?;
                    signed(f, " y", z[3])?;
                    signed(f, " z", z[5])?;
                }
                if opposites {
                    signed(f, "yz", z[4])?;
                    signed(f, "zx", z[6])?;
                    signed(f, "xy", z[2])?;
                }
                Ok(())
            }
            Self::Iteration { n, std_dev } => write!(f, "Iteration : {n:02} std dev: {std_dev:.3}"),
            Self::CalibrationOk { std_dev } => write!(f, "Calibration OK, std dev: {std_dev:.3}"),
            Self::RollingBack => f.write_str("Calibration OK, rolling back."),
            Self::NoConvergence { std_dev } => write!(f, "No convergence std dev: {std_dev:.3}"),
            Self::DryRun { std_dev } => write!(f, "End DRY-RUN std dev: {std_dev:.3}"),
            Self::CorrectManually => f.write_str("Correct delta settings with M665 and M666"),
            Self::SaveHint => f.write_str("Save with M500"),

            Self::SettingsStored => f.write_str("Settings Stored"),
            Self::SettingsLoaded => f.write_str("Settings Loaded"),
        }
    }
}
