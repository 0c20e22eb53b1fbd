//! Probe deploy/stow strategies.
//!
//! | Actuator          | Mechanism                                   |
//! |-------------------|---------------------------------------------|
//! | `FixedNone`       | inductive / fixed mount, nothing to do      |
//! | `ServoSwing`      | servo arm swung between two angles          |
//! | `Solenoid`        | GPIO-driven solenoid holds the probe down   |
//! | `MechanicalDock`  | sled parked at the X-max dock + solenoid    |
//! | `AllenKeyDock`    | scripted moves push the probe in and out    |
//!
//! The variant is chosen once at start-up and injected into the
//! [`ProbeEngine`](super::ProbeEngine).

use embedded_hal::digital::OutputPin;
use heapless::Vec;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::app::ports::ProbeHost;
use crate::endstops::EndstopDetector;
use crate::error::ActuatorError;

/// Mechanism family, for logging and deploy policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorKind {
    Fixed,
    Servo,
    Solenoid,
    Dock,
    AllenKey,
}

/// Capability interface over every deploy mechanism.
pub trait ProbeActuator {
    fn kind(&self) -> ActuatorKind;

    fn deploy<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError>;

    fn stow<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError>;

    /// Time the mechanism needs after a command before its position can be
    /// trusted.
    fn settle_ms(&self) -> u32;

    /// Debounced probe level.
    fn is_triggered(&self, detector: &EndstopDetector) -> bool {
        detector.probe_triggered()
    }
}

// ── Fixed ─────────────────────────────────────────────────────

/// Always deployed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedNone;

impl ProbeActuator for FixedNone {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Fixed
    }

    fn deploy<H: ProbeHost>(&mut self, _host: &mut H) -> Result<(), ActuatorError> {
        Ok(())
    }

    fn stow<H: ProbeHost>(&mut self, _host: &mut H) -> Result<(), ActuatorError> {
        Ok(())
    }

    fn settle_ms(&self) -> u32 {
        0
    }
}

// ── Servo ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ServoSwing {
    pub index: u8,
    pub deploy_angle: u8,
    pub stow_angle: u8,
    pub settle_ms: u32,
}

impl ProbeActuator for ServoSwing {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Servo
    }

    fn deploy<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError> {
        debug!("SERVO: #{} -> {}°", self.index, self.deploy_angle);
        host.set_servo_angle(self.index, self.deploy_angle)
    }

    fn stow<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError> {
        debug!("SERVO: #{} -> {}°", self.index, self.stow_angle);
        host.set_servo_angle(self.index, self.stow_angle)
    }

    fn settle_ms(&self) -> u32 {
        self.settle_ms
    }
}

// ── Solenoid ──────────────────────────────────────────────────

/// Energised = deployed.
pub struct Solenoid<P: OutputPin> {
    pin: P,
    settle_ms: u32,
}

impl<P: OutputPin> Solenoid<P> {
    pub fn new(pin: P, settle_ms: u32) -> Self {
        Self { pin, settle_ms }
    }

    fn drive(&mut self, energise: bool) -> Result<(), ActuatorError> {
        let r = if energise {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        r.map_err(|_| ActuatorError::GpioWriteFailed)
    }
}

impl<P: OutputPin> ProbeActuator for Solenoid<P> {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Solenoid
    }

    fn deploy<H: ProbeHost>(&mut self, _host: &mut H) -> Result<(), ActuatorError> {
        self.drive(true)
    }

    fn stow<H: ProbeHost>(&mut self, _host: &mut H) -> Result<(), ActuatorError> {
        self.drive(false)
    }

    fn settle_ms(&self) -> u32 {
        self.settle_ms
    }
}

// ── Sled dock ─────────────────────────────────────────────────

/// Sled probe picked up from / returned to a dock beyond X max.  The
/// carriage stops 1 mm short of the dock when stowing.
pub struct MechanicalDock<P: OutputPin> {
    solenoid: Solenoid<P>,
    dock_x: f32,
    speed: f32,
}

impl<P: OutputPin> MechanicalDock<P> {
    /// `dock_x` is X max plus the docking offset.
    pub fn new(pin: P, dock_x: f32, speed: f32, settle_ms: u32) -> Self {
        Self {
            solenoid: Solenoid::new(pin, settle_ms),
            dock_x,
            speed,
        }
    }

    fn dock<H: ProbeHost>(&mut self, host: &mut H, stow: bool) -> Result<(), ActuatorError> {
        if !host.is_homed() {
            return Err(ActuatorError::Unhomed);
        }
        let [_, y, z] = host.position();
        let x = if stow { self.dock_x - 1.0 } else { self.dock_x };
        info!("DOCK: sled {} at X{:.1}", if stow { "stow" } else { "pick-up" }, x);
        host.move_to([x, y, z], self.speed)?;
        self.solenoid.drive(!stow)
    }
}

impl<P: OutputPin> ProbeActuator for MechanicalDock<P> {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Dock
    }

    fn deploy<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError> {
        self.dock(host, false)
    }

    fn stow<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError> {
        self.dock(host, true)
    }

    fn settle_ms(&self) -> u32 {
        self.solenoid.settle_ms
    }
}

// ── Allen-key / scripted dock ─────────────────────────────────

/// One scripted move.  Unset coordinates keep the current position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DockMove {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
    /// mm/s
    pub speed: f32,
}

impl DockMove {
    pub fn target(&self, current: [f32; 3]) -> [f32; 3] {
        [
            self.x.unwrap_or(current[0]),
            self.y.unwrap_or(current[1]),
            self.z.unwrap_or(current[2]),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct AllenKeyDock {
    pub deploy: Vec<DockMove, 5>,
    pub stow: Vec<DockMove, 5>,
}

impl AllenKeyDock {
    fn run<H: ProbeHost>(host: &mut H, script: &[DockMove]) -> Result<(), ActuatorError> {
        if !host.is_homed() {
            return Err(ActuatorError::Unhomed);
        }
        for step in script {
            let target = step.target(host.position());
            host.move_to(target, step.speed)?;
        }
        Ok(())
    }
}

impl ProbeActuator for AllenKeyDock {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::AllenKey
    }

    fn deploy<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError> {
        Self::run(host, &self.deploy)
    }

    fn stow<H: ProbeHost>(&mut self, host: &mut H) -> Result<(), ActuatorError> {
        Self::run(host, &self.stow)
    }

    fn settle_ms(&self) -> u32 {
        0
    }
}
