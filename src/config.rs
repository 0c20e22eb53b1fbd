//! Machine configuration parameters
//!
//! All tunable parameters for probing, endstop filtering and delta
//! calibration.  Values can be overridden from a JSON file (host simulator)
//! or from the persisted settings blob.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::calibration::geometry::GeometryParameters;
use crate::endstops::Axis;
use crate::probe::actuator::DockMove;

/// Fixed capacity of the per-point sample buffer (N + E).
pub const MAX_PROBE_SAMPLES: usize = 16;

/// Core machine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MachineConfig {
    pub probe: ProbeSettings,
    pub endstops: EndstopSettings,
    pub delta: DeltaSettings,
    pub calibration: CalibrationSettings,
    /// Geometry used at boot, before any persisted values are loaded.
    pub geometry: GeometryParameters,
}

/// Which physical deploy strategy the probe uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActuatorConfig {
    /// Inductive / fixed-mount probe, always deployed.
    Fixed,
    /// Servo-swung arm.
    Servo { index: u8, deploy_angle: u8, stow_angle: u8 },
    /// Solenoid pushes the probe down while energised.
    Solenoid,
    /// Sled parked at the X-max dock.
    Sled { dock_offset: f32 },
    /// Magnetic or Allen-key probe deployed by scripted moves.
    AllenKey { deploy: Vec<DockMove, 5>, stow: Vec<DockMove, 5> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    // --- Geometry ---
    /// Probe tip offset from the nozzle (X, Y, Z) in mm.  Z is the M851 offset.
    pub offset: [f32; 3],

    // --- Speeds (mm/s) ---
    pub xy_speed: f32,
    pub fast_speed: f32,
    pub slow_speed: f32,

    // --- Clearances (mm) ---
    /// Height for deploy/stow moves.
    pub clearance_deploy: f32,
    /// Raise between individual probe points.
    pub clearance_between: f32,
    /// Raise between samples of one multi-probe point.
    pub clearance_multi: f32,
    /// Raise after the last point of a pattern.
    pub big_raise: f32,
    /// Lowest Z a probing move may reach before it counts as no-trigger.
    pub low_point: f32,
    /// Triggers above this height are rejected as jammed or spurious.
    pub early_trigger_height: f32,

    // --- Sampling ---
    /// Samples averaged per point (N).
    pub samples: u8,
    /// Extra samples taken and discarded as outliers (E).
    pub extra_samples: u8,

    // --- Quiet probing ---
    pub pause_heaters: bool,
    pub pause_fans: bool,
    /// Settle time after muting before the sample starts.
    pub settle_delay_ms: u32,
    /// Axes switched into stall-detection mode for the sample window.
    pub stall_axes: Vec<Axis, 3>,
    /// Driver current during the sample window (0 = leave unchanged).
    pub stall_current_ma: u16,

    // --- Actuator ---
    pub actuator: ActuatorConfig,
    /// Time the actuator needs to reach its position.
    pub deploy_settle_ms: u32,
    /// Verify deploy/stow from the probe pin level.
    pub triggered_when_stowed_test: bool,
    /// Wait for operator confirmation before deploy and stow.
    pub pause_for_operator: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            offset: [0.0, 0.0, 0.0],

            xy_speed: 133.0,
            fast_speed: 20.0,
            slow_speed: 10.0,

            clearance_deploy: 15.0,
            clearance_between: 5.0,
            clearance_multi: 5.0,
            big_raise: 25.0,
            low_point: -2.0,
            early_trigger_height: 3.0,

            samples: 2,
            extra_samples: 0,

            pause_heaters: true,
            pause_fans: true,
            settle_delay_ms: 25,
            stall_axes: Vec::new(),
            stall_current_ma: 0,

            actuator: ActuatorConfig::Fixed,
            deploy_settle_ms: 300,
            triggered_when_stowed_test: false,
            pause_for_operator: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndstopSettings {
    /// Consecutive consistent samples before a level change is accepted.
    /// 0 accepts the raw level immediately.
    pub noise_threshold: u8,
    /// Per axis: home towards max (true) or min (false).
    pub home_to_max: [bool; 3],
    /// Per axis: a second endstop exists (X2/Y2/Z2).
    pub dual: [bool; 3],
    /// The probe shares the Z-min pin instead of having its own input.
    pub probe_on_z_min: bool,
}

impl Default for EndstopSettings {
    fn default() -> Self {
        Self {
            noise_threshold: 3,
            home_to_max: [true, true, true],
            dual: [false, false, false],
            probe_on_z_min: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaSettings {
    /// Diagonal rod length (mm).
    pub diagonal_rod: f32,
    /// Radius of the printable disc (mm).
    pub printable_radius: f32,
    /// Radius of the outer ring of calibration points (mm).
    pub calibration_radius: f32,
}

impl Default for DeltaSettings {
    fn default() -> Self {
        Self {
            diagonal_rod: 250.0,
            printable_radius: 140.0,
            calibration_radius: 121.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Point pattern when G33 has no P word.
    pub default_points: u8,
    /// Hard iteration cap.
    pub max_iterations: u8,
    /// Perturbation used for the finite-difference sensitivity matrix (mm or deg).
    pub sensitivity_step: f32,
    /// Tikhonov damping added to the normal equations.
    pub damping: f32,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            default_points: 4,
            max_iterations: 30,
            sensitivity_step: 0.01,
            damping: 1.0e-6,
        }
    }
}

/// What M500 writes and M501 restores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub geometry: GeometryParameters,
    /// Probe Z offset (M851).
    pub probe_z_offset: f32,
}

impl PersistedSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.geometry;
        let finite = [g.height, g.radius, self.probe_z_offset]
            .into_iter()
            .chain(g.endstop_adj)
            .chain(g.tower_angle_trim)
            .all(f32::is_finite);
        if !finite {
            return Err(ConfigError::ValidationFailed("settings contain non-finite values"));
        }
        if g.height <= 0.0 || g.radius <= 0.0 {
            return Err(ConfigError::ValidationFailed("height and radius must be positive"));
        }
        if g.tower_angle_trim.iter().any(|t| t.abs() > 10.0) {
            return Err(ConfigError::ValidationFailed("tower trim beyond ±10°"));
        }
        if self.probe_z_offset.abs() > 20.0 {
            return Err(ConfigError::ValidationFailed("probe z offset beyond ±20 mm"));
        }
        Ok(())
    }
}

impl MachineConfig {
    /// Reject out-of-range values.  Nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.probe;
        let fail = |msg| Err(ConfigError::ValidationFailed(msg));

        if p.samples == 0 || usize::from(p.samples) > MAX_PROBE_SAMPLES {
            return fail("probe.samples must be 1..=16");
        }
        if usize::from(p.samples) + usize::from(p.extra_samples) > MAX_PROBE_SAMPLES {
            return fail("probe.samples + probe.extra_samples must not exceed 16");
        }
        if p.extra_samples > 0 && p.samples < 3 {
            return fail("probe.extra_samples needs probe.samples >= 3");
        }
        if p.fast_speed <= 0.0 || p.slow_speed <= 0.0 || p.xy_speed <= 0.0 {
            return fail("probe speeds must be positive");
        }
        if p.clearance_between <= 0.0 || p.clearance_deploy <= 0.0 || p.clearance_multi <= 0.0 {
            return fail("probe clearances must be positive");
        }
        if p.big_raise < p.clearance_between {
            return fail("probe.big_raise must be >= probe.clearance_between");
        }
        if p.low_point > 0.0 {
            return fail("probe.low_point must be <= 0");
        }
        if p.early_trigger_height <= 0.0 {
            return fail("probe.early_trigger_height must be positive");
        }
        if let ActuatorConfig::Servo { deploy_angle, stow_angle, .. } = p.actuator {
            if deploy_angle > 180 || stow_angle > 180 {
                return fail("servo angles must be <= 180");
            }
        }

        if self.endstops.noise_threshold > 16 {
            return fail("endstops.noise_threshold must be 0..=16");
        }

        let d = &self.delta;
        if d.calibration_radius <= 0.0 || d.calibration_radius > d.printable_radius {
            return fail("delta.calibration_radius must be in (0, printable_radius]");
        }
        if d.diagonal_rod <= self.geometry.radius {
            return fail("delta.diagonal_rod must exceed the delta radius");
        }

        let c = &self.calibration;
        if c.default_points > 10 {
            return fail("calibration.default_points must be 0..=10");
        }
        if c.max_iterations == 0 || c.max_iterations > 30 {
            return fail("calibration.max_iterations must be 1..=30");
        }
        if c.sensitivity_step <= 0.0 || c.damping < 0.0 {
            return fail("calibration step and damping must be positive");
        }
        Ok(())
    }
}
