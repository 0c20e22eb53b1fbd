//! The machine-geometry vector the calibration solver owns.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Delta geometry being solved: height, per-tower endstop adjustment,
/// delta radius and tower-angle trims.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryParameters {
    /// Nozzle height at the centre right after homing (mm).
    pub height: f32,
    /// Per-tower endstop adjustment (mm, ≤ 0 after normalisation).
    pub endstop_adj: [f32; 3],
    /// Horizontal distance from the centre to each carriage joint line (mm).
    pub radius: f32,
    /// Per-tower angle correction (degrees, zero mean after normalisation).
    pub tower_angle_trim: [f32; 3],
}

impl Default for GeometryParameters {
    fn default() -> Self {
        Self {
            height: 250.0,
            endstop_adj: [0.0; 3],
            radius: 124.0,
            tower_angle_trim: [0.0; 3],
        }
    }
}

/// One solvable component of [`GeometryParameters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Height,
    Endstop(usize),
    Radius,
    TowerTrim(usize),
}

impl GeometryParameters {
    pub fn get(&self, p: Parameter) -> f32 {
        match p {
            Parameter::Height => self.height,
            Parameter::Endstop(i) => self.endstop_adj[i],
            Parameter::Radius => self.radius,
            Parameter::TowerTrim(i) => self.tower_angle_trim[i],
        }
    }

    pub fn set(&mut self, p: Parameter, value: f32) {
        match p {
            Parameter::Height => self.height = value,
            Parameter::Endstop(i) => self.endstop_adj[i] = value,
            Parameter::Radius => self.radius = value,
            Parameter::TowerTrim(i) => self.tower_angle_trim[i] = value,
        }
    }

    #[must_use]
    pub fn perturbed(&self, p: Parameter, delta: f32) -> Self {
        let mut g = *self;
        g.set(p, self.get(p) + delta);
        g
    }

    /// Fold the common part of the corrections back into a canonical form:
    /// trims get zero mean, the largest endstop adjustment moves into the
    /// height so every adjustment ends up ≤ 0.
    pub fn normalise(&mut self, trims: bool) {
        if trims {
            let mean = self.tower_angle_trim.iter().sum::<f32>() / 3.0;
            for t in &mut self.tower_angle_trim {
                *t -= mean;
            }
        }
        let max = self.endstop_adj.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        self.height -= max;
        for e in &mut self.endstop_adj {
            *e -= max;
        }
    }
}

impl fmt::Display for GeometryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [ex, ey, ez] = self.endstop_adj;
        let [tx, ty, tz] = self.tower_angle_trim;
        write!(
            f,
            ".Height:{:.2}  Ex:{:+.2}  Ey:{:+.2}  Ez:{:+.2}  Radius:{:.2}  Tx:{:+.2}  Ty:{:+.2}  Tz:{:+.2}",
            self.height, ex, ey, ez, self.radius, tx, ty, tz
        )
    }
}
