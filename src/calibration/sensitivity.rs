//! Sensitivity matrix ("auto-tune factors") and the correction solve.
//!
//! Row `k` is one active nominal point, column `p` one solved parameter:
//!
//! ```text
//!   J[k][p] = (apparent(G, G + h·e_p, pt_k) - apparent(G, G, pt_k)) / h
//! ```
//!
//! i.e. how much the reading at point `k` moves when the real machine
//! differs from the assumed one by `h` in parameter `p`.  Measured heights
//! `z` then satisfy `z ≈ J·Δ` with `Δ = real - assumed`, solved in the
//! damped least-squares sense `(JᵀJ + λI)Δ = Jᵀz`.

use heapless::Vec;
use log::debug;
use nalgebra::{SMatrix, SVector};

use crate::error::CalibrationError;
use crate::kinematics::{Kinematics, apparent_bed_height};

use super::geometry::{GeometryParameters, Parameter};
use super::pattern::{NPP, ProbePattern};

pub const MAX_PARAMS: usize = 7;
const ROWS: usize = NPP + 1;
const PIVOT_EPSILON: f64 = 1e-12;

/// Rows past the active points and columns past the solved parameters stay
/// zero.
pub type Jacobian = SMatrix<f64, ROWS, MAX_PARAMS>;

/// One entry per solved parameter; padding entries are zero.
pub type Correction = SVector<f64, MAX_PARAMS>;

/// Parameters a pattern can resolve.
pub fn solved_parameters(points: u8, towers: bool) -> Vec<Parameter, MAX_PARAMS> {
    let mut out = Vec::new();
    let list: &[Parameter] = match points {
        0 => &[],
        1 => &[Parameter::Height],
        2 => &[
            Parameter::Endstop(0),
            Parameter::Endstop(1),
            Parameter::Endstop(2),
            Parameter::Radius,
        ],
        _ if !towers => &[
            Parameter::Endstop(0),
            Parameter::Endstop(1),
            Parameter::Endstop(2),
            Parameter::Radius,
        ],
        _ => &[
            Parameter::Endstop(0),
            Parameter::Endstop(1),
            Parameter::Endstop(2),
            Parameter::Radius,
            Parameter::TowerTrim(0),
            Parameter::TowerTrim(1),
            Parameter::TowerTrim(2),
        ],
    };
    for &p in list {
        // Never exceeds MAX_PARAMS.
        let _ = out.push(p);
    }
    out
}

#[derive(Debug, Clone)]
pub struct Sensitivity {
    params: Vec<Parameter, MAX_PARAMS>,
    jacobian: Jacobian,
    rows: usize,
}

impl Sensitivity {
    /// Finite-difference the kinematics around `g` at the pattern's nominal
    /// points.
    pub fn compute<K: Kinematics + ?Sized>(
        kinematics: &K,
        g: &GeometryParameters,
        pattern: &ProbePattern,
        step: f32,
    ) -> Result<Self, CalibrationError> {
        let params = solved_parameters(pattern.points(), pattern.towers());
        let active = pattern.active();
        if active.len() > ROWS {
            return Err(CalibrationError::Singular);
        }

        let mut jacobian = Jacobian::zeros();
        for (row, &index) in active.iter().enumerate() {
            let (x, y) = pattern.nominal_xy(index);
            let (x, y) = (f64::from(x), f64::from(y));
            let base = apparent_bed_height(kinematics, g, g, x, y)
                .ok_or(CalibrationError::RadiusUnreachable)?;

            for (col, &p) in params.iter().enumerate() {
                let shifted = g.perturbed(p, step);
                let h = f64::from(shifted.get(p)) - f64::from(g.get(p));
                let z = apparent_bed_height(kinematics, g, &shifted, x, y)
                    .ok_or(CalibrationError::RadiusUnreachable)?;
                jacobian[(row, col)] = (z - base) / h;
            }
        }

        debug!("CAL: sensitivity {}x{}", active.len(), params.len());
        Ok(Self { params, jacobian, rows: active.len() })
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// d(reading at active point `k`) / d(parameter column `p`).
    pub fn entry(&self, k: usize, p: usize) -> f64 {
        self.jacobian[(k, p)]
    }

    /// Solve for the correction given the measured heights of the active
    /// points (same order as the rows).
    pub fn solve(&self, z: &[f64], damping: f64) -> Result<Correction, CalibrationError> {
        let n = self.params.len();
        let mut zv = SVector::<f64, ROWS>::zeros();
        for (e, &zk) in zv.iter_mut().zip(z).take(self.rows) {
            *e = zk;
        }

        let jt = self.jacobian.transpose();
        let mut normal = jt * self.jacobian;
        for i in 0..MAX_PARAMS {
            // Unused columns pin their entry of the correction to zero.
            normal[(i, i)] += if i < n { damping } else { 1.0 };
        }
        let rhs = jt * zv;

        let lu = normal.lu();
        if lu.u().diagonal().iter().any(|d| d.abs() < PIVOT_EPSILON) {
            return Err(CalibrationError::Singular);
        }
        let delta = lu.solve(&rhs).ok_or(CalibrationError::Singular)?;
        if delta.iter().any(|d| !d.is_finite()) {
            return Err(CalibrationError::Singular);
        }
        Ok(delta)
    }

    /// Apply a correction to `g`.
    pub fn apply(&self, g: &GeometryParameters, delta: &Correction) -> GeometryParameters {
        let mut out = *g;
        for (&p, &d) in self.params.iter().zip(delta.iter()) {
            out.set(p, (f64::from(g.get(p)) + d) as f32);
        }
        out
    }
}
