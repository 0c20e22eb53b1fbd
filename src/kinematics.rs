//! Kinematics collaborator.
//!
//! The calibration solver and the simulated machine only need a pure
//! position ↔ carriage mapping for a given geometry; [`Kinematics`] is that
//! seam.  [`DeltaKinematics`] implements it for a three-tower parallel-arm
//! machine.  All arithmetic is `f64` because the solver differentiates it.

use nalgebra::Vector3;

use crate::calibration::geometry::GeometryParameters;

/// Nominal tower angles (degrees) for towers A, B, C.
pub const TOWER_ANGLES: [f64; 3] = [210.0, 330.0, 90.0];

/// Pure mapping between nozzle position and actuator positions.
pub trait Kinematics {
    /// Carriage heights that place the nozzle at `p`.  `None` if the point
    /// is outside the arm reach.
    fn inverse(&self, g: &GeometryParameters, p: Vector3<f64>) -> Option<Vector3<f64>>;

    /// Nozzle position for the given carriage heights.
    fn forward(&self, g: &GeometryParameters, carriages: Vector3<f64>) -> Option<Vector3<f64>>;

    /// Whether the nozzle can reach `(x, y)`.
    fn is_reachable(&self, g: &GeometryParameters, x: f64, y: f64) -> bool;

    /// Carriage heights the firmware assumes right after homing.
    fn home_carriages(&self, g: &GeometryParameters) -> Option<Vector3<f64>> {
        self.inverse(g, Vector3::new(0.0, 0.0, f64::from(g.height)))
    }
}

/// Z the firmware reports when the nozzle touches a flat bed at z = 0 at
/// `(x, y)`, given that it believes `assumed` but the machine really is
/// `actual`.
///
/// Homing parks carriage `i` at the physical endstop plus the assumed
/// adjustment while the firmware believes it sits at the assumed home; every
/// later move is shifted by that difference.  Since shifting all carriages
/// by `d` moves the nozzle by exactly `d` in Z, the reading is the negated
/// real nozzle height at the believed bed position.
pub fn apparent_bed_height<K: Kinematics + ?Sized>(
    k: &K,
    assumed: &GeometryParameters,
    actual: &GeometryParameters,
    x: f64,
    y: f64,
) -> Option<f64> {
    let believed = k.inverse(assumed, Vector3::new(x, y, 0.0))?;
    let offsets = carriage_offsets(k, assumed, actual)?;
    Some(-k.forward(actual, believed + offsets)?.z)
}

/// Physical-minus-believed carriage position after homing with `assumed`.
pub fn carriage_offsets<K: Kinematics + ?Sized>(
    k: &K,
    assumed: &GeometryParameters,
    actual: &GeometryParameters,
) -> Option<Vector3<f64>> {
    let home_believed = k.home_carriages(assumed)?;
    let home_actual = k.home_carriages(actual)?;
    let adj = |g: &GeometryParameters| Vector3::from(g.endstop_adj.map(f64::from));
    let endstops = home_actual - adj(actual);
    Some(endstops + adj(assumed) - home_believed)
}

// ───────────────────────────────────────────────────────────────
// Delta
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaKinematics {
    pub diagonal_rod: f64,
    pub printable_radius: f64,
}

impl DeltaKinematics {
    pub fn new(diagonal_rod: f32, printable_radius: f32) -> Self {
        Self {
            diagonal_rod: f64::from(diagonal_rod),
            printable_radius: f64::from(printable_radius),
        }
    }

    /// XY of each tower's joint line.
    pub fn towers(&self, g: &GeometryParameters) -> [[f64; 2]; 3] {
        let r = f64::from(g.radius);
        let mut out = [[0.0; 2]; 3];
        for (i, t) in out.iter_mut().enumerate() {
            let a = (TOWER_ANGLES[i] + f64::from(g.tower_angle_trim[i])).to_radians();
            *t = [r * a.cos(), r * a.sin()];
        }
        out
    }
}

impl Kinematics for DeltaKinematics {
    fn inverse(&self, g: &GeometryParameters, p: Vector3<f64>) -> Option<Vector3<f64>> {
        let l2 = self.diagonal_rod * self.diagonal_rod;
        let mut out = Vector3::zeros();
        for (c, t) in out.iter_mut().zip(self.towers(g)) {
            let dx = p.x - t[0];
            let dy = p.y - t[1];
            let h2 = l2 - dx * dx - dy * dy;
            if h2 < 0.0 {
                return None;
            }
            *c = p.z + h2.sqrt();
        }
        Some(out)
    }

    /// Trilateration: intersect three rod-length spheres around the carriage
    /// joints and keep the solution below them.
    fn forward(&self, g: &GeometryParameters, carriages: Vector3<f64>) -> Option<Vector3<f64>> {
        let t = self.towers(g);
        let p1 = Vector3::new(t[0][0], t[0][1], carriages.x);
        let p2 = Vector3::new(t[1][0], t[1][1], carriages.y);
        let p3 = Vector3::new(t[2][0], t[2][1], carriages.z);

        let p12 = p2 - p1;
        let d = p12.norm();
        if d == 0.0 {
            return None;
        }
        let ex = p12 / d;

        let p13 = p3 - p1;
        let i = ex.dot(&p13);
        let ey_raw = p13 - ex * i;
        let j = ey_raw.norm();
        if j == 0.0 {
            return None;
        }
        let ey = ey_raw / j;
        let mut ez = ex.cross(&ey);
        if ez.z < 0.0 {
            ez = -ez;
        }

        // Equal sphere radii: the x coordinate in the local frame is d / 2.
        let xn = d / 2.0;
        let yn = ((i * i + j * j) / 2.0 - i * xn) / j;
        let zz = self.diagonal_rod * self.diagonal_rod - xn * xn - yn * yn;
        if zz < 0.0 {
            return None;
        }
        let zn = -zz.sqrt();

        Some(p1 + ex * xn + ey * yn + ez * zn)
    }

    fn is_reachable(&self, _g: &GeometryParameters, x: f64, y: f64) -> bool {
        x * x + y * y <= self.printable_radius * self.printable_radius + 1e-6
    }
}
