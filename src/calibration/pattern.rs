//! Probe point patterns for delta auto-calibration.
//!
//! Seven nominal points: the centre (index 0) and six on the calibration
//! radius at 210°, 270°, 330°, 30°, 90°, 150° (indices 1..=6).  Towers A, B,
//! C sit at 1, 3, 5 and their opposites at 2, 4, 6.
//!
//! | P    | Probed                                                   |
//! |------|----------------------------------------------------------|
//! | 0    | nothing (normalise only)                                 |
//! | 1    | centre                                                   |
//! | 2    | centre + towers (opposites with `T`)                     |
//! | 3    | 3 centre-circle points + 6 radial                        |
//! | 4..7 | centre (+ circle) + 2, 3, 5, 7 points per arc segment    |
//! | 8..10| as above on three concentric circles, zig-zag            |

use core::f32::consts::FRAC_PI_2;

use heapless::Vec;

use crate::error::CalibrationError;

/// Nominal points on the radius.
pub const NPP: usize = 6;
/// Index of the centre point.
pub const CEN: usize = 0;
/// Largest pattern (P10) is 100 sites.
pub const MAX_SITES: usize = 128;

const TOWERS: [usize; 4] = [CEN, 1, 3, 5];
const OPPOSITES: [usize; 4] = [CEN, 2, 4, 6];
const ALL: [usize; NPP + 1] = [0, 1, 2, 3, 4, 5, 6];

/// Where one probe site's reading is accumulated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SiteTarget {
    Centre,
    /// Fractional nominal index in `1.0..7.0`.
    Radial(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub x: f32,
    pub y: f32,
    pub target: SiteTarget,
}

/// Angle in degrees of a (possibly fractional) nominal index.
pub fn nominal_angle(rad: f32) -> f32 {
    210.0 + (360.0 / NPP as f32) * (rad - 1.0)
}

fn polar(rad: f32, r: f32) -> (f32, f32) {
    let a = nominal_angle(rad).to_radians();
    (r * a.cos(), r * a.sin())
}

/// Arc subdivisions for P3..=P10.
fn subdivisions(points: u8) -> u8 {
    match points {
        3 => 1,
        4 => 2,
        5 => 3,
        6 => 5,
        7 => 7,
        8 => 9,
        9 => 12,
        _ => 15,
    }
}

#[derive(Debug, Clone)]
pub struct ProbePattern {
    points: u8,
    towers: bool,
    radius: f32,
    sites: Vec<Site, MAX_SITES>,
    centre_sites: u8,
}

impl ProbePattern {
    /// Lay out pattern `points` on `radius`.  `towers` false (G33 T) swaps
    /// the P2 towers for their opposites and drops the trim results.
    pub fn new(points: u8, towers: bool, radius: f32) -> Result<Self, CalibrationError> {
        if points > 10 {
            return Err(CalibrationError::InvalidParameter("?(P)oints is implausible (0 - 10)."));
        }
        let mut pattern = Self { points, towers, radius, sites: Vec::new(), centre_sites: 0 };
        if points == 0 {
            return Ok(pattern);
        }

        if !matches!(points, 3 | 6 | 9) {
            pattern.push(0.0, 0.0, SiteTarget::Centre)?;
        }

        if points >= 3 {
            // Counted in thirds of a nominal step so P8+ can offset by 1/3.
            let (start, step) = match points {
                8.. => (19i16, 2i16),
                5..=7 => (18, 3),
                _ => (15, 6),
            };
            let mut thirds = start;
            while thirds >= 3 {
                let (x, y) = polar(f32::from(thirds) / 3.0, radius * 0.1);
                pattern.push(x, y, SiteTarget::Centre)?;
                thirds -= step;
            }
        }

        if points == 2 {
            let start = if towers { 1 } else { 2 };
            for rad in [start, start + 2, start + 4] {
                let rad = rad as f32;
                let (x, y) = polar(rad, radius);
                pattern.push(x, y, SiteTarget::Radial(rad))?;
            }
        } else if points >= 3 {
            let n = u16::from(subdivisions(points));
            let nine_centre = points >= 8;
            let stride = if nine_centre { 3 } else { 1 };
            let circles = if nine_centre { 3 } else { 1 };
            let mut zig_zag = true;
            for j in (0..NPP as u16 * n).step_by(stride) {
                let rad = 1.0 + f32::from(j) / f32::from(n);
                for circle in 0..circles {
                    let ring = if circles == 1 {
                        0
                    } else if zig_zag {
                        circles - 1 - circle
                    } else {
                        circle
                    };
                    let (x, y) = polar(rad, radius * (1.0 - 0.1 * ring as f32));
                    pattern.push(x, y, SiteTarget::Radial(rad))?;
                }
                zig_zag = !zig_zag;
            }
        }
        Ok(pattern)
    }

    fn push(&mut self, x: f32, y: f32, target: SiteTarget) -> Result<(), CalibrationError> {
        if target == SiteTarget::Centre {
            self.centre_sites += 1;
        }
        self.sites
            .push(Site { x, y, target })
            .map_err(|_| CalibrationError::InvalidParameter("pattern too large"))
    }

    pub fn points(&self) -> u8 {
        self.points
    }

    pub fn towers(&self) -> bool {
        self.towers
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Nominal indices that contribute to the metric and the solve.
    pub fn active(&self) -> &'static [usize] {
        match (self.points, self.towers) {
            (0, _) => &[],
            (1, _) => &ALL[..1],
            (2, true) => &TOWERS,
            (2, false) => &OPPOSITES,
            _ => &ALL,
        }
    }

    pub fn has_tower_results(&self) -> bool {
        (self.points == 2 && self.towers) || self.points >= 3
    }

    pub fn has_opposite_results(&self) -> bool {
        (self.points == 2 && !self.towers) || self.points >= 3
    }

    /// Radius the nominal points effectively sit on (three circles average
    /// to 0.9 R).
    pub fn effective_radius(&self) -> f32 {
        if self.points >= 8 { self.radius * 0.9 } else { self.radius }
    }

    /// XY of nominal point `index` on the effective radius.
    pub fn nominal_xy(&self, index: usize) -> (f32, f32) {
        if index == CEN {
            (0.0, 0.0)
        } else {
            polar(index as f32, self.effective_radius())
        }
    }

    /// Fold per-site readings (same order as [`sites`](Self::sites)) into
    /// the seven nominal heights.  Interpolated readings are shared between
    /// the two neighbouring nominal points with cos²/sin² weights.
    pub fn reduce(&self, readings: &[f32]) -> [f32; NPP + 1] {
        let mut z = [0.0f32; NPP + 1];
        for (site, &reading) in self.sites.iter().zip(readings) {
            match site.target {
                SiteTarget::Centre => z[CEN] += reading,
                SiteTarget::Radial(rad) => {
                    let interpol = rad.fract();
                    let base = (rad - interpol).round() as usize;
                    let (s, c) = (interpol * FRAC_PI_2).sin_cos();
                    z[(base + NPP - 1) % NPP + 1] += reading * c * c;
                    z[base % NPP + 1] += reading * s * s;
                }
            }
        }
        if self.centre_sites > 0 {
            z[CEN] /= f32::from(self.centre_sites);
        }
        if self.points >= 4 {
            let n = f32::from(subdivisions(self.points));
            for v in &mut z[1..] {
                *v /= n;
            }
        }
        z
    }

    /// Zero-plane standard deviation: RMS of the active nominal heights,
    /// centre included, rounded to 0.001.
    pub fn std_dev(&self, z: &[f32; NPP + 1]) -> f32 {
        let active = self.active();
        if active.is_empty() {
            return 0.0;
        }
        let sum: f32 = active.iter().map(|&i| z[i] * z[i]).sum();
        ((sum / active.len() as f32).sqrt() * 1000.0).round() / 1000.0
    }
}
