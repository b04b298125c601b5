//! Particle ensemble in a periodic cubic box.
//!
//! Positions are stored folded into `[0, L)`; `images` counts the net number
//! of box crossings per axis so the unfolded trajectory is `r + i * L`.

use rand::Rng;
use rand_distr::Exp1;
use ultraviolet::DVec3;

use crate::error::{Error, Result};
use crate::species::Element;

/// Net periodic crossings along x, y, z.
pub type Image = [i32; 3];

#[derive(Clone, Debug)]
pub struct Ensemble {
    pub element: Element,
    /// Number density (reduced units).
    pub rho: f64,
    /// Cubic box edge, `(n / rho)^(1/3)`.
    pub box_length: f64,
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
    pub images: Vec<Image>,
}

impl Ensemble {
    /// Place `n` particles on the smallest enclosing cubic lattice and draw
    /// exponential velocities.
    pub fn lattice<R: Rng + ?Sized>(
        n: usize,
        rho: f64,
        element: Element,
        remove_drift: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let box_length = box_length(n, rho)?;
        let positions = cubic_grid(n)
            .into_iter()
            .map(|p| p * box_length)
            .collect();
        let velocities = exponential_velocities(n, rng);
        Ok(Self::assemble(
            element,
            rho,
            box_length,
            positions,
            velocities,
            remove_drift,
        ))
    }

    /// Reuse externally supplied arrays (e.g. a parsed trajectory frame).
    /// Missing velocities are drawn from the exponential distribution.
    pub fn from_parts<R: Rng + ?Sized>(
        rho: f64,
        element: Element,
        positions: Vec<DVec3>,
        velocities: Option<Vec<DVec3>>,
        remove_drift: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let n = positions.len();
        let box_length = box_length(n, rho)?;
        let velocities = match velocities {
            Some(v) if v.len() != n => {
                return Err(Error::InvalidParameter(format!(
                    "got {} velocities for {} positions",
                    v.len(),
                    n
                )))
            }
            Some(v) => v,
            None => exponential_velocities(n, rng),
        };
        Ok(Self::assemble(
            element,
            rho,
            box_length,
            positions,
            velocities,
            remove_drift,
        ))
    }

    fn assemble(
        element: Element,
        rho: f64,
        box_length: f64,
        positions: Vec<DVec3>,
        velocities: Vec<DVec3>,
        remove_drift: bool,
    ) -> Self {
        let images = vec![[0; 3]; positions.len()];
        let mut ensemble = Self {
            element,
            rho,
            box_length,
            positions,
            velocities,
            images,
        };
        if remove_drift {
            ensemble.remove_drift();
        }
        ensemble
    }

    /// Particle count, always `positions.len()`.
    pub fn n(&self) -> usize {
        self.positions.len()
    }

    /// Subtract the mean velocity so the net linear momentum is zero.
    pub fn remove_drift(&mut self) {
        if self.positions.is_empty() {
            return;
        }
        let mean = self.total_momentum() / self.n() as f64;
        for v in &mut self.velocities {
            *v -= mean;
        }
    }

    /// Sum of velocity vectors (unit mass).
    pub fn total_momentum(&self) -> DVec3 {
        self.velocities
            .iter()
            .fold(DVec3::zero(), |acc, v| acc + *v)
    }

    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.velocities.iter().map(|v| v.mag_sq()).sum::<f64>()
    }

    /// Fold every coordinate back into `[0, L)`, updating crossing counters.
    pub fn wrap(&mut self) {
        let l = self.box_length;
        for (r, image) in self.positions.iter_mut().zip(self.images.iter_mut()) {
            wrap_axis(&mut r.x, &mut image[0], l);
            wrap_axis(&mut r.y, &mut image[1], l);
            wrap_axis(&mut r.z, &mut image[2], l);
        }
    }

    /// Positions with periodic crossings undone, `r + i * L`.
    pub fn unfolded_positions(&self) -> Vec<DVec3> {
        let l = self.box_length;
        self.positions
            .iter()
            .zip(&self.images)
            .map(|(r, i)| *r + DVec3::new(i[0] as f64, i[1] as f64, i[2] as f64) * l)
            .collect()
    }

    /// Minimum-image displacement `r_j - r_k`.
    #[inline]
    pub fn displacement(&self, j: usize, k: usize) -> DVec3 {
        minimum_image(self.positions[j] - self.positions[k], self.box_length)
    }
}

fn box_length(n: usize, rho: f64) -> Result<f64> {
    if n == 0 {
        return Err(Error::InvalidParameter("ensemble needs at least one particle".into()));
    }
    if !rho.is_finite() || rho <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "density must be finite and > 0, got {rho}"
        )));
    }
    Ok((n as f64 / rho).cbrt())
}

fn exponential_velocities<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<DVec3> {
    (0..n)
        .map(|_| {
            let vx: f64 = rng.sample(Exp1);
            let vy: f64 = rng.sample(Exp1);
            let vz: f64 = rng.sample(Exp1);
            DVec3::new(vx, vy, vz)
        })
        .collect()
}

/// Cell centres of the smallest cubic grid holding `n` points, in the unit cube.
///
/// The first coordinate varies fastest.
pub fn cubic_grid(n: usize) -> Vec<DVec3> {
    let mut n3 = (n as f64).cbrt().ceil() as usize;
    while n3.pow(3) < n {
        n3 += 1;
    }
    while n3 > 1 && (n3 - 1).pow(3) >= n {
        n3 -= 1;
    }
    let cell = 1.0 / n3 as f64;
    let mut grid = Vec::with_capacity(n);
    'fill: for a in 0..n3 {
        for b in 0..n3 {
            for c in 0..n3 {
                if grid.len() == n {
                    break 'fill;
                }
                grid.push(DVec3::new(
                    (c as f64 + 0.5) * cell,
                    (b as f64 + 0.5) * cell,
                    (a as f64 + 0.5) * cell,
                ));
            }
        }
    }
    grid
}

/// Shift a coordinate by one box length if it left `[0, L)`.
#[inline]
pub fn wrap_axis(x: &mut f64, image: &mut i32, l: f64) {
    if *x >= l {
        *x -= l;
        *image += 1;
    } else if *x < 0.0 {
        *x += l;
        *image -= 1;
        // -tiny + L rounds to L
        if *x >= l {
            *x -= l;
            *image += 1;
        }
    }
}

/// Subtract the nearest multiple of `l` from each component.
#[inline]
pub fn minimum_image(d: DVec3, l: f64) -> DVec3 {
    DVec3::new(
        d.x - l * (d.x / l).round(),
        d.y - l * (d.y / l).round(),
        d.z - l * (d.z / l).round(),
    )
}
