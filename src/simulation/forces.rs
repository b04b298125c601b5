//! Lennard-Jones force kernel.
//!
//! Provides the truncated-and-shifted LJ pair term, the analytic long-range
//! tail corrections, and the O(N^2) minimum-image pair loop used by the
//! integrator every step. All quantities are in reduced units.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use ultraviolet::DVec3;

use crate::ensemble::{minimum_image, Ensemble};
use crate::profile_scope;

/// Potential shift and tail corrections for a given cutoff and density.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TailCorrections {
    /// Pair energy at the cutoff, subtracted from every interacting pair.
    pub energy_at_cutoff: f64,
    /// Long-range energy correction added to the potential energy.
    pub energy: f64,
    /// Long-range pressure correction.
    pub pressure: f64,
}

impl TailCorrections {
    pub fn new(cutoff: f64, rho: f64, enabled: bool) -> Self {
        let rr3 = cutoff.powi(-3);
        let rr9 = rr3 * rr3 * rr3;
        let (energy, pressure) = if enabled {
            (
                8.0 * PI * rho * (rr9 / 9.0 - rr3 / 3.0),
                16.0 / 3.0 * PI * rho * rho * (2.0 / 3.0 * rr9 - rr3),
            )
        } else {
            (0.0, 0.0)
        };
        Self {
            energy_at_cutoff: 4.0 * (rr9 * rr3 - rr3 * rr3),
            energy,
            pressure,
        }
    }
}

/// Forces, potential energy and virial of one configuration.
#[derive(Clone, Debug, Default)]
pub struct ForceEvaluation {
    pub forces: Vec<DVec3>,
    pub potential: f64,
    pub virial: f64,
}

impl ForceEvaluation {
    fn zeros(n: usize) -> Self {
        Self {
            forces: vec![DVec3::zero(); n],
            potential: 0.0,
            virial: 0.0,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (f, g) in self.forces.iter_mut().zip(other.forces) {
            *f += g;
        }
        self.potential += other.potential;
        self.virial += other.virial;
        self
    }
}

/// Force on the first particle of a pair separated by `d = r_j - r_k`, and
/// the unshifted pair energy. The force on the second particle is the negation.
#[inline]
pub fn pair_interaction(d: DVec3) -> (DVec3, f64) {
    let r2i = 1.0 / d.mag_sq();
    let r6i = r2i * r2i * r2i;
    let magnitude = 48.0 * r2i * r6i * (r6i - 0.5);
    (d * magnitude, 4.0 * r6i * (r6i - 1.0))
}

/// Pairwise LJ kernel bound to a cutoff and its corrections.
///
/// The caller guarantees `cutoff < L/2`; `State` enforces it on construction.
#[derive(Clone, Copy, Debug)]
pub struct ForceField {
    pub cutoff: f64,
    pub corrections: TailCorrections,
    /// Split the pair loop across the rayon pool.
    pub parallel: bool,
}

impl ForceField {
    pub fn new(cutoff: f64, rho: f64, tail_corrections: bool, parallel: bool) -> Self {
        Self {
            cutoff,
            corrections: TailCorrections::new(cutoff, rho, tail_corrections),
            parallel,
        }
    }

    pub fn compute(&self, ensemble: &Ensemble) -> ForceEvaluation {
        profile_scope!("forces_lj");
        let n = ensemble.positions.len();
        let mut eval = if self.parallel {
            // Per-thread force buffers, merged after the loop.
            (0..n)
                .into_par_iter()
                .fold(
                    || ForceEvaluation::zeros(n),
                    |mut acc, j| {
                        self.accumulate_row(ensemble, j, &mut acc);
                        acc
                    },
                )
                .reduce(|| ForceEvaluation::zeros(n), ForceEvaluation::merge)
        } else {
            let mut acc = ForceEvaluation::zeros(n);
            for j in 0..n {
                self.accumulate_row(ensemble, j, &mut acc);
            }
            acc
        };
        eval.potential += self.corrections.energy;
        eval
    }

    /// Interactions of particle `j` with every `k > j`.
    #[inline]
    fn accumulate_row(&self, ensemble: &Ensemble, j: usize, acc: &mut ForceEvaluation) {
        let rc2 = self.cutoff * self.cutoff;
        let l = ensemble.box_length;
        let rj = ensemble.positions[j];
        for k in (j + 1)..ensemble.positions.len() {
            let d = minimum_image(rj - ensemble.positions[k], l);
            if d.mag_sq() > rc2 {
                continue;
            }
            let (f, e) = pair_interaction(d);
            acc.forces[j] += f;
            acc.forces[k] -= f;
            acc.potential += e - self.corrections.energy_at_cutoff;
            acc.virial += f.dot(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::Element;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pair(a: DVec3, b: DVec3, rho: f64) -> Ensemble {
        let mut rng = StdRng::seed_from_u64(0);
        Ensemble::from_parts(
            rho,
            Element::lookup("Ar").unwrap(),
            vec![a, b],
            Some(vec![DVec3::zero(); 2]),
            false,
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn corrections_disabled_keep_only_shift() {
        let c = TailCorrections::new(2.5, 0.8, false);
        assert_eq!(c.energy, 0.0);
        assert_eq!(c.pressure, 0.0);
        let expected = 4.0 * (2.5f64.powi(-12) - 2.5f64.powi(-6));
        assert!((c.energy_at_cutoff - expected).abs() < 1e-15);
    }

    #[test]
    fn corrections_match_closed_form() {
        let (rc, rho) = (2.5f64, 0.8f64);
        let c = TailCorrections::new(rc, rho, true);
        let e = 8.0 * PI * rho * (rc.powi(-9) / 9.0 - rc.powi(-3) / 3.0);
        let p = 16.0 / 3.0 * PI * rho * rho * (2.0 / 3.0 * rc.powi(-9) - rc.powi(-3));
        assert!((c.energy - e).abs() < 1e-12);
        assert!((c.pressure - p).abs() < 1e-12);
        assert!(c.energy < 0.0 && c.pressure < 0.0);
    }

    #[test]
    fn pair_force_vanishes_at_potential_minimum() {
        let rmin = 2f64.powf(1.0 / 6.0);
        let (f, e) = pair_interaction(DVec3::new(rmin, 0.0, 0.0));
        assert!(f.mag() < 1e-12);
        assert!((e + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pair_force_is_antisymmetric() {
        let d = DVec3::new(0.7, -0.4, 0.9);
        let (f_jk, e_jk) = pair_interaction(d);
        let (f_kj, e_kj) = pair_interaction(-d);
        assert_eq!(f_jk, -f_kj);
        assert_eq!(e_jk, e_kj);
    }

    #[test]
    fn pair_beyond_cutoff_is_ignored() {
        let e = pair(DVec3::new(1.0, 1.0, 1.0), DVec3::new(4.0, 1.0, 1.0), 0.002);
        let ff = ForceField::new(2.5, e.rho, false, false);
        let eval = ff.compute(&e);
        assert_eq!(eval.forces[0], DVec3::zero());
        assert_eq!(eval.potential, 0.0);
        assert_eq!(eval.virial, 0.0);
    }

    #[test]
    fn shifted_energy_and_virial_of_a_pair() {
        let e = pair(DVec3::new(1.0, 1.0, 1.0), DVec3::new(2.2, 1.0, 1.0), 0.002);
        let ff = ForceField::new(2.5, e.rho, false, false);
        let eval = ff.compute(&e);
        let r: f64 = 1.2;
        let u = 4.0 * (r.powi(-12) - r.powi(-6)) - ff.corrections.energy_at_cutoff;
        let w = 48.0 * (r.powi(-12) - 0.5 * r.powi(-6));
        assert!((eval.potential - u).abs() < 1e-12);
        assert!((eval.virial - w).abs() < 1e-12);
        assert_eq!(eval.forces[0], -eval.forces[1]);
    }

    #[test]
    fn tail_correction_added_to_potential() {
        let e = pair(DVec3::new(1.0, 1.0, 1.0), DVec3::new(4.0, 1.0, 1.0), 0.002);
        let ff = ForceField::new(2.5, e.rho, true, false);
        let eval = ff.compute(&e);
        assert_eq!(eval.potential, ff.corrections.energy);
    }

    #[test]
    fn parallel_matches_serial() {
        let mut rng = StdRng::seed_from_u64(11);
        let e = Ensemble::lattice(125, 0.7, Element::lookup("Ar").unwrap(), true, &mut rng)
            .unwrap();
        let serial = ForceField::new(2.5, e.rho, true, false).compute(&e);
        let parallel = ForceField::new(2.5, e.rho, true, true).compute(&e);
        assert!((serial.potential - parallel.potential).abs() < 1e-9);
        assert!((serial.virial - parallel.virial).abs() < 1e-9);
        for (a, b) in serial.forces.iter().zip(&parallel.forces) {
            assert!((*a - *b).mag() < 1e-9);
        }
    }

    #[test]
    fn net_force_is_zero() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut e = Ensemble::lattice(64, 0.5, Element::lookup("Ar").unwrap(), true, &mut rng)
            .unwrap();
        // jitter off the lattice so forces are not symmetric by construction
        for (i, r) in e.positions.iter_mut().enumerate() {
            *r += DVec3::new(0.01 * (i % 5) as f64, -0.013 * (i % 3) as f64, 0.007);
        }
        e.wrap();
        let eval = ForceField::new(2.5, e.rho, false, false).compute(&e);
        let net = eval.forces.iter().fold(DVec3::zero(), |acc, f| acc + *f);
        let scale = eval.forces.iter().map(|f| f.mag()).fold(0.0, f64::max);
        assert!(net.mag() <= 1e-12 * scale.max(1.0) * e.n() as f64);
    }
}
