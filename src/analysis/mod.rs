// analysis/mod.rs
// Post-hoc structural analysis of retained snapshots

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::ensemble::{minimum_image, Ensemble};
use crate::error::{Error, Result};
use crate::profile_scope;

/// Radial distribution function sampled at bin centres.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PairCorrelation {
    /// Bin-centre radii, `dr * (b + 0.5)`.
    pub r: Vec<f64>,
    pub g: Vec<f64>,
}

impl PairCorrelation {
    pub fn len(&self) -> usize {
        self.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    /// `(r, g)` of the highest bin.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.r
            .iter()
            .zip(&self.g)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(r, g)| (*r, *g))
    }
}

/// Unordered-pair histogram of one configuration; every pair within `rc`
/// counts twice, once from each particle.
pub fn pair_histogram(ensemble: &Ensemble, rc: f64, dr: f64, nbins: usize) -> Vec<u64> {
    let mut hist = vec![0u64; nbins];
    let l = ensemble.box_length;
    let positions = &ensemble.positions;
    for j in 0..positions.len() {
        for k in (j + 1)..positions.len() {
            let d = minimum_image(positions[j] - positions[k], l).mag();
            if d < rc {
                let bin = (d / dr) as usize;
                if bin < nbins {
                    hist[bin] += 2;
                }
            }
        }
    }
    hist
}

/// g(r) accumulated over `snapshots`, normalised by the ideal-gas shell count.
///
/// All snapshots must share particle count; density and count are taken from
/// the first one.
pub fn pair_correlation(snapshots: &[Ensemble], rc: f64, dr: f64) -> Result<PairCorrelation> {
    profile_scope!("pair_correlation");
    let Some(first) = snapshots.first() else {
        return Err(Error::InvalidParameter(
            "pair correlation needs at least one snapshot".into(),
        ));
    };
    if !dr.is_finite() || dr <= 0.0 {
        return Err(Error::InvalidParameter(format!("bin width must be > 0, got {dr}")));
    }
    if !rc.is_finite() || rc <= 0.0 {
        return Err(Error::InvalidParameter(format!("cutoff must be > 0, got {rc}")));
    }
    if let Some(odd) = snapshots.iter().find(|s| s.n() != first.n()) {
        return Err(Error::InvalidParameter(format!(
            "snapshots disagree on particle count: {} vs {}",
            first.n(),
            odd.n()
        )));
    }
    if rc > first.box_length / 2.0 {
        log::warn!(
            "g(r) cutoff {rc} exceeds half the box ({}); outer bins double count images",
            first.box_length / 2.0
        );
    }

    let nbins = (rc / dr) as usize + 1;
    let hist = snapshots
        .par_iter()
        .map(|s| pair_histogram(s, rc, dr, nbins))
        .reduce(
            || vec![0u64; nbins],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        );

    let n = first.n() as f64;
    let rho = first.rho;
    let frames = snapshots.len() as f64;
    let (r, g): (Vec<f64>, Vec<f64>) = hist
        .iter()
        .enumerate()
        .map(|(b, &count)| {
            let b = b as f64;
            let shell = ((b + 1.0).powi(3) - b.powi(3)) * dr.powi(3);
            let ideal = 4.0 / 3.0 * PI * shell * rho * n * frames;
            (dr * (b + 0.5), count as f64 / ideal)
        })
        .unzip();
    log::debug!("g(r) from {} snapshots, {} bins", snapshots.len(), nbins);
    Ok(PairCorrelation { r, g })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::Element;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use ultraviolet::DVec3;

    fn argon() -> Element {
        Element::lookup("Ar").unwrap()
    }

    #[test]
    fn sparse_uniform_gas_is_flat() {
        let (n, rho) = (400usize, 0.01);
        let l = (n as f64 / rho).cbrt();
        let mut rng = StdRng::seed_from_u64(2024);
        let positions: Vec<DVec3> = (0..n)
            .map(|_| {
                DVec3::new(
                    rng.random::<f64>() * l,
                    rng.random::<f64>() * l,
                    rng.random::<f64>() * l,
                )
            })
            .collect();
        let e = Ensemble::from_parts(rho, argon(), positions, None, true, &mut rng).unwrap();
        let (rc, dr) = (15.0, 1.5);
        let gr = pair_correlation(&[e], rc, dr).unwrap();
        assert_eq!(gr.len(), 11);
        // bins fully inside rc with enough pairs for a few-percent estimate
        for b in 2..10 {
            assert!((gr.g[b] - 1.0).abs() < 0.2, "g[{b}] = {}", gr.g[b]);
        }
        // the last bin starts at rc and never receives counts
        assert_eq!(gr.g[10], 0.0);
        assert!((gr.r[0] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn lattice_has_no_pairs_below_spacing() {
        let mut rng = StdRng::seed_from_u64(1);
        let e = Ensemble::lattice(216, 0.5, argon(), true, &mut rng).unwrap();
        let spacing = e.box_length / 6.0;
        let gr = pair_correlation(&[e.clone(), e], 2.5, 0.05).unwrap();
        for (r, g) in gr.r.iter().zip(&gr.g) {
            if *r < spacing - 0.05 {
                assert_eq!(*g, 0.0, "r = {r}");
            }
        }
        let first = gr.g.iter().position(|g| *g > 0.0).unwrap();
        assert!((gr.r[first] - spacing).abs() <= 0.05);
        assert!(gr.peak().unwrap().1 > 1.0);
    }

    #[test]
    fn histogram_counts_each_pair_from_both_sides() {
        let mut rng = StdRng::seed_from_u64(0);
        let positions = vec![DVec3::new(0.1, 0.1, 0.1), DVec3::new(9.9, 0.1, 0.1)];
        let e = Ensemble::from_parts(0.002, argon(), positions, None, false, &mut rng).unwrap();
        // minimum-image distance 0.2 lands in bin 0 for dr = 0.5
        let hist = pair_histogram(&e, 2.0, 0.5, 5);
        assert_eq!(hist, vec![2, 0, 0, 0, 0]);
    }

    #[test]
    fn invalid_inputs_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let a = Ensemble::lattice(8, 0.5, argon(), true, &mut rng).unwrap();
        let b = Ensemble::lattice(27, 0.5, argon(), true, &mut rng).unwrap();
        assert!(pair_correlation(&[], 1.0, 0.1).is_err());
        assert!(pair_correlation(&[a.clone()], 1.0, 0.0).is_err());
        assert!(pair_correlation(&[a.clone()], -1.0, 0.1).is_err());
        assert!(pair_correlation(&[a, b], 1.0, 0.1).is_err());
    }
}
