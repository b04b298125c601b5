// thermal.rs
// Temperature control: initial velocity rescale and the Andersen collision thermostat

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use ultraviolet::DVec3;

use crate::ensemble::Ensemble;
use crate::error::{Error, Result};

/// Kinetic temperature `2 KE / 3N` in reduced units.
#[inline]
pub fn kinetic_temperature(kinetic_energy: f64, n: usize) -> f64 {
    2.0 * kinetic_energy / (3.0 * n as f64)
}

/// Scale all velocities uniformly so the kinetic temperature equals `target`.
/// Returns the scale factor applied.
pub fn rescale_to_temperature(ensemble: &mut Ensemble, target: f64) -> Result<f64> {
    let current = kinetic_temperature(ensemble.kinetic_energy(), ensemble.n());
    if !(current > 0.0) || !current.is_finite() {
        return Err(Error::NumericalDegeneracy(format!(
            "cannot rescale velocities to T={target}: current temperature is {current}"
        )));
    }
    let scale = (target / current).sqrt();
    for v in &mut ensemble.velocities {
        *v *= scale;
    }
    Ok(scale)
}

/// Stochastic velocity resampling at a fixed mean collision rate.
///
/// Each step every particle collides with probability `nu * dt`; a colliding
/// particle gets a fresh velocity with every component drawn from
/// `N(0, sqrt(T_bath))`.
#[derive(Clone, Debug)]
pub struct AndersenThermostat {
    pub bath_temperature: f64,
    pub collision_frequency: f64,
    rng: StdRng,
    normal: Normal<f64>,
}

impl AndersenThermostat {
    /// `seed = None` draws the generator state from the OS.
    pub fn new(bath_temperature: f64, collision_frequency: f64, seed: Option<u64>) -> Result<Self> {
        if !bath_temperature.is_finite() || bath_temperature <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "bath temperature must be finite and > 0, got {bath_temperature}"
            )));
        }
        if !collision_frequency.is_finite() || collision_frequency < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "collision frequency must be finite and >= 0, got {collision_frequency}"
            )));
        }
        let normal = Normal::new(0.0, bath_temperature.sqrt())
            .map_err(|e| Error::InvalidParameter(format!("bath distribution: {e}")))?;
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            bath_temperature,
            collision_frequency,
            rng,
            normal,
        })
    }

    /// Resample colliding particles in place; returns how many collided.
    pub fn collide(&mut self, velocities: &mut [DVec3], dt: f64) -> usize {
        let chance = self.collision_frequency * dt;
        let mut collisions = 0;
        for v in velocities.iter_mut() {
            if self.rng.random::<f64>() < chance {
                *v = DVec3::new(
                    self.normal.sample(&mut self.rng),
                    self.normal.sample(&mut self.rng),
                    self.normal.sample(&mut self.rng),
                );
                collisions += 1;
            }
        }
        collisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::Element;

    fn ensemble(n: usize) -> Ensemble {
        let mut rng = StdRng::seed_from_u64(42);
        Ensemble::lattice(n, 0.5, Element::lookup("Ar").unwrap(), true, &mut rng).unwrap()
    }

    #[test]
    fn rescale_hits_target_exactly() {
        let mut e = ensemble(27);
        rescale_to_temperature(&mut e, 1.7).unwrap();
        let t = kinetic_temperature(e.kinetic_energy(), e.n());
        assert!((t - 1.7).abs() < 1e-12);
    }

    #[test]
    fn rescale_of_frozen_ensemble_is_degenerate() {
        let mut e = ensemble(8);
        for v in &mut e.velocities {
            *v = DVec3::zero();
        }
        let err = rescale_to_temperature(&mut e, 1.0).unwrap_err();
        assert!(matches!(err, Error::NumericalDegeneracy(_)));
    }

    #[test]
    fn zero_frequency_never_collides() {
        let mut thermostat = AndersenThermostat::new(2.0, 0.0, Some(1)).unwrap();
        let mut v = vec![DVec3::new(1.0, 2.0, 3.0); 100];
        assert_eq!(thermostat.collide(&mut v, 0.01), 0);
        assert!(v.iter().all(|x| *x == DVec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn certain_collision_samples_bath_distribution() {
        let t_bath = 2.5;
        let mut thermostat = AndersenThermostat::new(t_bath, 1.0, Some(9)).unwrap();
        let mut v = vec![DVec3::zero(); 20_000];
        // nu * dt = 1: every particle collides
        assert_eq!(thermostat.collide(&mut v, 1.0), v.len());
        let ke = 0.5 * v.iter().map(|x| x.mag_sq()).sum::<f64>();
        let t = kinetic_temperature(ke, v.len());
        assert!((t - t_bath).abs() / t_bath < 0.03, "T = {t}");
    }

    #[test]
    fn collision_rate_follows_nu_dt() {
        let mut thermostat = AndersenThermostat::new(1.0, 5.0, Some(3)).unwrap();
        let mut v = vec![DVec3::zero(); 10_000];
        let hits = thermostat.collide(&mut v, 0.02);
        // expected 1000, sd ~30
        assert!((850..1150).contains(&hits), "hits = {hits}");
    }

    #[test]
    fn invalid_bath_rejected() {
        assert!(AndersenThermostat::new(0.0, 1.0, None).is_err());
        assert!(AndersenThermostat::new(1.0, -1.0, None).is_err());
    }
}
