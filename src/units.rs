//! Physical unit definitions and conversions.
//!
//! The integrator works in reduced Lennard-Jones units: lengths in sigma,
//! energies in epsilon, masses in the particle mass. `UnitTable` converts
//! reduced quantities back to SI for a given species.
//!
//! Catalog inputs:
//! - Mass: atomic mass unit (amu)
//! - Length: nanometre (nm)
//! - Energy: kelvin (epsilon / k_B)

use serde::{Deserialize, Serialize};

/// Boltzmann constant in J/K.
pub const BOLTZMANN_CONSTANT: f64 = 1.380_649e-23;
/// Atomic mass unit in kilograms (as tabulated by the species catalog).
pub const AMU: f64 = 1.661e-27;
/// Nanometre in metres.
pub const NANOMETRE: f64 = 1.0e-9;

/// Reduced-to-SI scale factors derived from (mass, sigma, epsilon).
///
/// Multiply a reduced quantity by the matching field to obtain SI units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitTable {
    /// m
    pub length: f64,
    /// J
    pub energy: f64,
    /// kg
    pub mass: f64,
    /// s
    pub time: f64,
    /// kg/m^3
    pub density: f64,
    /// K
    pub temperature: f64,
    /// Pa
    pub pressure: f64,
    /// m/s
    pub velocity: f64,
    /// N
    pub force: f64,
}

impl UnitTable {
    /// Derive the table from SI mass (kg), sigma (m) and epsilon (J).
    pub fn from_si(mass: f64, sigma: f64, epsilon: f64) -> Self {
        Self {
            length: sigma,
            energy: epsilon,
            mass,
            time: sigma * (mass / epsilon).sqrt(),
            density: mass / sigma.powi(3),
            temperature: epsilon / BOLTZMANN_CONSTANT,
            pressure: epsilon / sigma.powi(3),
            velocity: (epsilon / mass).sqrt(),
            force: epsilon / sigma,
        }
    }

    pub fn all_positive(&self) -> bool {
        [
            self.length,
            self.energy,
            self.mass,
            self.time,
            self.density,
            self.temperature,
            self.pressure,
            self.velocity,
            self.force,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0)
    }
}
