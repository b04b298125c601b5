use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units::{UnitTable, AMU, BOLTZMANN_CONSTANT, NANOMETRE};

/// Catalog entry: Lennard-Jones parameters of a noble gas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeciesProps {
    /// amu
    pub mass: f64,
    /// nm
    pub sigma: f64,
    /// epsilon / k_B in K
    pub epsilon: f64,
}

pub static SPECIES_CATALOG: Lazy<HashMap<&'static str, SpeciesProps>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "Ne",
        SpeciesProps {
            mass: 20.180,
            sigma: 0.2782,
            epsilon: 34.9,
        },
    );
    m.insert(
        "Ar",
        SpeciesProps {
            mass: 39.948,
            sigma: 0.3405,
            epsilon: 119.8,
        },
    );
    m.insert(
        "Kr",
        SpeciesProps {
            mass: 83.798,
            sigma: 0.3650,
            epsilon: 162.6,
        },
    );
    m.insert(
        "Xe",
        SpeciesProps {
            mass: 131.293,
            sigma: 0.3950,
            epsilon: 229.0,
        },
    );
    m
});

/// Names of every species in the catalog, sorted.
pub fn available_species() -> Vec<&'static str> {
    let mut names: Vec<_> = SPECIES_CATALOG.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Immutable species record in SI units plus its reduced-unit table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    /// kg
    pub mass: f64,
    /// m
    pub sigma: f64,
    /// J
    pub epsilon: f64,
    pub units: UnitTable,
}

impl Element {
    /// Build an element from catalog-style inputs: mass in amu, sigma in nm,
    /// epsilon in kelvin.
    pub fn new(name: impl Into<String>, mass: f64, sigma: f64, epsilon: f64) -> Result<Self> {
        let name = name.into();
        for (label, value) in [("mass", mass), ("sigma", sigma), ("epsilon", epsilon)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "{label} of '{name}' must be finite and > 0, got {value}"
                )));
            }
        }
        let mass = mass * AMU;
        let sigma = sigma * NANOMETRE;
        let epsilon = epsilon * BOLTZMANN_CONSTANT;
        let units = UnitTable::from_si(mass, sigma, epsilon);
        if !units.all_positive() {
            return Err(Error::InvalidParameter(format!(
                "derived units of '{name}' are not all positive"
            )));
        }
        Ok(Self {
            name,
            mass,
            sigma,
            epsilon,
            units,
        })
    }

    /// Resolve `name` against the species catalog.
    pub fn lookup(name: &str) -> Result<Self> {
        let props = SPECIES_CATALOG
            .get(name)
            .ok_or_else(|| Error::UnknownSpecies(name.to_string()))?;
        Self::new(name, props.mass, props.sigma, props.epsilon)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, mass={:.3e} kg, sigma={:.3e} m, epsilon={:.3e} J",
            self.name, self.mass, self.sigma, self.epsilon
        )
    }
}
