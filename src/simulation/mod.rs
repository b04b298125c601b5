// simulation/mod.rs
// Re-exports and module declarations for the integrator and its force kernel

pub mod forces;
pub mod state;
pub mod thermal;

pub use forces::{pair_interaction, ForceEvaluation, ForceField, TailCorrections};
pub use state::{Dynamics, Observables, RunOutput, RunPlan, State, StateParams, StepReport};
pub use thermal::{kinetic_temperature, rescale_to_temperature, AndersenThermostat};
