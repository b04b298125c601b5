// Contains the ensemble state machine: owns an Ensemble, drives the force kernel
// every step and derives energies, temperature and pressure.
// NVE and NVT-Andersen share one velocity-Verlet step; `Dynamics` selects the
// per-step velocity hook at construction.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use ultraviolet::DVec3;

use super::forces::{ForceField, TailCorrections};
use super::thermal::{kinetic_temperature, rescale_to_temperature, AndersenThermostat};
use crate::ensemble::Ensemble;
use crate::error::{Error, Result};
use crate::io::{RunMetadata, ThermostatMetadata, TrajectoryWriter};
use crate::profile_scope;

/// Per-step velocity treatment applied right after the force recomputation.
#[derive(Clone, Debug)]
pub enum Dynamics {
    /// Microcanonical: plain velocity-Verlet.
    Nve,
    /// Canonical: velocity-Verlet plus Andersen collisions.
    Andersen(AndersenThermostat),
}

impl Dynamics {
    pub fn label(&self) -> &'static str {
        match self {
            Dynamics::Nve => "NVE",
            Dynamics::Andersen(_) => "NVT (Andersen)",
        }
    }

    fn after_forces(&mut self, velocities: &mut [DVec3], dt: f64) {
        match self {
            Dynamics::Nve => {}
            Dynamics::Andersen(thermostat) => {
                thermostat.collide(velocities, dt);
            }
        }
    }
}

/// Construction parameters shared by both dynamics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateParams {
    /// Target temperature for the initial rescale; `<= 0` keeps the velocities as given.
    pub initial_temperature: f64,
    pub cutoff: f64,
    pub tail_corrections: bool,
    #[serde(default)]
    pub parallel: bool,
}

/// Derived scalars of one instant, in reduced units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observables {
    pub time: f64,
    pub kinetic: f64,
    pub potential: f64,
    pub total: f64,
    /// `(TE - TE0) / TE0`; `None` when `TE0 == 0`.
    pub drift: Option<f64>,
    pub temperature: f64,
    pub pressure: f64,
}

impl Observables {
    pub const COLUMNS: [&'static str; 7] = ["time", "KE", "PE", "TE", "drift", "T", "P"];

    /// Row in `COLUMNS` order; undefined drift becomes NaN.
    pub fn row(&self) -> [f64; 7] {
        [
            self.time,
            self.kinetic,
            self.potential,
            self.total,
            self.drift.unwrap_or(f64::NAN),
            self.temperature,
            self.pressure,
        ]
    }
}

/// Fixed-timestep run description.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    /// Number of recorded rows, the initial state included.
    pub steps: usize,
    pub dt: f64,
    /// Retain (and write) a snapshot every this many steps.
    pub sample_every: usize,
}

impl RunPlan {
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(Error::InvalidParameter("steps must be > 0".into()));
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "timestep must be finite and > 0, got {}",
                self.dt
            )));
        }
        if self.sample_every == 0 {
            return Err(Error::InvalidParameter("sample_every must be > 0".into()));
        }
        Ok(())
    }
}

/// Progress notice handed to the `simulate` callback after every step.
#[derive(Clone, Copy, Debug)]
pub struct StepReport {
    pub step: usize,
    pub steps: usize,
    pub observables: Observables,
    /// A snapshot was retained at this step.
    pub sampled: bool,
}

impl StepReport {
    pub fn fraction(&self) -> f64 {
        self.step as f64 / self.steps as f64
    }
}

/// Result of `State::simulate`.
#[derive(Clone, Debug, Default)]
pub struct RunOutput {
    pub series: Vec<Observables>,
    pub snapshots: Vec<Ensemble>,
    /// The stop flag ended the run early.
    pub stopped: bool,
}

#[derive(Clone, Debug)]
pub struct State {
    pub time: f64,
    pub ensemble: Ensemble,
    pub force_field: ForceField,
    pub forces: Vec<DVec3>,
    pub dynamics: Dynamics,
    potential: f64,
    virial: f64,
    params: StateParams,
    initial_total: f64,
    observables: Observables,
}

impl State {
    /// Validate the cutoff, evaluate the initial forces and, when
    /// `initial_temperature > 0`, rescale velocities to it.
    pub fn new(mut ensemble: Ensemble, params: StateParams, dynamics: Dynamics) -> Result<Self> {
        let half_box = ensemble.box_length / 2.0;
        if !params.cutoff.is_finite() || params.cutoff <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "cutoff radius must be finite and > 0, got {}",
                params.cutoff
            )));
        }
        if params.cutoff >= half_box {
            return Err(Error::CutoffTooLarge {
                cutoff: params.cutoff,
                half_box,
            });
        }

        let force_field = ForceField::new(
            params.cutoff,
            ensemble.rho,
            params.tail_corrections,
            params.parallel,
        );
        let eval = force_field.compute(&ensemble);
        if params.initial_temperature > 0.0 {
            rescale_to_temperature(&mut ensemble, params.initial_temperature)?;
        }

        let mut state = Self {
            time: 0.0,
            ensemble,
            force_field,
            forces: eval.forces,
            dynamics,
            potential: eval.potential,
            virial: eval.virial,
            params,
            initial_total: 0.0,
            observables: Observables {
                time: 0.0,
                kinetic: 0.0,
                potential: 0.0,
                total: 0.0,
                drift: None,
                temperature: 0.0,
                pressure: 0.0,
            },
        };
        state.initial_total = state.ensemble.kinetic_energy() + state.potential;
        state.update_observables();
        if state.observables.drift.is_none() {
            log::warn!("initial total energy is exactly zero; energy drift is undefined for this run");
        }
        log::info!(
            "{} state: element={} N={} rho={} L={:.4} rc={} TE0={:.6e}",
            state.dynamics.label(),
            state.ensemble.element.name,
            state.ensemble.n(),
            state.ensemble.rho,
            state.ensemble.box_length,
            params.cutoff,
            state.initial_total
        );
        Ok(state)
    }

    pub fn nve(ensemble: Ensemble, params: StateParams) -> Result<Self> {
        Self::new(ensemble, params, Dynamics::Nve)
    }

    pub fn nvt_andersen(
        ensemble: Ensemble,
        params: StateParams,
        thermostat: AndersenThermostat,
    ) -> Result<Self> {
        Self::new(ensemble, params, Dynamics::Andersen(thermostat))
    }

    /// Advance by `dt` with velocity-Verlet, wrapping positions into the box.
    pub fn step(&mut self, dt: f64) {
        profile_scope!("step");
        self.time += dt;
        half_kick(&mut self.ensemble.velocities, &self.forces, dt);
        for (r, v) in self
            .ensemble
            .positions
            .iter_mut()
            .zip(&self.ensemble.velocities)
        {
            *r += *v * dt;
        }
        self.ensemble.wrap();

        let eval = self.force_field.compute(&self.ensemble);
        self.forces = eval.forces;
        self.potential = eval.potential;
        self.virial = eval.virial;

        self.dynamics.after_forces(&mut self.ensemble.velocities, dt);

        half_kick(&mut self.ensemble.velocities, &self.forces, dt);
        self.update_observables();
    }

    fn update_observables(&mut self) {
        let n = self.ensemble.n() as f64;
        let rho = self.ensemble.rho;
        let kinetic = self.ensemble.kinetic_energy();
        let temperature = kinetic_temperature(kinetic, self.ensemble.n());
        let total = self.potential + kinetic;
        let drift = if self.initial_total != 0.0 {
            Some((total - self.initial_total) / self.initial_total)
        } else {
            None
        };
        let pressure = rho * kinetic * 2.0 / (3.0 * n) + self.virial / (3.0 * n / rho);
        self.observables = Observables {
            time: self.time,
            kinetic,
            potential: self.potential,
            total,
            drift,
            temperature,
            pressure,
        };
    }

    /// Run `plan.steps` rows: the current state, then `steps - 1` steps.
    ///
    /// The current ensemble and every `sample_every`-th step are retained as
    /// snapshots and, with a writer, appended to the trajectory. `stop` is
    /// checked once per step boundary.
    pub fn simulate<F>(
        &mut self,
        plan: &RunPlan,
        mut writer: Option<&mut TrajectoryWriter>,
        stop: &AtomicBool,
        mut on_step: F,
    ) -> Result<RunOutput>
    where
        F: FnMut(&StepReport),
    {
        plan.validate()?;
        if let Dynamics::Andersen(thermostat) = &self.dynamics {
            if thermostat.collision_frequency * plan.dt >= 1.0 {
                log::warn!(
                    "nu*dt = {} >= 1: every particle is resampled every step",
                    thermostat.collision_frequency * plan.dt
                );
            }
        }
        log::info!(
            "running {} rows with dt={} (sampling every {})",
            plan.steps,
            plan.dt,
            plan.sample_every
        );

        let mut output = RunOutput {
            series: Vec::with_capacity(plan.steps),
            snapshots: vec![self.snapshot()],
            stopped: false,
        };
        output.series.push(self.observables);
        if let Some(w) = writer.as_deref_mut() {
            w.write(&self.ensemble, 0)?;
        }

        for i in 1..plan.steps {
            if stop.load(Ordering::Relaxed) {
                log::info!("stop requested at step {i}");
                output.stopped = true;
                break;
            }
            self.step(plan.dt);
            output.series.push(self.observables);
            let sampled = i % plan.sample_every == 0;
            if sampled {
                output.snapshots.push(self.snapshot());
                if let Some(w) = writer.as_deref_mut() {
                    w.write(&self.ensemble, i)?;
                }
                let obs = &self.observables;
                if !obs.total.is_finite() {
                    log::warn!("non-finite total energy at step {i}; the run has likely blown up");
                }
                log::debug!(
                    "step {i}: t={:.4} TE={:.6e} T={:.4} P={:.4} drift={:?}",
                    obs.time,
                    obs.total,
                    obs.temperature,
                    obs.pressure,
                    obs.drift
                );
            }
            on_step(&StepReport {
                step: i,
                steps: plan.steps,
                observables: self.observables,
                sampled,
            });
        }
        if let Some(w) = writer.as_deref_mut() {
            w.flush()?;
        }
        Ok(output)
    }

    /// Deep copy of the current ensemble, safe to hand to another thread.
    pub fn snapshot(&self) -> Ensemble {
        self.ensemble.clone()
    }

    pub fn observables(&self) -> &Observables {
        &self.observables
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.observables.kinetic
    }

    pub fn potential_energy(&self) -> f64 {
        self.potential
    }

    pub fn total_energy(&self) -> f64 {
        self.observables.total
    }

    pub fn initial_total_energy(&self) -> f64 {
        self.initial_total
    }

    pub fn temperature(&self) -> f64 {
        self.observables.temperature
    }

    pub fn pressure(&self) -> f64 {
        self.observables.pressure
    }

    /// Pressure including the long-range tail term (zero when corrections are off).
    pub fn corrected_pressure(&self) -> f64 {
        self.observables.pressure + self.force_field.corrections.pressure
    }

    pub fn virial(&self) -> f64 {
        self.virial
    }

    pub fn cutoff(&self) -> f64 {
        self.force_field.cutoff
    }

    pub fn params(&self) -> &StateParams {
        &self.params
    }

    pub fn corrections(&self) -> &TailCorrections {
        &self.force_field.corrections
    }

    /// Fractional energy drift; fails when the initial total energy is zero.
    pub fn drift(&self) -> Result<f64> {
        self.observables.drift.ok_or_else(|| {
            Error::NumericalDegeneracy("energy drift is undefined: initial total energy is zero".into())
        })
    }

    /// Parameters sufficient to rebuild an equivalent state.
    pub fn metadata(&self) -> RunMetadata {
        let thermostat = match &self.dynamics {
            Dynamics::Nve => None,
            Dynamics::Andersen(t) => Some(ThermostatMetadata {
                bath_temperature: t.bath_temperature,
                collision_frequency: t.collision_frequency,
            }),
        };
        RunMetadata {
            element: self.ensemble.element.name.clone(),
            particles: self.ensemble.n(),
            density: self.ensemble.rho,
            initial_temperature: self.params.initial_temperature,
            cutoff: self.params.cutoff,
            tail_corrections: self.params.tail_corrections,
            statistics: self.dynamics.label().to_string(),
            thermostat,
        }
    }
}

#[inline]
fn half_kick(velocities: &mut [DVec3], forces: &[DVec3], dt: f64) {
    for (v, f) in velocities.iter_mut().zip(forces) {
        *v += *f * (0.5 * dt);
    }
}
