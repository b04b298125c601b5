// config.rs
// Run configuration loaded from md_config.toml

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ensemble::Ensemble;
use crate::error::{Error, Result};
use crate::io::{ensemble_from_file, FrameFormat, RunMetadata, TrajectoryOptions};
use crate::simulation::{AndersenThermostat, Dynamics, RunPlan, State, StateParams};
use crate::species::Element;

pub const DEFAULT_CONFIG_PATH: &str = "md_config.toml";

// Front-end defaults
pub const DEFAULT_ELEMENT: &str = "Ar";
pub const DEFAULT_PARTICLES: usize = 216;
pub const DEFAULT_DENSITY: f64 = 0.84;
pub const DEFAULT_INITIAL_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_CUTOFF: f64 = 2.5;
pub const DEFAULT_BATH_TEMPERATURE: f64 = 4.0;
pub const DEFAULT_COLLISION_FREQUENCY: f64 = 0.1;
pub const DEFAULT_STEPS: usize = 10_000;
pub const DEFAULT_DT: f64 = 0.001;
pub const DEFAULT_SAMPLE_EVERY: usize = 1_000;
pub const DEFAULT_OUTPUT: &str = "md_output/run";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub element: String,
    pub particles: usize,
    pub density: f64,
    /// `<= 0` keeps the drawn (or loaded) velocities unscaled.
    pub initial_temperature: f64,
    pub cutoff: f64,
    pub tail_corrections: bool,
    pub remove_drift: bool,
    /// Seeds both the initial velocities and the thermostat; OS entropy when omitted.
    pub seed: Option<u64>,
    /// Start from the first frame of this trajectory instead of a lattice.
    /// The particle count and species then come from the file.
    pub init_file: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            element: DEFAULT_ELEMENT.to_string(),
            particles: DEFAULT_PARTICLES,
            density: DEFAULT_DENSITY,
            initial_temperature: DEFAULT_INITIAL_TEMPERATURE,
            cutoff: DEFAULT_CUTOFF,
            tail_corrections: false,
            remove_drift: true,
            seed: None,
            init_file: None,
        }
    }
}

/// Presence of this section selects NVT (Andersen) dynamics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub bath_temperature: f64,
    pub collision_frequency: f64,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            bath_temperature: DEFAULT_BATH_TEMPERATURE,
            collision_frequency: DEFAULT_COLLISION_FREQUENCY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub steps: usize,
    pub dt: f64,
    pub sample_every: usize,
    /// Prefix of every output file.
    pub output: PathBuf,
    pub unfold: bool,
    pub single_file: bool,
    pub write_velocities: bool,
    pub compress: bool,
    pub parallel: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            dt: DEFAULT_DT,
            sample_every: DEFAULT_SAMPLE_EVERY,
            output: PathBuf::from(DEFAULT_OUTPUT),
            unfold: false,
            single_file: true,
            write_velocities: true,
            compress: false,
            parallel: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub system: SystemConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thermostat: Option<ThermostatConfig>,
    pub run: RunSection,
}

impl RunConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `md_config.toml`, or fall back to the defaults when it is absent.
    pub fn load_default() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from_file(DEFAULT_CONFIG_PATH)
        } else {
            log::info!("{DEFAULT_CONFIG_PATH} not found, using built-in defaults");
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidParameter(format!("cannot serialise configuration: {e}")))
    }

    /// Configuration reproducing the system a metadata record describes.
    /// Run settings keep their defaults.
    pub fn from_metadata(meta: &RunMetadata) -> Self {
        Self {
            system: SystemConfig {
                element: meta.element.clone(),
                particles: meta.particles,
                density: meta.density,
                initial_temperature: meta.initial_temperature,
                cutoff: meta.cutoff,
                tail_corrections: meta.tail_corrections,
                ..SystemConfig::default()
            },
            thermostat: meta.thermostat.as_ref().map(|t| ThermostatConfig {
                bath_temperature: t.bath_temperature,
                collision_frequency: t.collision_frequency,
            }),
            run: RunSection::default(),
        }
    }

    /// Reject every bad numeric field before anything is allocated.
    pub fn validate(&self) -> Result<()> {
        let sys = &self.system;
        Element::lookup(&sys.element)?;
        if sys.init_file.is_none() && sys.particles == 0 {
            return Err(Error::InvalidParameter("particles must be > 0".into()));
        }
        positive("density", sys.density)?;
        positive("cutoff", sys.cutoff)?;
        if !sys.initial_temperature.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "initial_temperature must be finite, got {}",
                sys.initial_temperature
            )));
        }
        // with an init file N is only known once the file is read; State::new checks then
        if sys.init_file.is_none() {
            let half_box = (sys.particles as f64 / sys.density).cbrt() / 2.0;
            if sys.cutoff >= half_box {
                return Err(Error::CutoffTooLarge {
                    cutoff: sys.cutoff,
                    half_box,
                });
            }
        }
        if let Some(t) = &self.thermostat {
            positive("bath_temperature", t.bath_temperature)?;
            if !t.collision_frequency.is_finite() || t.collision_frequency < 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "collision_frequency must be finite and >= 0, got {}",
                    t.collision_frequency
                )));
            }
        }
        self.plan().validate()
    }

    pub fn plan(&self) -> RunPlan {
        RunPlan {
            steps: self.run.steps,
            dt: self.run.dt,
            sample_every: self.run.sample_every,
        }
    }

    pub fn state_params(&self) -> StateParams {
        StateParams {
            initial_temperature: self.system.initial_temperature,
            cutoff: self.system.cutoff,
            tail_corrections: self.system.tail_corrections,
            parallel: self.run.parallel,
        }
    }

    pub fn trajectory_options(&self) -> TrajectoryOptions {
        TrajectoryOptions {
            prefix: self.run.output.clone(),
            single_file: self.run.single_file,
            format: FrameFormat {
                velocities: self.run.write_velocities,
                unfold: self.run.unfold,
            },
            compress: self.run.compress,
        }
    }

    /// `{output}.txt`
    pub fn series_path(&self) -> PathBuf {
        with_suffix(&self.run.output, ".txt")
    }

    /// `{output}.json`
    pub fn metadata_path(&self) -> PathBuf {
        with_suffix(&self.run.output, ".json")
    }

    pub fn rng(&self) -> StdRng {
        match self.system.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        }
    }

    pub fn build_ensemble(&self) -> Result<Ensemble> {
        let sys = &self.system;
        let mut rng = self.rng();
        match &sys.init_file {
            Some(path) => {
                log::info!("reading initial configuration from {}", path.display());
                let ensemble = ensemble_from_file(path, sys.density, sys.remove_drift, &mut rng)?;
                if self.overridden_by_file(&ensemble) {
                    log::warn!(
                        "{} holds {} x {}; configured {} x {} ignored",
                        path.display(),
                        ensemble.n(),
                        ensemble.element.name,
                        sys.particles,
                        sys.element
                    );
                }
                Ok(ensemble)
            }
            None => {
                let element = Element::lookup(&sys.element)?;
                Ensemble::lattice(sys.particles, sys.density, element, sys.remove_drift, &mut rng)
            }
        }
    }

    /// The file's species or particle count differs from `[system]`.
    pub fn overridden_by_file(&self, ensemble: &Ensemble) -> bool {
        ensemble.element.name != self.system.element || ensemble.n() != self.system.particles
    }

    /// Validate, then build the ensemble and its NVE or NVT state.
    pub fn build_state(&self) -> Result<State> {
        self.validate()?;
        let ensemble = self.build_ensemble()?;
        let dynamics = match &self.thermostat {
            None => Dynamics::Nve,
            Some(t) => {
                // offset so velocities and collisions draw from different streams
                let seed = self.system.seed.map(|s| s.wrapping_add(1));
                Dynamics::Andersen(AndersenThermostat::new(
                    t.bath_temperature,
                    t.collision_frequency,
                    seed,
                )?)
            }
        };
        State::new(ensemble, self.state_params(), dynamics)
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "{name} must be finite and > 0, got {value}"
        )));
    }
    Ok(())
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{write_xyz_file, ThermostatMetadata};

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert!(config.thermostat.is_none());
        assert_eq!(config.system.particles, 216);
        assert_eq!(config.plan().sample_every, 1000);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
            [system]
            element = "Kr"
            particles = 125
            seed = 7

            [thermostat]
            bath_temperature = 1.5

            [run]
            steps = 50
            output = "out/kr"
            "#,
        )
        .unwrap();
        assert_eq!(config.system.element, "Kr");
        assert_eq!(config.system.density, DEFAULT_DENSITY);
        let t = config.thermostat.as_ref().unwrap();
        assert_eq!(t.bath_temperature, 1.5);
        assert_eq!(t.collision_frequency, DEFAULT_COLLISION_FREQUENCY);
        assert_eq!(config.run.dt, DEFAULT_DT);
        assert_eq!(config.series_path(), PathBuf::from("out/kr.txt"));
        assert_eq!(config.metadata_path(), PathBuf::from("out/kr.json"));
    }

    #[test]
    fn toml_round_trip() {
        let mut config = RunConfig::default();
        config.thermostat = Some(ThermostatConfig::default());
        config.system.seed = Some(3);
        let text = config.to_toml_string().unwrap();
        assert_eq!(RunConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = RunConfig::from_toml_str("[system]\nparticles = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut c = RunConfig::default();
        c.system.element = "Og".into();
        assert!(matches!(c.validate(), Err(Error::UnknownSpecies(_))));

        let mut c = RunConfig::default();
        c.system.cutoff = 3.5;
        assert!(matches!(c.validate(), Err(Error::CutoffTooLarge { .. })));

        let mut c = RunConfig::default();
        c.system.density = 0.0;
        assert!(c.validate().unwrap_err().is_configuration());

        let mut c = RunConfig::default();
        c.run.sample_every = 0;
        assert!(c.validate().is_err());

        let mut c = RunConfig::default();
        c.thermostat = Some(ThermostatConfig {
            bath_temperature: -1.0,
            collision_frequency: 0.1,
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn build_state_selects_dynamics() {
        let mut c = RunConfig::default();
        c.system.particles = 64;
        c.system.density = 0.5;
        c.system.seed = Some(11);
        let nve = c.build_state().unwrap();
        assert!(matches!(nve.dynamics, Dynamics::Nve));
        assert!((nve.temperature() - DEFAULT_INITIAL_TEMPERATURE).abs() < 1e-12);

        c.thermostat = Some(ThermostatConfig::default());
        let nvt = c.build_state().unwrap();
        assert!(matches!(nvt.dynamics, Dynamics::Andersen(_)));
        // same seed, same starting point
        assert_eq!(nve.ensemble.velocities, nvt.ensemble.velocities);
    }

    #[test]
    fn init_file_overrides_lattice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start.xyz");
        let mut rng = StdRng::seed_from_u64(5);
        let source = Ensemble::lattice(27, 0.3, Element::lookup("Xe").unwrap(), true, &mut rng).unwrap();
        write_xyz_file(&path, &source, false, FrameFormat::default()).unwrap();

        let mut c = RunConfig::default();
        c.system.init_file = Some(path);
        c.system.density = 0.3;
        c.system.cutoff = 1.5;
        c.system.initial_temperature = 0.0;
        let state = c.build_state().unwrap();
        assert_eq!(state.ensemble.n(), 27);
        assert_eq!(state.ensemble.element.name, "Xe");
        // defaults name 216 Ar, so the file contents win with a warning
        assert!(c.overridden_by_file(&state.ensemble));
        c.system.element = "Xe".into();
        c.system.particles = 27;
        assert!(!c.overridden_by_file(&state.ensemble));
        assert!((state.ensemble.positions[4] - source.positions[4]).mag() < 1e-7);
    }

    #[test]
    fn metadata_rebuilds_configuration() {
        let meta = RunMetadata {
            element: "Ne".into(),
            particles: 125,
            density: 0.6,
            initial_temperature: 1.1,
            cutoff: 2.0,
            tail_corrections: true,
            statistics: "NVT (Andersen)".into(),
            thermostat: Some(ThermostatMetadata {
                bath_temperature: 1.2,
                collision_frequency: 0.5,
            }),
        };
        let c = RunConfig::from_metadata(&meta);
        c.validate().unwrap();
        assert_eq!(c.system.particles, 125);
        assert!(c.system.tail_corrections);
        assert_eq!(c.thermostat.unwrap().collision_frequency, 0.5);
    }
}
