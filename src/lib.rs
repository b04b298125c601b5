pub mod analysis;
pub mod app;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod io;
pub mod profiler;
pub mod simulation;
pub mod species;
pub mod units;

pub use error::{Error, Result};

#[cfg(feature = "profiling")]
use once_cell::sync::Lazy;
#[cfg(feature = "profiling")]
use parking_lot::Mutex;

#[cfg(feature = "profiling")]
pub static PROFILER: Lazy<Mutex<profiler::Profiler>> =
    Lazy::new(|| Mutex::new(profiler::Profiler::new()));
