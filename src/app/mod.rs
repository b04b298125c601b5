use std::path::Path;

use crate::analysis::pair_correlation;
use crate::config::RunConfig;
use crate::error::Result;
use crate::io::{save_metadata, write_series_file, TrajectoryWriter};

pub mod worker;

pub use worker::{Completed, SimulationWorker, WorkerEvent};

pub const MIN_THREADS: usize = 3;
pub const THREADS_LEAVE_FREE: usize = 2;
/// Bin width of the g(r) printed after a run.
pub const GR_BIN_WIDTH: f64 = 0.02;
/// Progress is logged every this many percent.
pub const PROGRESS_LOG_PERCENT: f64 = 10.0;

/// Load the configuration, run it on a worker thread and write every output.
pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            log::info!("loading configuration from {}", path.display());
            RunConfig::load_from_file(path)?
        }
        None => RunConfig::load_default()?,
    };

    // Creates a global thread pool (using rayon) with threads = max(3, total cores) - 2
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(MIN_THREADS)
        - THREADS_LEAVE_FREE;
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        log::warn!("keeping the existing rayon pool: {e}");
    }

    let state = config.build_state()?;
    if let Some(dir) = config.run.output.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let meta = state.metadata();
    save_metadata(config.metadata_path(), &meta)?;
    log::info!("metadata written to {}", config.metadata_path().display());

    let writer = TrajectoryWriter::new(config.trajectory_options());
    let worker = SimulationWorker::spawn(state, config.plan(), Some(writer));
    let mut next_log = PROGRESS_LOG_PERCENT;
    for event in worker.events().iter() {
        match event {
            WorkerEvent::Progress(fraction) => {
                let percent = fraction * 100.0;
                if percent >= next_log {
                    log::info!("{percent:.0}% complete");
                    next_log += PROGRESS_LOG_PERCENT;
                }
            }
            WorkerEvent::Sample(obs) => {
                log::debug!(
                    "t={:.4} KE={:.6e} PE={:.6e} T={:.4} P={:.4}",
                    obs.time,
                    obs.kinetic,
                    obs.potential,
                    obs.temperature,
                    obs.pressure
                );
            }
            WorkerEvent::Finished { elapsed, stopped } => {
                log::info!("worker done in {elapsed:.2?} (stopped: {stopped})");
            }
        }
    }
    let Completed {
        output,
        state,
        files,
    } = worker.join()?;

    write_series_file(config.series_path(), &output.series)?;
    log::info!(
        "{} rows written to {}; {} trajectory file(s) under {}",
        output.series.len(),
        config.series_path().display(),
        files.len(),
        config.run.output.display()
    );
    match state.drift() {
        Ok(drift) => log::info!("final energy drift {drift:.3e}"),
        Err(e) => log::warn!("{e}"),
    }

    let gr = pair_correlation(&output.snapshots, state.cutoff(), GR_BIN_WIDTH)?;
    match gr.peak() {
        Some((r, g)) => println!(
            "g(r) peak at r = {r:.3} sigma (g = {g:.3}) from {} snapshot(s)",
            output.snapshots.len()
        ),
        None => println!("g(r) is empty"),
    }

    #[cfg(feature = "profiling")]
    crate::PROFILER.lock().log_and_clear();

    Ok(())
}
