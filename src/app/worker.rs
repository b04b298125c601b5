// Background run of one state with cooperative cancellation

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::panic;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::io::TrajectoryWriter;
use crate::simulation::{Observables, RunOutput, RunPlan, State};

/// Messages emitted by a running worker, in step order.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerEvent {
    /// Completed fraction in `[0, 1]`, sent whenever the whole percentage changes.
    Progress(f64),
    /// Observables at a sampled step.
    Sample(Observables),
    Finished { elapsed: Duration, stopped: bool },
}

/// Everything handed back by `SimulationWorker::join`.
#[derive(Debug)]
pub struct Completed {
    pub output: RunOutput,
    pub state: State,
    /// Trajectory files written, empty without a writer.
    pub files: Vec<PathBuf>,
}

pub struct SimulationWorker {
    stop: Arc<AtomicBool>,
    events: Receiver<WorkerEvent>,
    handle: JoinHandle<Result<Completed>>,
}

impl SimulationWorker {
    /// Move `state` onto a new thread and start `simulate` there.
    pub fn spawn(mut state: State, plan: RunPlan, writer: Option<TrajectoryWriter>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded();
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || -> Result<Completed> {
            let (output, files) = run(&mut state, &plan, writer, &flag, &tx)?;
            Ok(Completed {
                output,
                state,
                files,
            })
        });
        Self {
            stop,
            events: rx,
            handle,
        }
    }

    /// Ask the run to end at the next step boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Shared stop flag, e.g. for a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread; a panic inside the run is resumed on the caller.
    pub fn join(self) -> Result<Completed> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

fn run(
    state: &mut State,
    plan: &RunPlan,
    mut writer: Option<TrajectoryWriter>,
    stop: &AtomicBool,
    tx: &Sender<WorkerEvent>,
) -> Result<(RunOutput, Vec<PathBuf>)> {
    let start = Instant::now();
    let mut percent = 0u32;
    // a dropped receiver only means nobody is listening
    let output = state.simulate(plan, writer.as_mut(), stop, |report| {
        if report.sampled {
            let _ = tx.send(WorkerEvent::Sample(report.observables));
        }
        let now = (report.fraction() * 100.0) as u32;
        if now != percent {
            percent = now;
            let _ = tx.send(WorkerEvent::Progress(report.fraction()));
        }
    })?;
    let files = match writer {
        Some(w) => w.finish()?,
        None => Vec::new(),
    };
    let elapsed = start.elapsed();
    log::info!(
        "run finished after {:.2?} ({} rows{})",
        elapsed,
        output.series.len(),
        if output.stopped { ", stopped early" } else { "" }
    );
    let _ = tx.send(WorkerEvent::Finished {
        elapsed,
        stopped: output.stopped,
    });
    Ok((output, files))
}
