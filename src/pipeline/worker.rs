use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn};

use super::context::{PipelineContext, StopReason};
use super::StageKind;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Constructed with its buffers, thread not started.
    Idle = 0,
    Running = 1,
    /// Left the loop; releasing the stage.
    Draining = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The stage has nothing more to do; the worker exits.
    Finished,
}

/// One rate-domain step of the pipeline, driven by a `Worker`.
///
/// `step` processes at most one block. It may block on a handoff edge or a
/// device, but every such wait must return once `ctx.is_stopping()`.
pub trait Stage: Send {
    fn kind(&self) -> StageKind;

    fn step(&mut self, ctx: &PipelineContext) -> Result<Step, PipelineError>;

    /// Runs once after the loop, on the worker thread.
    fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

pub struct Worker {
    kind: StageKind,
    state: Arc<StateCell>,
    stage: Option<Box<dyn Stage>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(stage: Box<dyn Stage>) -> Self {
        Self {
            kind: stage.kind(),
            state: Arc::new(StateCell(AtomicU8::new(WorkerState::Idle as u8))),
            stage: Some(stage),
            handle: None,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Spawns the worker thread. Does nothing if already started.
    pub fn start(&mut self, ctx: &Arc<PipelineContext>) -> Result<(), PipelineError> {
        let Some(stage) = self.stage.take() else {
            return Ok(());
        };

        let kind = self.kind;
        let ctx = Arc::clone(ctx);
        let state = Arc::clone(&self.state);
        self.state.set(WorkerState::Running);

        let handle = thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || run(stage, &ctx, &state))
            .map_err(|source| {
                self.state.set(WorkerState::Stopped);
                PipelineError::ThreadStart { stage: kind, source }
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Waits up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if the thread is still running, typically stuck in a
    /// blocking device call; it is then detached.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            if self.stage.take().is_some() {
                self.state.set(WorkerState::Stopped);
            }
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(stage = %self.kind, "worker did not stop in time, detaching");
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }

        if handle.join().is_err() {
            error!(stage = %self.kind, "worker panicked");
            self.state.set(WorkerState::Stopped);
        }
        true
    }
}

// Stops the whole pipeline if the stage panics.
struct PanicGuard<'a> {
    kind: StageKind,
    ctx: &'a PipelineContext,
    state: &'a StateCell,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.ctx.request_stop(StopReason::Failure {
                stage: self.kind,
                message: "worker panicked".to_string(),
            });
            self.state.set(WorkerState::Stopped);
        }
    }
}

fn run(mut stage: Box<dyn Stage>, ctx: &PipelineContext, state: &StateCell) {
    let kind = stage.kind();
    let span = info_span!("worker", stage = %kind);
    let _enter = span.enter();
    let _guard = PanicGuard { kind, ctx, state };

    info!("started");
    let mut blocks: u64 = 0;
    while !ctx.is_stopping() {
        match stage.step(ctx) {
            Ok(Step::Continue) => blocks += 1,
            Ok(Step::Finished) => {
                debug!("stage finished");
                break;
            }
            Err(error) => {
                error!(%error, "stage failed");
                ctx.request_stop(StopReason::failure(kind, &error));
                break;
            }
        }
    }

    state.set(WorkerState::Draining);
    if let Err(error) = stage.shutdown() {
        error!(%error, "stage shutdown failed");
        ctx.request_stop(StopReason::failure(kind, &error));
    }
    drop(stage);

    state.set(WorkerState::Stopped);
    info!(steps = blocks, "stopped");
}
