//! The threaded block pipeline.
//!
//! Input -> Resample(in) -> Generate -> Resample(out) -> Output, one worker
//! thread per stage, joined by single-slot handoff edges. An optional control
//! worker polls the control channel beside the chain.

mod context;
mod handoff;
mod orchestrator;
mod stages;
mod worker;


use std::fmt;
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

pub use context::{PipelineContext, StopReason};
pub use handoff::{Handoff, HandoffPolicy, Published};
pub use orchestrator::{Pipeline, PipelineBuilder, PipelineLayout, ResamplerFactory};
pub use stages::{GenerateStage, InputStage, OutputStage, ResampleStage};
pub use worker::{Stage, Step, Worker, WorkerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Input,
    InResample,
    Generate,
    OutResample,
    Output,
    Control,
}

impl StageKind {
    /// Short name used for worker threads.
    pub fn thread_name(self) -> &'static str {
        match self {
            StageKind::Input => "mpxgen-input",
            StageKind::InResample => "mpxgen-resample-in",
            StageKind::Generate => "mpxgen-generate",
            StageKind::OutResample => "mpxgen-resample-out",
            StageKind::Output => "mpxgen-output",
            StageKind::Control => "mpxgen-control",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Input => "input",
            StageKind::InResample => "input resampler",
            StageKind::Generate => "MPX generator",
            StageKind::OutResample => "output resampler",
            StageKind::Output => "output",
            StageKind::Control => "control",
        };
        f.write_str(name)
    }
}

/// Locks `mutex`, recovering the data if a worker panicked while holding it.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("recovering poisoned pipeline lock");
        poisoned.into_inner()
    })
}
