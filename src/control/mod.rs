//! Runtime control of the encoder settings.

mod pipe;

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::pipeline::{PipelineContext, Stage, StageKind, Step};

pub use pipe::{parse_command, Command, ControlPipe};

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ControlError {
    /// The channel will never deliver anything again.
    #[error("control channel closed")]
    Closed,
    #[error("invalid control command \"{line}\": {reason}")]
    Command { line: String, reason: String },
}

/// Non-blocking source of control commands.
pub trait ControlChannel: Send {
    /// Applies whatever commands arrived since the last poll.
    fn poll(&mut self) -> Result<(), ControlError>;
}

/// Polls a control channel beside the pipeline.
///
/// Failures are logged and ignored. A closed channel ends only this worker.
pub struct ControlHook {
    channel: Box<dyn ControlChannel>,
    interval: Duration,
}

impl ControlHook {
    pub fn new(channel: Box<dyn ControlChannel>) -> Self {
        Self::with_interval(channel, POLL_INTERVAL)
    }

    pub fn with_interval(channel: Box<dyn ControlChannel>, interval: Duration) -> Self {
        Self { channel, interval }
    }
}

impl Stage for ControlHook {
    fn kind(&self) -> StageKind {
        StageKind::Control
    }

    fn step(&mut self, ctx: &PipelineContext) -> Result<Step, PipelineError> {
        match self.channel.poll() {
            Ok(()) => {}
            Err(ControlError::Closed) => {
                info!("control channel closed");
                return Ok(Step::Finished);
            }
            Err(error) => warn!(%error, "ignoring control command"),
        }
        ctx.sleep(self.interval);
        Ok(Step::Continue)
    }
}
