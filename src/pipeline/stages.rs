use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use super::context::{PipelineContext, StopReason};
use super::handoff::{Handoff, Published};
use super::worker::{Stage, Step};
use super::StageKind;
use crate::audio::FrameBuffer;
use crate::error::PipelineError;
use crate::io::{InputAdapter, OutputAdapter, ReadStatus};
use crate::mpx::MpxSynthesizer;
use crate::resample::{BlockFill, ElasticResampler, Pull, SharedRatio};

/// How long an exhausted input waits before reading again in wait mode.
pub const INPUT_RETRY: Duration = Duration::from_millis(10);

pub struct InputStage {
    input: InputAdapter,
    block: FrameBuffer,
    downstream: Arc<Handoff>,
    wait_for_input: bool,
}

impl InputStage {
    pub fn new(input: InputAdapter, downstream: Arc<Handoff>, wait_for_input: bool) -> Self {
        Self {
            input,
            block: FrameBuffer::new(downstream.capacity()),
            downstream,
            wait_for_input,
        }
    }
}

impl Stage for InputStage {
    fn kind(&self) -> StageKind {
        StageKind::Input
    }

    fn step(&mut self, ctx: &PipelineContext) -> Result<Step, PipelineError> {
        let status = self
            .input
            .read_block(&mut self.block)
            .map_err(|e| PipelineError::device(StageKind::Input, e))?;

        match status {
            ReadStatus::Frames(0) => {
                trace!("no input ready");
                Ok(Step::Continue)
            }
            ReadStatus::Frames(_) => {
                self.downstream.publish(ctx, &mut self.block);
                Ok(Step::Continue)
            }
            ReadStatus::EndOfStream if self.wait_for_input => {
                ctx.sleep(INPUT_RETRY);
                Ok(Step::Continue)
            }
            ReadStatus::EndOfStream => {
                info!("end of input");
                self.downstream.finish();
                Ok(Step::Finished)
            }
        }
    }
}

/// Converts between two rates, emitting fixed-size blocks.
pub struct ResampleStage {
    kind: StageKind,
    session: ElasticResampler,
    ratio: Arc<SharedRatio>,
    upstream: Arc<Handoff>,
    downstream: Arc<Handoff>,
    block: FrameBuffer,
}

impl ResampleStage {
    pub fn new(
        kind: StageKind,
        session: ElasticResampler,
        ratio: Arc<SharedRatio>,
        upstream: Arc<Handoff>,
        downstream: Arc<Handoff>,
    ) -> Self {
        debug_assert_eq!(session.frames_in(), upstream.capacity());
        debug_assert_eq!(session.frames_out(), downstream.capacity());
        Self {
            kind,
            block: FrameBuffer::new(downstream.capacity()),
            session,
            ratio,
            upstream,
            downstream,
        }
    }
}

impl Stage for ResampleStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn step(&mut self, ctx: &PipelineContext) -> Result<Step, PipelineError> {
        let kind = self.kind;
        let upstream = &self.upstream;
        let fill = self
            .session
            .resample_block(self.ratio.get(), &mut self.block, |input| {
                upstream.take(ctx, input)
            })
            .map_err(|e| PipelineError::resampler(kind, e))?;

        match fill {
            BlockFill::Full => {
                self.downstream.publish(ctx, &mut self.block);
                Ok(Step::Continue)
            }
            BlockFill::Finished => {
                if !self.block.is_empty() {
                    debug!(frames = self.block.frames(), "flushing final partial block");
                    self.downstream.publish(ctx, &mut self.block);
                }
                self.downstream.finish();
                Ok(Step::Finished)
            }
            BlockFill::Stopped => Ok(Step::Continue),
        }
    }
}

enum GenerationSource {
    Audio {
        upstream: Arc<Handoff>,
        input: FrameBuffer,
    },
    RdsOnly,
}

pub struct GenerateStage {
    synth: Box<dyn MpxSynthesizer>,
    source: GenerationSource,
    block: FrameBuffer,
    downstream: Arc<Handoff>,
}

impl GenerateStage {
    /// Multiplexes audio taken from `upstream`.
    pub fn audio(
        synth: Box<dyn MpxSynthesizer>,
        upstream: Arc<Handoff>,
        downstream: Arc<Handoff>,
    ) -> Self {
        debug_assert_eq!(upstream.capacity(), downstream.capacity());
        Self {
            synth,
            source: GenerationSource::Audio {
                input: FrameBuffer::new(upstream.capacity()),
                upstream,
            },
            block: FrameBuffer::new(downstream.capacity()),
            downstream,
        }
    }

    /// Generates RDS-only blocks without waiting on any input.
    pub fn rds_only(synth: Box<dyn MpxSynthesizer>, downstream: Arc<Handoff>) -> Self {
        Self {
            synth,
            source: GenerationSource::RdsOnly,
            block: FrameBuffer::new(downstream.capacity()),
            downstream,
        }
    }
}

impl Stage for GenerateStage {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    fn step(&mut self, ctx: &PipelineContext) -> Result<Step, PipelineError> {
        match &mut self.source {
            GenerationSource::Audio { upstream, input } => match upstream.take(ctx, input) {
                Pull::Block => {
                    let frames = input.frames();
                    self.synth
                        .audio_block(input.as_slice(), self.block.frames_mut(0, frames), frames);
                    self.block.set_frames(frames);
                }
                Pull::Finished => {
                    self.downstream.finish();
                    return Ok(Step::Finished);
                }
                Pull::Stopped => return Ok(Step::Continue),
            },
            GenerationSource::RdsOnly => {
                let frames = self.block.capacity();
                self.synth.rds_block(self.block.frames_mut(0, frames), frames);
                self.block.set_frames(frames);
            }
        }

        if self.downstream.publish(ctx, &mut self.block) == Published::Overwrote {
            std::thread::yield_now();
        }
        Ok(Step::Continue)
    }
}

pub struct OutputStage {
    output: OutputAdapter,
    block: FrameBuffer,
    upstream: Arc<Handoff>,
    frames_written: u64,
}

impl OutputStage {
    pub fn new(output: OutputAdapter, upstream: Arc<Handoff>) -> Self {
        Self {
            output,
            block: FrameBuffer::new(upstream.capacity()),
            upstream,
            frames_written: 0,
        }
    }
}

impl Stage for OutputStage {
    fn kind(&self) -> StageKind {
        StageKind::Output
    }

    fn step(&mut self, ctx: &PipelineContext) -> Result<Step, PipelineError> {
        match self.upstream.take(ctx, &mut self.block) {
            Pull::Block => {
                self.output
                    .write_block(&self.block)
                    .map_err(|e| PipelineError::device(StageKind::Output, e))?;
                self.frames_written += self.block.frames() as u64;
                Ok(Step::Continue)
            }
            Pull::Finished => {
                info!(frames = self.frames_written, "output drained");
                ctx.request_stop(StopReason::EndOfStream);
                Ok(Step::Finished)
            }
            Pull::Stopped => Ok(Step::Continue),
        }
    }

    fn shutdown(&mut self) -> Result<(), PipelineError> {
        self.output
            .close()
            .map_err(|e| PipelineError::device(StageKind::Output, e))
    }
}
