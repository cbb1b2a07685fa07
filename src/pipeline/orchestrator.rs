use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::context::{PipelineContext, StopReason};
use super::handoff::HandoffPolicy;
use super::stages::{GenerateStage, InputStage, OutputStage, ResampleStage};
use super::worker::{Worker, WorkerState};
use super::StageKind;
use crate::config::{DEFAULT_BLOCK_FRAMES, DEFAULT_INPUT_RATE};
use crate::control::{ControlChannel, ControlHook};
use crate::error::PipelineError;
use crate::io::{AudioSink, AudioSource, InputAdapter, OutputAdapter};
use crate::mpx::{GenerationMode, MpxSynthesizer};
use crate::resample::{
    rate_ratio, scaled_frames, ElasticResampler, FractionalResampler, ResampleError,
    ResampleQuality, SharedRatio, SincResampler,
};

/// How long `run` waits for workers to exit once stopped.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds the resampler for a stage from its initial ratio and input block
/// size.
pub type ResamplerFactory =
    Box<dyn FnMut(f64, usize) -> Result<Box<dyn FractionalResampler>, ResampleError>>;

/// Rates and block sizes of every stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLayout {
    /// `None` in RDS-only mode.
    pub input_rate: Option<u32>,
    pub mpx_rate: u32,
    pub output_rate: u32,
    pub input_frames: usize,
    pub mpx_frames: usize,
    pub output_frames: usize,
}

impl PipelineLayout {
    /// Derives MPX and output block sizes from the input block by the
    /// nominal rate ratios, rounding up.
    pub fn derive(
        input_rate: Option<u32>,
        mpx_rate: u32,
        output_rate: u32,
        input_frames: usize,
    ) -> Self {
        let nominal_input = input_rate.unwrap_or(DEFAULT_INPUT_RATE);
        let mpx_frames = scaled_frames(input_frames, nominal_input, mpx_rate);
        Self {
            input_rate,
            mpx_rate,
            output_rate,
            input_frames,
            mpx_frames,
            output_frames: scaled_frames(mpx_frames, mpx_rate, output_rate),
        }
    }
}

fn sinc_factory(quality: ResampleQuality) -> ResamplerFactory {
    Box::new(move |ratio, chunk_frames| {
        let resampler = SincResampler::new(ratio, chunk_frames, quality)?;
        Ok(Box::new(resampler) as Box<dyn FractionalResampler>)
    })
}

pub struct PipelineBuilder {
    mpx_rate: u32,
    block_frames: usize,
    sink: Box<dyn AudioSink>,
    synth: Box<dyn MpxSynthesizer>,
    source: Option<Box<dyn AudioSource>>,
    control: Option<Box<dyn ControlChannel>>,
    resamplers: ResamplerFactory,
    wait_for_input: bool,
    rds_only_policy: HandoffPolicy,
}

impl PipelineBuilder {
    /// Starts an RDS-only pipeline; add a `source` for audio mode.
    pub fn new(sink: Box<dyn AudioSink>, synth: Box<dyn MpxSynthesizer>, mpx_rate: u32) -> Self {
        Self {
            mpx_rate,
            block_frames: DEFAULT_BLOCK_FRAMES,
            sink,
            synth,
            source: None,
            control: None,
            resamplers: sinc_factory(ResampleQuality::default()),
            wait_for_input: false,
            rds_only_policy: HandoffPolicy::FreeRunning,
        }
    }

    pub fn source(mut self, source: Box<dyn AudioSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn control(mut self, channel: Box<dyn ControlChannel>) -> Self {
        self.control = Some(channel);
        self
    }

    /// Input block size in frames.
    pub fn block_frames(mut self, frames: usize) -> Self {
        self.block_frames = frames;
        self
    }

    pub fn wait_for_input(mut self, wait: bool) -> Self {
        self.wait_for_input = wait;
        self
    }

    pub fn quality(self, quality: ResampleQuality) -> Self {
        self.resamplers(sinc_factory(quality))
    }

    pub fn resamplers(mut self, factory: ResamplerFactory) -> Self {
        self.resamplers = factory;
        self
    }

    /// Handoff policy of the generator edge when there is no audio input.
    pub fn rds_only_policy(mut self, policy: HandoffPolicy) -> Self {
        self.rds_only_policy = policy;
        self
    }

    /// Allocates every buffer and resampler and wires the workers. Nothing
    /// runs until `Pipeline::start`.
    pub fn build(mut self) -> Result<Pipeline, PipelineError> {
        let ctx = PipelineContext::new();
        let input_rate = self.source.as_ref().map(|source| source.sample_rate());
        let layout = PipelineLayout::derive(
            input_rate,
            self.mpx_rate,
            self.sink.sample_rate(),
            self.block_frames,
        );
        let mode = match self.source {
            Some(_) => GenerationMode::Audio,
            None => GenerationMode::RdsOnly,
        };
        let generator_policy = match mode {
            GenerationMode::Audio => HandoffPolicy::Strict,
            GenerationMode::RdsOnly => self.rds_only_policy,
        };

        // Consumers first, so they are running before their producers.
        let mut workers = Vec::new();

        let mpx_edge = ctx.handoff(
            StageKind::Generate,
            StageKind::OutResample,
            layout.mpx_frames,
            generator_policy,
        );
        let output_edge = ctx.handoff(
            StageKind::OutResample,
            StageKind::Output,
            layout.output_frames,
            HandoffPolicy::Strict,
        );

        let output = OutputAdapter::new(self.sink, layout.output_frames);
        workers.push(Worker::new(Box::new(OutputStage::new(
            output,
            Arc::clone(&output_edge),
        ))));

        let output_ratio = Arc::new(SharedRatio::new(rate_ratio(
            layout.mpx_rate,
            layout.output_rate,
        )));
        let resampler = (self.resamplers)(output_ratio.get(), layout.mpx_frames)
            .map_err(|e| PipelineError::resampler(StageKind::OutResample, e))?;
        workers.push(Worker::new(Box::new(ResampleStage::new(
            StageKind::OutResample,
            ElasticResampler::new(resampler, layout.mpx_frames, layout.output_frames),
            Arc::clone(&output_ratio),
            Arc::clone(&mpx_edge),
            output_edge,
        ))));

        let mut input_ratio = None;
        match (self.source, layout.input_rate) {
            (Some(source), Some(rate)) => {
                let input_edge = ctx.handoff(
                    StageKind::Input,
                    StageKind::InResample,
                    layout.input_frames,
                    HandoffPolicy::Strict,
                );
                let audio_edge = ctx.handoff(
                    StageKind::InResample,
                    StageKind::Generate,
                    layout.mpx_frames,
                    HandoffPolicy::Strict,
                );

                workers.push(Worker::new(Box::new(GenerateStage::audio(
                    self.synth,
                    Arc::clone(&audio_edge),
                    mpx_edge,
                ))));

                let ratio = Arc::new(SharedRatio::new(rate_ratio(rate, layout.mpx_rate)));
                let resampler = (self.resamplers)(ratio.get(), layout.input_frames)
                    .map_err(|e| PipelineError::resampler(StageKind::InResample, e))?;
                workers.push(Worker::new(Box::new(ResampleStage::new(
                    StageKind::InResample,
                    ElasticResampler::new(resampler, layout.input_frames, layout.mpx_frames),
                    Arc::clone(&ratio),
                    Arc::clone(&input_edge),
                    audio_edge,
                ))));
                input_ratio = Some(ratio);

                let input = InputAdapter::new(source, layout.input_frames);
                workers.push(Worker::new(Box::new(InputStage::new(
                    input,
                    input_edge,
                    self.wait_for_input,
                ))));
            }
            _ => {
                workers.push(Worker::new(Box::new(GenerateStage::rds_only(
                    self.synth, mpx_edge,
                ))));
            }
        }

        if let Some(channel) = self.control {
            workers.push(Worker::new(Box::new(ControlHook::new(channel))));
        }

        info!(
            ?mode,
            input_rate = ?layout.input_rate,
            mpx_rate = layout.mpx_rate,
            output_rate = layout.output_rate,
            input_frames = layout.input_frames,
            mpx_frames = layout.mpx_frames,
            output_frames = layout.output_frames,
            "pipeline built"
        );

        Ok(Pipeline {
            ctx,
            workers,
            layout,
            mode,
            input_ratio,
            output_ratio,
        })
    }
}

pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    workers: Vec<Worker>,
    layout: PipelineLayout,
    mode: GenerationMode,
    input_ratio: Option<Arc<SharedRatio>>,
    output_ratio: Arc<SharedRatio>,
}

impl Pipeline {
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn layout(&self) -> PipelineLayout {
        self.layout
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    /// Input to MPX rate ratio, for drift correction. `None` in RDS-only mode.
    pub fn input_ratio(&self) -> Option<&Arc<SharedRatio>> {
        self.input_ratio.as_ref()
    }

    pub fn output_ratio(&self) -> &Arc<SharedRatio> {
        &self.output_ratio
    }

    pub fn worker_states(&self) -> Vec<(StageKind, WorkerState)> {
        self.workers
            .iter()
            .map(|worker| (worker.kind(), worker.state()))
            .collect()
    }

    /// Starts every worker, consumers first.
    ///
    /// If one fails to start, the already running ones are stopped and
    /// joined before the error is returned.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let mut failure = None;
        for worker in self.workers.iter_mut() {
            if let Err(error) = worker.start(&self.ctx) {
                failure = Some((worker.kind(), error));
                break;
            }
        }

        if let Some((stage, error)) = failure {
            error!(%stage, %error, "worker failed to start");
            self.ctx.request_stop(StopReason::failure(stage, &error));
            self.join_all(JOIN_TIMEOUT);
            return Err(error);
        }
        Ok(())
    }

    /// Blocks until something stops the pipeline.
    pub fn wait(&self) -> StopReason {
        self.ctx.wait_for_stop()
    }

    /// Stops the pipeline if still running and joins every worker.
    pub fn shutdown(&mut self, timeout: Duration) -> StopReason {
        self.ctx.request_stop(StopReason::Signal);
        self.join_all(timeout);
        self.ctx.stop_reason().unwrap_or(StopReason::Signal)
    }

    /// Starts, waits for a stop and shuts down.
    pub fn run(mut self) -> Result<StopReason, PipelineError> {
        self.start()?;
        self.wait();
        Ok(self.shutdown(JOIN_TIMEOUT))
    }

    /// Returns how many workers had to be detached.
    fn join_all(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut detached = 0;
        for worker in self.workers.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !worker.join(remaining) {
                detached += 1;
            }
        }
        if detached > 0 {
            warn!(detached, "some workers were still blocked at shutdown");
        }
        detached
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.ctx.request_stop(StopReason::Signal);
        self.join_all(JOIN_TIMEOUT);
    }
}
