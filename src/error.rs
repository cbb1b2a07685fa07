use thiserror::Error;

use crate::config::ConfigError;
use crate::io::DeviceError;
use crate::pipeline::StageKind;
use crate::resample::ResampleError;

/// Failures that end a pipeline run.
///
/// End of input is not among them: it surfaces as `ReadStatus::EndOfStream`
/// and finishes the run with `StopReason::EndOfStream`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{stage} stage: {source}")]
    Device {
        stage: StageKind,
        #[source]
        source: DeviceError,
    },

    #[error("{stage} stage: {source}")]
    Resampler {
        stage: StageKind,
        #[source]
        source: ResampleError,
    },

    #[error("could not start {stage} worker: {source}")]
    ThreadStart {
        stage: StageKind,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn device(stage: StageKind, source: DeviceError) -> Self {
        Self::Device { stage, source }
    }

    pub fn resampler(stage: StageKind, source: ResampleError) -> Self {
        Self::Resampler { stage, source }
    }

    /// Stage the failure belongs to, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::Config(_) => None,
            Self::Device { stage, .. }
            | Self::Resampler { stage, .. }
            | Self::ThreadStart { stage, .. } => Some(*stage),
        }
    }
}
