//! FM multiplex baseband generator: stereo audio, 19 kHz pilot and RDS,
//! produced by a threaded block pipeline.

pub mod app;
pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod io;
pub mod mpx;
pub mod pipeline;
pub mod resample;
pub mod utils;

pub use app::{build_encoder, Encoder};
pub use config::{ConfigError, EncoderConfig};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineContext, StageKind, StopReason};
pub use utils::*;
