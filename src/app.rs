//! Assembles an encoder pipeline from an `EncoderConfig`.

use std::path::Path;

use tracing::info;

use crate::config::EncoderConfig;
use crate::control::ControlPipe;
use crate::error::PipelineError;
use crate::io::{open_sink, open_source, DeviceError, Endpoint};
use crate::mpx::{MpxEncoder, SettingsHandle};
use crate::pipeline::{Pipeline, PipelineBuilder, StageKind};

/// A built pipeline plus the settings the control channel edits.
pub struct Encoder {
    pub pipeline: Pipeline,
    pub settings: SettingsHandle,
}

/// Validates `config`, opens the devices and builds the pipeline.
pub fn build_encoder(config: &EncoderConfig) -> Result<Encoder, PipelineError> {
    config.validate()?;
    let settings = SettingsHandle::new(config.settings()?);

    let output = config
        .output
        .as_deref()
        .map(Endpoint::parse)
        .unwrap_or_else(Endpoint::default_output);
    let sink = open_sink(&output, config.output_rate)
        .map_err(|e| PipelineError::device(StageKind::Output, e))?;

    let synth = MpxEncoder::new(settings.clone(), config.mpx_rate);
    let mut builder = PipelineBuilder::new(sink, Box::new(synth), config.mpx_rate)
        .block_frames(config.block_frames)
        .wait_for_input(config.wait)
        .quality(config.quality);

    if let Some(audio) = config.audio.as_deref() {
        let source = open_source(&Endpoint::parse(audio), config.input_rate)
            .map_err(|e| PipelineError::device(StageKind::Input, e))?;
        builder = builder.source(source);
    } else {
        info!("no audio input, generating RDS only");
    }

    if let Some(path) = config.control.as_deref() {
        let pipe = ControlPipe::open(Path::new(path), settings.clone()).map_err(|e| {
            PipelineError::device(
                StageKind::Control,
                DeviceError::Open {
                    backend: "control",
                    name: path.to_string(),
                    message: e.to_string(),
                },
            )
        })?;
        builder = builder.control(Box::new(pipe));
    }

    Ok(Encoder {
        pipeline: builder.build()?,
        settings,
    })
}
