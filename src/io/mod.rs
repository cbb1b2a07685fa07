//! Audio sources and sinks, and the adapters that convert their 16-bit
//! samples to and from pipeline floats.

mod file;
#[cfg(feature = "live")]
mod live;

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::audio::{FrameBuffer, CHANNELS};
use crate::utils::{floats_to_shorts, shorts_to_floats};

pub use file::{RawSink, RawSource, WavSink, WavSource};
#[cfg(feature = "live")]
pub use live::{CaptureSource, PlaybackSink};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("could not open {backend} device \"{name}\": {message}")]
    Open {
        backend: &'static str,
        name: String,
        message: String,
    },
    #[error("{backend} read failed: {message}")]
    Read {
        backend: &'static str,
        message: String,
    },
    #[error("{backend} write failed: {message}")]
    Write {
        backend: &'static str,
        message: String,
    },
    #[error("{backend} close failed: {message}")]
    Close {
        backend: &'static str,
        message: String,
    },
    #[error("{0} support is not compiled in (enable the \"live\" feature)")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Interleaved frames written to the front of the buffer. May be zero
    /// when a live device had nothing ready in time.
    Frames(usize),
    EndOfStream,
}

/// Stream of interleaved stereo s16 frames.
pub trait AudioSource: Send {
    fn backend(&self) -> &'static str;

    fn sample_rate(&self) -> u32;

    /// Reads up to `samples.len() / 2` frames.
    fn read(&mut self, samples: &mut [i16]) -> Result<ReadStatus, DeviceError>;
}

pub trait AudioSink: Send {
    fn backend(&self) -> &'static str;

    fn sample_rate(&self) -> u32;

    /// Writes every frame of `samples` or fails.
    fn write(&mut self, samples: &[i16]) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Reads whole frame blocks from a source into pipeline buffers.
pub struct InputAdapter {
    source: Box<dyn AudioSource>,
    scratch: Vec<i16>,
}

impl InputAdapter {
    pub fn new(source: Box<dyn AudioSource>, block_frames: usize) -> Self {
        Self {
            source,
            scratch: vec![0; block_frames * CHANNELS],
        }
    }

    pub fn read_block(&mut self, block: &mut FrameBuffer) -> Result<ReadStatus, DeviceError> {
        let samples = block.capacity() * CHANNELS;
        if self.scratch.len() < samples {
            self.scratch.resize(samples, 0);
        }

        let status = self.source.read(&mut self.scratch[..samples])?;
        match status {
            ReadStatus::Frames(frames) => {
                shorts_to_floats(
                    &self.scratch[..frames * CHANNELS],
                    block.frames_mut(0, frames),
                );
                block.set_frames(frames);
            }
            ReadStatus::EndOfStream => block.set_frames(0),
        }
        Ok(status)
    }
}

/// Writes pipeline buffers to a sink.
pub struct OutputAdapter {
    sink: Box<dyn AudioSink>,
    scratch: Vec<i16>,
}

impl OutputAdapter {
    pub fn new(sink: Box<dyn AudioSink>, block_frames: usize) -> Self {
        Self {
            sink,
            scratch: vec![0; block_frames * CHANNELS],
        }
    }

    pub fn write_block(&mut self, block: &FrameBuffer) -> Result<(), DeviceError> {
        let samples = block.as_slice();
        if self.scratch.len() < samples.len() {
            self.scratch.resize(samples.len(), 0);
        }
        let scratch = &mut self.scratch[..samples.len()];
        floats_to_shorts(samples, scratch);
        self.sink.write(scratch)
    }

    pub fn close(&mut self) -> Result<(), DeviceError> {
        self.sink.close()
    }
}

/// Where a source reads from or a sink writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `-`: stdin or stdout, raw s16le.
    Stdio,
    Raw(PathBuf),
    Wav(PathBuf),
    /// A named device of the native audio host.
    Live(String),
}

impl Endpoint {
    pub fn parse(name: &str) -> Self {
        if name == "-" {
            return Endpoint::Stdio;
        }
        for prefix in ["alsa:", "pulse:", "live:"] {
            if let Some(device) = name.strip_prefix(prefix) {
                let device = if device.is_empty() { "default" } else { device };
                return Endpoint::Live(device.to_string());
            }
        }
        if name.to_ascii_lowercase().ends_with(".wav") {
            Endpoint::Wav(PathBuf::from(name))
        } else {
            Endpoint::Raw(PathBuf::from(name))
        }
    }

    pub fn default_output() -> Self {
        Endpoint::Live("default".to_string())
    }
}

/// Opens an input. `raw_rate` is the nominal rate of headerless streams.
pub fn open_source(endpoint: &Endpoint, raw_rate: u32) -> Result<Box<dyn AudioSource>, DeviceError> {
    let source: Box<dyn AudioSource> = match endpoint {
        Endpoint::Stdio => Box::new(RawSource::stdin(raw_rate)),
        Endpoint::Raw(path) => Box::new(RawSource::open(path, raw_rate)?),
        Endpoint::Wav(path) => Box::new(WavSource::open(path)?),
        Endpoint::Live(device) => open_capture(device, raw_rate)?,
    };
    info!(
        backend = source.backend(),
        rate = source.sample_rate(),
        "opened input {:?}",
        endpoint
    );
    Ok(source)
}

/// Opens an output at `rate`. Live devices may settle on another rate; the
/// sink's `sample_rate` is authoritative.
pub fn open_sink(endpoint: &Endpoint, rate: u32) -> Result<Box<dyn AudioSink>, DeviceError> {
    let sink: Box<dyn AudioSink> = match endpoint {
        Endpoint::Stdio => Box::new(RawSink::stdout(rate)),
        Endpoint::Raw(path) => Box::new(RawSink::create(path, rate)?),
        Endpoint::Wav(path) => Box::new(WavSink::create(path, rate)?),
        Endpoint::Live(device) => open_playback(device, rate)?,
    };
    info!(
        backend = sink.backend(),
        rate = sink.sample_rate(),
        "opened output {:?}",
        endpoint
    );
    Ok(sink)
}

#[cfg(feature = "live")]
fn open_capture(device: &str, rate: u32) -> Result<Box<dyn AudioSource>, DeviceError> {
    Ok(Box::new(CaptureSource::open(device, rate)?))
}

#[cfg(not(feature = "live"))]
fn open_capture(device: &str, _rate: u32) -> Result<Box<dyn AudioSource>, DeviceError> {
    Err(DeviceError::Unsupported(format!("live capture device \"{}\"", device)))
}

#[cfg(feature = "live")]
fn open_playback(device: &str, rate: u32) -> Result<Box<dyn AudioSink>, DeviceError> {
    Ok(Box::new(PlaybackSink::open(device, rate)?))
}

#[cfg(not(feature = "live"))]
fn open_playback(device: &str, _rate: u32) -> Result<Box<dyn AudioSink>, DeviceError> {
    Err(DeviceError::Unsupported(format!("live playback device \"{}\"", device)))
}
