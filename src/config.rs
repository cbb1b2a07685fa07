use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mpx::params::{callsign_to_pi, EncoderSettings, RdsParams};
use crate::resample::ResampleQuality;

pub const DEFAULT_INPUT_RATE: u32 = 48_000;
pub const DEFAULT_MPX_RATE: u32 = 228_000;
pub const DEFAULT_OUTPUT_RATE: u32 = 192_000;
pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

pub const MIN_RATE: u32 = 8_000;
pub const MAX_RATE: u32 = 768_000;
pub const MIN_BLOCK_FRAMES: usize = 64;
pub const MAX_BLOCK_FRAMES: usize = 65_536;

/// Rejected before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MPX volume must be between 1 and 100 (got {0})")]
    Volume(u32),
    #[error("{field} may only contain printable ASCII")]
    InvalidText { field: &'static str },
    #[error("{field} must be at most {max} characters (got {len})")]
    TextTooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },
    #[error("invalid PI code \"{0}\"")]
    Pi(String),
    #[error("PTY must be between 0 and 31 (got {0})")]
    Pty(u32),
    #[error("invalid alternative frequency {0} MHz (87.6 - 107.9)")]
    Frequency(String),
    #[error("at most {max} alternative frequencies are allowed")]
    TooManyFrequencies { max: usize },
    #[error("invalid callsign \"{0}\" (four letters starting with K or W)")]
    Callsign(String),
    #[error("{name} rate {value} Hz is out of range (8000 - 768000)")]
    Rate { name: &'static str, value: u32 },
    #[error("block size {0} is out of range (64 - 65536 frames)")]
    BlockSize(usize),
    #[error("nothing to do: no audio input and RDS disabled")]
    NothingToDo,
    #[error("could not read config file {path}: {message}")]
    File { path: String, message: String },
}

/// Everything needed to assemble an encoder pipeline.
///
/// Loaded from an optional JSON file, then overridden from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Input source; `None` runs in RDS-only mode.
    pub audio: Option<String>,
    /// Output sink; `None` selects the default live device.
    pub output: Option<String>,
    pub volume: u32,
    /// Keep polling an exhausted input instead of ending the stream.
    pub wait: bool,
    pub rds_enabled: bool,
    pub rds: RdsParams,
    /// Overrides `rds.pi` when set.
    pub callsign: Option<String>,
    pub control: Option<String>,
    pub input_rate: u32,
    pub mpx_rate: u32,
    pub output_rate: u32,
    pub block_frames: usize,
    pub quality: ResampleQuality,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            audio: None,
            output: None,
            volume: 50,
            wait: true,
            rds_enabled: true,
            rds: RdsParams::default(),
            callsign: None,
            control: None,
            input_rate: DEFAULT_INPUT_RATE,
            mpx_rate: DEFAULT_MPX_RATE,
            output_rate: DEFAULT_OUTPUT_RATE,
            block_frames: DEFAULT_BLOCK_FRAMES,
            quality: ResampleQuality::default(),
        }
    }
}

impl EncoderConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File {
            path: path.display().to_string(),
            message,
        };
        let text = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| file_error(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.is_none() && !self.rds_enabled {
            return Err(ConfigError::NothingToDo);
        }
        for (name, value) in [
            ("input", self.input_rate),
            ("MPX", self.mpx_rate),
            ("output", self.output_rate),
        ] {
            if !(MIN_RATE..=MAX_RATE).contains(&value) {
                return Err(ConfigError::Rate { name, value });
            }
        }
        if !(MIN_BLOCK_FRAMES..=MAX_BLOCK_FRAMES).contains(&self.block_frames) {
            return Err(ConfigError::BlockSize(self.block_frames));
        }
        self.settings()?.validate()
    }

    /// Initial encoder settings, with the callsign applied.
    pub fn settings(&self) -> Result<EncoderSettings, ConfigError> {
        let volume = u8::try_from(self.volume).map_err(|_| ConfigError::Volume(self.volume))?;
        let mut rds = self.rds.clone();
        if let Some(callsign) = &self.callsign {
            rds.pi = callsign_to_pi(callsign)?;
        }
        Ok(EncoderSettings {
            rds,
            volume,
            rds_enabled: self.rds_enabled,
        })
    }
}
