//! MPX baseband synthesis: stereo multiplex, pilot and RDS.

mod encoder;
pub mod params;
pub mod rds;

pub use encoder::{MpxEncoder, PILOT_FREQ};
pub use params::{EncoderSettings, RdsParams, SettingsHandle};

/// Produces MPX-rate frames; keeps its own oscillator state across calls.
///
/// Both calls write exactly `frames` interleaved stereo frames to `out`.
pub trait MpxSynthesizer: Send {
    /// Multiplexes `frames` frames of stereo audio already at the MPX rate.
    fn audio_block(&mut self, audio: &[f32], out: &mut [f32], frames: usize);

    /// Produces `frames` frames carrying only the RDS subcarrier.
    fn rds_block(&mut self, out: &mut [f32], frames: usize);
}

/// Whether the generation stage is fed by audio or runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Audio,
    RdsOnly,
}
