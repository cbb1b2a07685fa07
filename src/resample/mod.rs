mod elastic;
mod sinc;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

pub use elastic::{BlockFill, ElasticResampler, Pull};
pub use sinc::{ResampleQuality, SincResampler};

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("could not create resampler: {0}")]
    Construction(String),
    #[error("resample ratio {ratio} rejected: {message}")]
    Ratio { ratio: f64, message: String },
    #[error("resampler failed: {0}")]
    Process(String),
}

/// A fractional-ratio sample rate converter working on interleaved stereo.
///
/// Each call consumes every frame of `input` and appends however many frames
/// it produced to `output`, returning that count. The count varies from call
/// to call; `ElasticResampler` turns it into fixed-size blocks.
pub trait FractionalResampler: Send {
    fn process(
        &mut self,
        input: &[f32],
        ratio: f64,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResampleError>;

    /// Emits whatever is still held back once the input has ended.
    /// Returns 0 when nothing is left.
    fn flush(&mut self, _output: &mut Vec<f32>) -> Result<usize, ResampleError> {
        Ok(0)
    }
}

impl<R: FractionalResampler + ?Sized> FractionalResampler for Box<R> {
    fn process(
        &mut self,
        input: &[f32],
        ratio: f64,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResampleError> {
        (**self).process(input, ratio, output)
    }

    fn flush(&mut self, output: &mut Vec<f32>) -> Result<usize, ResampleError> {
        (**self).flush(output)
    }
}

/// Output/input rate ratio readable from a worker while another thread
/// trims it for clock drift.
#[derive(Debug)]
pub struct SharedRatio {
    bits: AtomicU64,
}

impl SharedRatio {
    pub fn new(ratio: f64) -> Self {
        Self {
            bits: AtomicU64::new(ratio.to_bits()),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, ratio: f64) {
        self.bits.store(ratio.to_bits(), Ordering::Release);
    }
}

/// Ratio between two nominal rates.
pub fn rate_ratio(from_rate: u32, to_rate: u32) -> f64 {
    to_rate as f64 / from_rate as f64
}

/// Frames needed at `to_rate` to cover `frames` at `from_rate`, rounded up.
pub fn scaled_frames(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    let scaled = frames as u128 * to_rate as u128;
    scaled.div_ceil(from_rate as u128) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_ratio_updates() {
        let ratio = SharedRatio::new(4.0);
        assert_eq!(ratio.get(), 4.0);
        ratio.set(4.0001);
        assert_eq!(ratio.get(), 4.0001);
    }

    #[test]
    fn test_scaled_frames_rounds_up() {
        assert_eq!(scaled_frames(1024, 48_000, 192_000), 4096);
        assert_eq!(scaled_frames(1024, 44_100, 228_000), 5295);
        assert_eq!(scaled_frames(4096, 228_000, 228_000), 4096);
    }
}
