use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};

use super::{FractionalResampler, ResampleError};
use crate::audio::CHANNELS;

// Headroom for clock-drift trims around the construction ratio.
const MAX_RELATIVE_RATIO: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleQuality {
    Fast,
    #[default]
    Balanced,
    High,
}

impl ResampleQuality {
    fn parameters(self) -> SincInterpolationParameters {
        match self {
            ResampleQuality::Fast => SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.92,
                interpolation: SincInterpolationType::Nearest,
                oversampling_factor: 64,
                window: WindowFunction::Blackman,
            },
            ResampleQuality::Balanced => SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.94,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::Blackman,
            },
            ResampleQuality::High => SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
        }
    }
}

/// Band-limited stereo resampler backed by rubato's `SincFixedIn`.
///
/// rubato works on planar channels with a fixed input chunk, so incoming
/// frames are deinterleaved into `planar_in` until a chunk is complete,
/// processed, and interleaved back. `flush` pushes silence through the
/// filter until every frame owed for the consumed input has come out.
pub struct SincResampler {
    inner: SincFixedIn<f32>,
    ratio: f64,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
    pending: usize,
    // Output frames owed for all input so far, and frames emitted.
    owed: f64,
    emitted: u64,
}

impl SincResampler {
    pub fn new(
        ratio: f64,
        chunk_frames: usize,
        quality: ResampleQuality,
    ) -> Result<Self, ResampleError> {
        let inner = SincFixedIn::<f32>::new(
            ratio,
            MAX_RELATIVE_RATIO,
            quality.parameters(),
            chunk_frames,
            CHANNELS,
        )
        .map_err(|e| ResampleError::Construction(e.to_string()))?;

        let planar_out = inner.output_buffer_allocate(true);

        Ok(Self {
            inner,
            ratio,
            planar_in: vec![vec![0.0; chunk_frames]; CHANNELS],
            planar_out,
            pending: 0,
            owed: 0.0,
            emitted: 0,
        })
    }

    fn update_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        if ratio == self.ratio {
            return Ok(());
        }
        self.inner
            .set_resample_ratio(ratio, true)
            .map_err(|e| ResampleError::Ratio {
                ratio,
                message: e.to_string(),
            })?;
        self.ratio = ratio;
        Ok(())
    }

    /// Runs one full chunk from `planar_in` and appends the result.
    fn run_chunk(&mut self, output: &mut Vec<f32>) -> Result<usize, ResampleError> {
        let (_, frames) = self
            .inner
            .process_into_buffer(&self.planar_in, &mut self.planar_out, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?;
        self.pending = 0;

        output.reserve(frames * CHANNELS);
        for i in 0..frames {
            for channel in self.planar_out.iter() {
                output.push(channel[i]);
            }
        }
        self.emitted += frames as u64;
        Ok(frames)
    }
}

impl FractionalResampler for SincResampler {
    fn process(
        &mut self,
        input: &[f32],
        ratio: f64,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResampleError> {
        self.update_ratio(ratio)?;

        let chunk = self.planar_in[0].len();
        let mut produced = 0;
        for frame in input.chunks_exact(CHANNELS) {
            for (channel, &sample) in frame.iter().enumerate() {
                self.planar_in[channel][self.pending] = sample;
            }
            self.pending += 1;
            if self.pending == chunk {
                produced += self.run_chunk(output)?;
            }
        }

        self.owed += (input.len() / CHANNELS) as f64 * ratio;
        Ok(produced)
    }

    fn flush(&mut self, output: &mut Vec<f32>) -> Result<usize, ResampleError> {
        let target = self.owed.ceil() as u64;
        let start = output.len();

        while self.emitted < target {
            for channel in self.planar_in.iter_mut() {
                channel[self.pending..].fill(0.0);
            }
            if self.run_chunk(output)? == 0 {
                break;
            }
        }
        self.pending = 0;

        // The last chunk may overshoot into pure padding.
        let appended = (output.len() - start) / CHANNELS;
        let excess = (self.emitted.saturating_sub(target) as usize).min(appended);
        output.truncate(output.len() - excess * CHANNELS);
        self.emitted -= excess as u64;
        Ok(appended - excess)
    }
}
