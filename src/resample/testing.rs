//! Deterministic resamplers for tests.

use std::sync::{Arc, Mutex};

use super::{FractionalResampler, ResampleError};
use crate::audio::CHANNELS;

/// Linear interpolator lagging one input frame.
///
/// Output `k` sits at input time `k / ratio - 1`, so after `n` input frames
/// exactly `ceil(n * ratio)` frames have been produced.
pub(crate) struct LinearResampler {
    consumed: u64,
    produced: u64,
    base_produced: u64,
    base_position: f64,
    ratio: Option<f64>,
    last: [f32; CHANNELS],
}

impl LinearResampler {
    pub(crate) fn new() -> Self {
        Self {
            consumed: 0,
            produced: 0,
            base_produced: 0,
            base_position: -1.0,
            ratio: None,
            last: [0.0; CHANNELS],
        }
    }

    fn position(&self, ratio: f64) -> f64 {
        self.base_position + (self.produced - self.base_produced) as f64 / ratio
    }
}

impl FractionalResampler for LinearResampler {
    fn process(
        &mut self,
        input: &[f32],
        ratio: f64,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResampleError> {
        match self.ratio {
            Some(current) if current == ratio => {}
            Some(current) => {
                self.base_position = self.position(current);
                self.base_produced = self.produced;
                self.ratio = Some(ratio);
            }
            None => self.ratio = Some(ratio),
        }

        let frames = (input.len() / CHANNELS) as u64;
        let start = self.consumed as i64;
        let end = start + frames as i64;
        let last = self.last;
        let sample = |index: i64, channel: usize| -> f32 {
            if index < start {
                last[channel]
            } else {
                input[(index - start) as usize * CHANNELS + channel]
            }
        };

        let mut count = 0;
        loop {
            let position = self.position(ratio);
            let index = position.floor() as i64;
            if index + 1 >= end {
                break;
            }
            let frac = (position - index as f64) as f32;
            for channel in 0..CHANNELS {
                let a = sample(index, channel);
                let b = sample(index + 1, channel);
                output.push(a + (b - a) * frac);
            }
            self.produced += 1;
            count += 1;
        }

        if frames > 0 {
            let tail = (frames as usize - 1) * CHANNELS;
            self.last.copy_from_slice(&input[tail..tail + CHANNELS]);
        }
        self.consumed += frames;
        Ok(count)
    }
}

/// Wraps a resampler and keeps a copy of every chunk it produced.
pub(crate) struct RecordingResampler<R> {
    inner: R,
    chunks: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl<R: FractionalResampler> RecordingResampler<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn chunks(&self) -> Arc<Mutex<Vec<Vec<f32>>>> {
        Arc::clone(&self.chunks)
    }
}

impl<R: FractionalResampler> FractionalResampler for RecordingResampler<R> {
    fn process(
        &mut self,
        input: &[f32],
        ratio: f64,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResampleError> {
        let start = output.len();
        let produced = self.inner.process(input, ratio, output)?;
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.push(output[start..].to_vec());
        }
        Ok(produced)
    }
}
