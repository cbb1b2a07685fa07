//! Fixed-size output blocks from a variable-yield resampler.
//!
//! A fractional resampler hands back a slightly different number of frames on
//! every call. Downstream stages want blocks of exactly `frames_out` frames,
//! so the excess of one call is carried to the front of the next block:
//! - Leftover frames are always delivered first
//! - Fresh input is pulled one block at a time until the output block is full
//! - Whatever the last sub-call produced beyond the block becomes the leftover
//! - Once upstream ends, the resampler is flushed before the final partial
//!   block is handed out
//!
//! Every produced frame is delivered exactly once, in order, regardless of
//! ratio changes between calls.

use super::{FractionalResampler, ResampleError};
use crate::audio::{FrameBuffer, CHANNELS};

/// Result of asking upstream for the next input block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// The input buffer holds a fresh block.
    Block,
    /// Upstream ended; no more input will come.
    Finished,
    /// The pipeline is stopping.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFill {
    /// The output holds exactly `frames_out` frames.
    Full,
    /// Upstream ended; the output holds the remaining frames, possibly none.
    Finished,
    /// A stop arrived before the block was complete.
    Stopped,
}

pub struct ElasticResampler {
    resampler: Box<dyn FractionalResampler>,
    input: FrameBuffer,
    scratch: Vec<f32>,
    leftover: Vec<f32>,
    frames_out: usize,
}

impl ElasticResampler {
    pub fn new(
        resampler: Box<dyn FractionalResampler>,
        frames_in: usize,
        frames_out: usize,
    ) -> Self {
        Self {
            resampler,
            input: FrameBuffer::new(frames_in),
            scratch: Vec::with_capacity(frames_out * CHANNELS * 2),
            leftover: Vec::with_capacity(frames_out * CHANNELS * 2),
            frames_out,
        }
    }

    pub fn frames_in(&self) -> usize {
        self.input.capacity()
    }

    pub fn frames_out(&self) -> usize {
        self.frames_out
    }

    pub fn leftover_frames(&self) -> usize {
        self.leftover.len() / CHANNELS
    }

    /// Frames waiting to open the next block.
    pub fn leftover(&self) -> &[f32] {
        &self.leftover
    }

    /// Fills `out` with exactly `frames_out` frames at `ratio`.
    ///
    /// `pull` is called with the session's input buffer whenever more input is
    /// needed. An error from the resampler aborts the block; the partially
    /// filled output must then be discarded.
    pub fn resample_block<F>(
        &mut self,
        ratio: f64,
        out: &mut FrameBuffer,
        mut pull: F,
    ) -> Result<BlockFill, ResampleError>
    where
        F: FnMut(&mut FrameBuffer) -> Pull,
    {
        let wanted = self.frames_out;
        debug_assert!(out.capacity() >= wanted);

        let mut filled = 0;
        if !self.leftover.is_empty() {
            let carried = self.leftover_frames().min(wanted);
            out.frames_mut(0, carried)
                .copy_from_slice(&self.leftover[..carried * CHANNELS]);
            self.leftover.drain(..carried * CHANNELS);
            filled = carried;
        }

        while filled < wanted {
            self.scratch.clear();
            let produced = match pull(&mut self.input) {
                Pull::Block => {
                    self.resampler
                        .process(self.input.as_slice(), ratio, &mut self.scratch)?
                }
                Pull::Finished => match self.resampler.flush(&mut self.scratch)? {
                    0 => {
                        out.set_frames(filled);
                        return Ok(BlockFill::Finished);
                    }
                    flushed => flushed,
                },
                Pull::Stopped => {
                    out.set_frames(filled);
                    return Ok(BlockFill::Stopped);
                }
            };
            if produced * CHANNELS != self.scratch.len() {
                return Err(ResampleError::Process(format!(
                    "reported {} frames but wrote {} samples",
                    produced,
                    self.scratch.len()
                )));
            }

            let taken = produced.min(wanted - filled);
            out.frames_mut(filled, taken)
                .copy_from_slice(&self.scratch[..taken * CHANNELS]);
            filled += taken;

            // Only reached with an empty leftover, so order is preserved.
            self.leftover
                .extend_from_slice(&self.scratch[taken * CHANNELS..]);
        }

        out.set_frames(wanted);
        Ok(BlockFill::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::testing::{LinearResampler, RecordingResampler};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fill_ramp(block: &mut FrameBuffer, start: &mut f32) {
        let frames = block.capacity();
        for frame in block.frames_mut(0, frames).chunks_exact_mut(CHANNELS) {
            frame[0] = *start;
            frame[1] = -*start;
            *start += 1.0;
        }
        block.set_frames(frames);
    }

    #[test]
    fn test_exact_blocks_with_integer_ratio() {
        let mut session = ElasticResampler::new(Box::new(LinearResampler::new()), 256, 1024);
        let mut out = FrameBuffer::new(1024);
        let mut next = 0.0;

        for _ in 0..8 {
            let fill = session
                .resample_block(4.0, &mut out, |input| {
                    fill_ramp(input, &mut next);
                    Pull::Block
                })
                .unwrap();
            assert_eq!(fill, BlockFill::Full);
            assert_eq!(out.frames(), 1024);
            assert_eq!(session.leftover_frames(), 0);
        }
    }

    #[test]
    fn test_leftover_opens_next_block() {
        // Yields 300 frames per 100-frame input; blocks of 256 leave 44 over.
        let recorder = RecordingResampler::new(LinearResampler::new());
        let chunks = recorder.chunks();
        let mut session = ElasticResampler::new(Box::new(recorder), 100, 256);
        let mut out = FrameBuffer::new(256);
        let mut next = 0.0;

        let fill = session
            .resample_block(3.0, &mut out, |input| {
                fill_ramp(input, &mut next);
                Pull::Block
            })
            .unwrap();
        assert_eq!(fill, BlockFill::Full);

        let recorded = chunks.lock().unwrap().clone();
        let produced: usize = recorded.iter().map(|c| c.len() / CHANNELS).sum();
        let excess = produced - 256;
        assert_eq!(session.leftover_frames(), excess);

        let last = recorded.last().unwrap();
        let excess_samples = &last[last.len() - excess * CHANNELS..];
        assert_eq!(session.leftover(), excess_samples);

        session
            .resample_block(3.0, &mut out, |input| {
                fill_ramp(input, &mut next);
                Pull::Block
            })
            .unwrap();
        assert_eq!(&out.as_slice()[..excess * CHANNELS], excess_samples);
    }

    #[test]
    fn test_leftover_larger_than_block_is_spread_over_calls() {
        let mut session = ElasticResampler::new(Box::new(LinearResampler::new()), 512, 128);
        let mut out = FrameBuffer::new(128);
        let mut next = 0.0;
        let mut pulls = 0;

        for _ in 0..16 {
            let fill = session
                .resample_block(1.0, &mut out, |input| {
                    pulls += 1;
                    fill_ramp(input, &mut next);
                    Pull::Block
                })
                .unwrap();
            assert_eq!(fill, BlockFill::Full);
        }

        // 16 blocks of 128 frames need exactly 4 inputs of 512 frames.
        assert_eq!(pulls, 4);
        assert_eq!(session.leftover_frames(), 0);
    }

    #[test]
    fn test_frame_conservation_with_varying_ratio_and_sizes() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut session = ElasticResampler::new(Box::new(LinearResampler::new()), 441, 1000);
        let mut out = FrameBuffer::new(1000);
        let mut expected = Vec::new();
        let mut delivered = Vec::new();
        let mut next = 0.0;

        // Reference stream: every produced frame, in order, from a twin resampler.
        let mut twin = LinearResampler::new();
        let mut twin_input = FrameBuffer::new(441);
        let mut twin_next = 0.0;

        for _ in 0..200 {
            let ratio = rng.random_range(2.0..2.5);
            let fill = session
                .resample_block(ratio, &mut out, |input| {
                    fill_ramp(input, &mut next);
                    fill_ramp(&mut twin_input, &mut twin_next);
                    twin.process(twin_input.as_slice(), ratio, &mut expected)
                        .unwrap();
                    Pull::Block
                })
                .unwrap();
            assert_eq!(fill, BlockFill::Full);
            delivered.extend_from_slice(out.as_slice());
        }

        // Nothing dropped, nothing duplicated: delivered + leftover == produced.
        assert_eq!(
            delivered.len() + session.leftover().len(),
            expected.len()
        );
        assert_eq!(&expected[..delivered.len()], &delivered[..]);
        assert_eq!(&expected[delivered.len()..], session.leftover());
    }

    #[test]
    fn test_output_count_tracks_ratio_over_many_blocks() {
        let ratio = 192_000.0 / 44_100.0;
        let frames_in = 441;
        let mut session =
            ElasticResampler::new(Box::new(LinearResampler::new()), frames_in, 1920);
        let mut out = FrameBuffer::new(1920);
        let mut consumed = 0u64;
        let mut next = 0.0;

        for block in 1..=10_000u64 {
            session
                .resample_block(ratio, &mut out, |input| {
                    fill_ramp(input, &mut next);
                    consumed += frames_in as u64;
                    Pull::Block
                })
                .unwrap();
            let produced = block * 1920 + session.leftover_frames() as u64;
            let ideal = (ratio * consumed as f64).floor() as u64;
            assert!(
                produced.abs_diff(ideal) <= 1,
                "block {}: produced {} ideal {}",
                block,
                produced,
                ideal
            );
        }
    }

    #[test]
    fn test_sine_phase_does_not_drift() {
        let in_rate = 48_000.0;
        let ratio = 4.0;
        let freq = 1000.0;
        let frames_in = 480;
        let frames_out = 1024;
        let mut session =
            ElasticResampler::new(Box::new(LinearResampler::new()), frames_in, frames_out);
        let mut out = FrameBuffer::new(frames_out);
        let mut n = 0u64;
        let mut out_index = 0u64;

        for _ in 0..10_000 {
            session
                .resample_block(ratio, &mut out, |input| {
                    for frame in input.frames_mut(0, frames_in).chunks_exact_mut(CHANNELS) {
                        let t = n as f64 / in_rate;
                        let value = (2.0 * std::f64::consts::PI * freq * t).sin() as f32;
                        frame[0] = value;
                        frame[1] = value;
                        n += 1;
                    }
                    input.set_frames(frames_in);
                    Pull::Block
                })
                .unwrap();

            for frame in 0..frames_out {
                // The test resampler lags one input frame.
                let t = (out_index as f64 / ratio - 1.0) / in_rate;
                if t >= 0.0 {
                    let expected = (2.0 * std::f64::consts::PI * freq * t).sin() as f32;
                    let (left, _) = out.frame(frame);
                    assert!(
                        (left - expected).abs() < 0.01,
                        "frame {} drifted: {} vs {}",
                        out_index,
                        left,
                        expected
                    );
                }
                out_index += 1;
            }
        }
    }

    #[test]
    fn test_finished_upstream_returns_partial_block() {
        let mut session = ElasticResampler::new(Box::new(LinearResampler::new()), 100, 256);
        let mut out = FrameBuffer::new(256);
        let mut next = 0.0;
        let mut remaining = 2;

        let fill = session
            .resample_block(1.0, &mut out, |input| {
                if remaining == 0 {
                    return Pull::Finished;
                }
                remaining -= 1;
                fill_ramp(input, &mut next);
                Pull::Block
            })
            .unwrap();

        assert_eq!(fill, BlockFill::Finished);
        assert_eq!(out.frames(), 200);
        assert_eq!(session.leftover_frames(), 0);
    }

    #[test]
    fn test_stop_interrupts_block() {
        let mut session = ElasticResampler::new(Box::new(LinearResampler::new()), 100, 256);
        let mut out = FrameBuffer::new(256);

        let fill = session
            .resample_block(1.0, &mut out, |_| Pull::Stopped)
            .unwrap();
        assert_eq!(fill, BlockFill::Stopped);
        assert!(out.is_empty());
    }

    struct FailingResampler;

    impl FractionalResampler for FailingResampler {
        fn process(
            &mut self,
            _input: &[f32],
            _ratio: f64,
            _output: &mut Vec<f32>,
        ) -> Result<usize, ResampleError> {
            Err(ResampleError::Process("input exhausted".to_string()))
        }
    }

    #[test]
    fn test_resampler_error_aborts_block() {
        let mut session = ElasticResampler::new(Box::new(FailingResampler), 100, 256);
        let mut out = FrameBuffer::new(256);
        let mut next = 0.0;

        let result = session.resample_block(1.0, &mut out, |input| {
            fill_ramp(input, &mut next);
            Pull::Block
        });
        assert!(matches!(result, Err(ResampleError::Process(_))));
    }
}
