/// Interleaved stereo samples per frame.
pub const CHANNELS: usize = 2;

/// Fixed-capacity interleaved stereo block (`[L0, R0, L1, R1, ...]`).
///
/// Everything is addressed in frames. The capacity is chosen once at
/// allocation; `frames` tracks how many leading frames hold valid data, which
/// is the full capacity except for the final block of a finished stream.
/// `sequence` is stamped by the handoff that last published the block.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    data: Vec<f32>,
    capacity: usize,
    frames: usize,
    sequence: u64,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity * CHANNELS],
            capacity,
            frames: 0,
            sequence: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn set_frames(&mut self, frames: usize) {
        debug_assert!(
            frames <= self.capacity,
            "{} frames exceed capacity {}",
            frames,
            self.capacity
        );
        self.frames = frames.min(self.capacity);
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Valid samples only.
    pub fn as_slice(&self) -> &[f32] {
        &self.data[..self.frames * CHANNELS]
    }

    /// The whole backing store, valid or not.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Samples of `count` frames starting at frame `start`.
    pub fn frames_mut(&mut self, start: usize, count: usize) -> &mut [f32] {
        &mut self.data[start * CHANNELS..(start + count) * CHANNELS]
    }

    pub fn frame(&self, index: usize) -> (f32, f32) {
        let offset = index * CHANNELS;
        (self.data[offset], self.data[offset + 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_in_frames() {
        let mut buffer = FrameBuffer::new(64);
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.as_mut_slice().len(), 128);
        assert!(buffer.is_empty());

        buffer.set_frames(10);
        assert_eq!(buffer.as_slice().len(), 20);
    }

    #[test]
    fn test_frame_access_is_interleaved() {
        let mut buffer = FrameBuffer::new(4);
        buffer
            .as_mut_slice()
            .copy_from_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        buffer.set_frames(4);

        assert_eq!(buffer.frame(2), (4.0, 5.0));
        assert_eq!(buffer.frames_mut(1, 2), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    #[should_panic]
    fn test_addressing_past_capacity_panics() {
        let mut buffer = FrameBuffer::new(8);
        let _ = buffer.frames_mut(6, 3);
    }
}
