//! Single-slot block handoff between two adjacent workers.
//!
//! One producer and one consumer share a slot holding one `FrameBuffer`.
//! Publishing and taking swap buffers with the slot instead of copying, so
//! three buffers rotate per edge and neither side ever touches a buffer the
//! other one owns. All waits re-check the pipeline stop flag; the context
//! wakes both condvars when a stop is requested.

use std::sync::{Condvar, Mutex};

use tracing::trace;

use super::context::PipelineContext;
use super::{lock_or_recover, StageKind};
use crate::audio::FrameBuffer;
use crate::resample::Pull;

/// What a producer does when the consumer has not taken the previous block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandoffPolicy {
    /// Wait until the slot is free. No block is ever lost.
    #[default]
    Strict,
    /// Replace the unconsumed block and keep going.
    FreeRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Delivered,
    /// Delivered, but an unconsumed block was dropped to make room.
    Overwrote,
    /// The pipeline is stopping; the block was not delivered.
    Stopped,
}

struct Slot {
    block: FrameBuffer,
    full: bool,
    finished: bool,
    published: u64,
    overwritten: u64,
}

pub struct Handoff {
    from: StageKind,
    to: StageKind,
    capacity: usize,
    policy: HandoffPolicy,
    slot: Mutex<Slot>,
    filled: Condvar,
    vacated: Condvar,
}

impl Handoff {
    pub(crate) fn new(
        from: StageKind,
        to: StageKind,
        capacity: usize,
        policy: HandoffPolicy,
    ) -> Self {
        Self {
            from,
            to,
            capacity,
            policy,
            slot: Mutex::new(Slot {
                block: FrameBuffer::new(capacity),
                full: false,
                finished: false,
                published: 0,
                overwritten: 0,
            }),
            filled: Condvar::new(),
            vacated: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> HandoffPolicy {
        self.policy
    }

    /// Hands `block` to the consumer, leaving a spare buffer in its place.
    ///
    /// The block is stamped with the next sequence number of this edge.
    pub fn publish(&self, ctx: &PipelineContext, block: &mut FrameBuffer) -> Published {
        debug_assert_eq!(block.capacity(), self.capacity);

        let mut slot = lock_or_recover(&self.slot);
        if self.policy == HandoffPolicy::Strict {
            slot = self
                .vacated
                .wait_while(slot, |s| s.full && !ctx.is_stopping())
                .unwrap_or_else(|e| e.into_inner());
        }
        if ctx.is_stopping() {
            return Published::Stopped;
        }

        let overwrote = slot.full;
        slot.published += 1;
        block.set_sequence(slot.published);
        std::mem::swap(&mut slot.block, block);
        slot.full = true;
        if overwrote {
            slot.overwritten += 1;
            trace!(
                from = %self.from,
                to = %self.to,
                dropped = slot.overwritten,
                "overwrote unconsumed block"
            );
        }
        drop(slot);
        self.filled.notify_one();

        if overwrote {
            Published::Overwrote
        } else {
            Published::Delivered
        }
    }

    /// Takes the next block into `block`, handing back the consumer's old
    /// buffer for the producer to reuse.
    ///
    /// A pending block is still delivered after `finish`; `Finished` is only
    /// reported once the slot is empty.
    pub fn take(&self, ctx: &PipelineContext, block: &mut FrameBuffer) -> Pull {
        debug_assert_eq!(block.capacity(), self.capacity);

        let slot = lock_or_recover(&self.slot);
        let mut slot = self
            .filled
            .wait_while(slot, |s| !s.full && !s.finished && !ctx.is_stopping())
            .unwrap_or_else(|e| e.into_inner());
        if ctx.is_stopping() {
            return Pull::Stopped;
        }
        if !slot.full {
            return Pull::Finished;
        }

        std::mem::swap(&mut slot.block, block);
        slot.full = false;
        drop(slot);
        self.vacated.notify_one();
        Pull::Block
    }

    /// Marks the end of the stream on this edge.
    pub fn finish(&self) {
        lock_or_recover(&self.slot).finished = true;
        self.filled.notify_all();
    }

    /// Wakes both sides so they re-check the stop flag.
    pub(crate) fn wake_all(&self) {
        // Taking the lock orders this after any waiter's predicate check.
        let _slot = lock_or_recover(&self.slot);
        self.filled.notify_all();
        self.vacated.notify_all();
    }

    /// Blocks published on this edge so far.
    pub fn published(&self) -> u64 {
        lock_or_recover(&self.slot).published
    }

    /// Blocks dropped by free-running overwrites.
    pub fn overwritten(&self) -> u64 {
        lock_or_recover(&self.slot).overwritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StopReason;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn edge(ctx: &PipelineContext, policy: HandoffPolicy) -> Arc<Handoff> {
        ctx.handoff(StageKind::Input, StageKind::Output, 4, policy)
    }

    fn block_with(value: f32) -> FrameBuffer {
        let mut block = FrameBuffer::new(4);
        block.frames_mut(0, 4).fill(value);
        block.set_frames(4);
        block
    }

    #[test]
    fn test_strict_delivers_every_block_in_order() {
        let ctx = PipelineContext::new();
        let edge = edge(&ctx, HandoffPolicy::Strict);

        let producer = {
            let ctx = Arc::clone(&ctx);
            let edge = Arc::clone(&edge);
            thread::spawn(move || {
                for i in 0..200 {
                    let mut block = block_with(i as f32);
                    assert_eq!(edge.publish(&ctx, &mut block), Published::Delivered);
                }
                edge.finish();
            })
        };

        let mut received = FrameBuffer::new(4);
        let mut values = Vec::new();
        let mut sequences = Vec::new();
        loop {
            match edge.take(&ctx, &mut received) {
                Pull::Block => {
                    values.push(received.as_slice()[0]);
                    sequences.push(received.sequence());
                    // Slow consumer.
                    if values.len() % 50 == 0 {
                        thread::sleep(Duration::from_millis(5));
                    }
                }
                Pull::Finished => break,
                Pull::Stopped => panic!("unexpected stop"),
            }
        }
        producer.join().unwrap();

        let expected: Vec<f32> = (0..200).map(|i| i as f32).collect();
        assert_eq!(values, expected);
        assert_eq!(sequences, (1..=200).collect::<Vec<u64>>());
        assert_eq!(edge.overwritten(), 0);
    }

    #[test]
    fn test_free_running_overwrites_unconsumed_block() {
        let ctx = PipelineContext::new();
        let edge = edge(&ctx, HandoffPolicy::FreeRunning);

        let mut first = block_with(1.0);
        let mut second = block_with(2.0);
        assert_eq!(edge.publish(&ctx, &mut first), Published::Delivered);
        assert_eq!(edge.publish(&ctx, &mut second), Published::Overwrote);

        let mut received = FrameBuffer::new(4);
        assert_eq!(edge.take(&ctx, &mut received), Pull::Block);
        assert_eq!(received.as_slice()[0], 2.0);
        assert_eq!(received.sequence(), 2);
        assert_eq!(edge.overwritten(), 1);
    }

    #[test]
    fn test_pending_block_survives_finish() {
        let ctx = PipelineContext::new();
        let edge = edge(&ctx, HandoffPolicy::Strict);

        let mut block = block_with(3.0);
        edge.publish(&ctx, &mut block);
        edge.finish();

        let mut received = FrameBuffer::new(4);
        assert_eq!(edge.take(&ctx, &mut received), Pull::Block);
        assert_eq!(edge.take(&ctx, &mut received), Pull::Finished);
    }

    #[test]
    fn test_stop_wakes_blocked_consumer_and_producer() {
        let ctx = PipelineContext::new();
        let empty = edge(&ctx, HandoffPolicy::Strict);
        let full = edge(&ctx, HandoffPolicy::Strict);
        let mut block = block_with(0.0);
        full.publish(&ctx, &mut block);

        let consumer = {
            let ctx = Arc::clone(&ctx);
            let empty = Arc::clone(&empty);
            thread::spawn(move || empty.take(&ctx, &mut FrameBuffer::new(4)))
        };
        let producer = {
            let ctx = Arc::clone(&ctx);
            let full = Arc::clone(&full);
            thread::spawn(move || full.publish(&ctx, &mut block_with(1.0)))
        };

        thread::sleep(Duration::from_millis(20));
        let requested = Instant::now();
        ctx.request_stop(StopReason::Signal);

        assert_eq!(consumer.join().unwrap(), Pull::Stopped);
        assert_eq!(producer.join().unwrap(), Published::Stopped);
        assert!(requested.elapsed() < Duration::from_secs(1));
    }
}
