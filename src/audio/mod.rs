mod buffer;

pub use buffer::{FrameBuffer, CHANNELS};
