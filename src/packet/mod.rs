//! The Velbus wire frame and its streaming decoder.

mod frame;
mod parser;

pub use frame::{Frame, ETX, HEADER_LENGTH, LENGTH_MASK, MAX_BODY_LENGTH, MIN_FRAME_LENGTH, PRIORITIES, PRIORITY_HIGH, STX};
pub use parser::{checksum, FrameBytes, Parser, MAX_BUFFER_LEN};
