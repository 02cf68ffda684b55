//! Gateway wire protocol: frame codec, command codes and message bodies.

pub mod command;
pub mod frame;
pub mod messages;

pub use command::{Command, EventMask};
pub use frame::{FrameError, MAX_FRAME_LEN, encode_frame, pack, pack_empty, try_decode_frame, unpack};
