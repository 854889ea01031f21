//! Protocol module - messages and framing.
//!
//! This module implements the text protocol spoken with the engine:
//! - JSON message records with typed accessors
//! - Delimiter-terminated framing
//! - Frame buffer for accumulating partial reads

mod frame_buffer;
mod message;

pub use frame_buffer::{encode_frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE, SEPARATOR};
pub use message::{kind, Message, Response, CORRELATION_ID_RANGE};
