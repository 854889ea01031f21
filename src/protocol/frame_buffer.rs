//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Frames are JSON records
//! terminated by [`SEPARATOR`]; there is no length prefix, so the buffer
//! scans for the separator and keeps the trailing incomplete segment for
//! the next push.
//!
//! # Example
//!
//! ```
//! use bas_remote::protocol::{encode_frame, FrameBuffer, Message};
//! use serde_json::json;
//!
//! let frame = encode_frame(&Message::new(0, "initialize", json!({}), false)).unwrap();
//! let (head, tail) = frame.as_bytes().split_at(10);
//!
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(head).unwrap().is_empty());
//!
//! let messages = buffer.push(tail).unwrap();
//! assert_eq!(messages[0].kind(), "initialize");
//! ```

use bytes::BytesMut;

use super::Message;
use crate::error::{BasError, Result};

/// Literal token terminating every frame.
pub const SEPARATOR: &str = "---Message--End---";

/// Default largest undelimited buffer accepted (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Encode a message as one frame: JSON text followed by the separator.
pub fn encode_frame(message: &Message) -> Result<String> {
    let mut frame = serde_json::to_string(message)?;
    frame.push_str(SEPARATOR);
    Ok(frame)
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
///
/// Owned by the connection's receive loop; never shared.
pub struct FrameBuffer {
    /// Accumulated bytes not yet terminated by a separator.
    buffer: BytesMut,
    /// Bytes already scanned without finding a separator.
    scanned: usize,
    /// Maximum bytes allowed without a separator.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 64MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            scanned: 0,
            max_frame_size,
        }
    }

    /// Push data into the buffer and decode all complete messages.
    ///
    /// Returns messages in arrival order. The final, possibly incomplete
    /// segment stays buffered. Empty segments between separators are skipped.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a complete segment is not a valid message
    /// or if the undelimited tail grows past the max frame size. Messages
    /// decoded before the error are discarded; use [`FrameBuffer::feed`] to
    /// keep them.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        match self.feed(data) {
            (messages, None) => Ok(messages),
            (_, Some(error)) => Err(error),
        }
    }

    /// Push data and decode messages up to the first bad segment.
    ///
    /// Returns every message decoded before the error together with the
    /// error itself. Decoding stops at a malformed segment; the buffer is
    /// not usable once an error was returned.
    pub fn feed(&mut self, data: &[u8]) -> (Vec<Message>, Option<BasError>) {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();

        while let Some(segment) = self.try_extract_segment() {
            if segment.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Message>(&segment) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    let error = BasError::Protocol(format!(
                        "malformed frame ({} bytes): {}",
                        segment.len(),
                        e
                    ));
                    return (messages, Some(error));
                }
            }
        }

        if self.buffer.len() > self.max_frame_size {
            let error = BasError::Protocol(format!(
                "Frame size {} exceeds maximum {}",
                self.buffer.len(),
                self.max_frame_size
            ));
            return (messages, Some(error));
        }

        (messages, None)
    }

    /// Split off the next separator-terminated segment, without the separator.
    fn try_extract_segment(&mut self) -> Option<BytesMut> {
        let separator = SEPARATOR.as_bytes();

        // Resume a little before the scanned mark so a separator split
        // across pushes is still found.
        let start = self.scanned.saturating_sub(separator.len() - 1);
        let found = self.buffer[start..]
            .windows(separator.len())
            .position(|window| window == separator);

        match found {
            Some(offset) => {
                let end = start + offset;
                let segment = self.buffer.split_to(end);
                let _ = self.buffer.split_to(separator.len());
                self.scanned = 0;
                Some(segment)
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kind;
    use serde_json::json;

    fn frame_bytes(id: u32, kind: &str, data: serde_json::Value, is_async: bool) -> Vec<u8> {
        encode_frame(&Message::new(id, kind, data, is_async))
            .unwrap()
            .into_bytes()
    }

    #[test]
    fn test_encode_appends_separator() {
        let frame = encode_frame(&Message::new(1, kind::RUN_TASK, json!({}), true)).unwrap();
        assert!(frame.ends_with(SEPARATOR));
        assert!(frame.starts_with('{'));
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = frame_bytes(42, kind::RUN_TASK, json!("hello"), true);

        let messages = buffer.push(&bytes).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 42);
        assert_eq!(messages[0].data, json!("hello"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        for id in 1..=3 {
            combined.extend(frame_bytes(id, "x", json!(id), false));
        }

        let messages = buffer.push(&combined).unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, 1);
        assert_eq!(messages[1].id, 2);
        assert_eq!(messages[2].id, 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let first = frame_bytes(1, "x", json!("first"), false);
        let second = frame_bytes(2, "x", json!("second"), false);

        let mut data = first.clone();
        data.extend_from_slice(&second[..5]);

        let messages = buffer.push(&data).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 1);
        assert_eq!(buffer.len(), 5);

        let messages = buffer.push(&second[5..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 2);
    }

    #[test]
    fn test_separator_split_across_pushes() {
        let mut buffer = FrameBuffer::new();
        let bytes = frame_bytes(7, "x", json!({}), false);
        let split = bytes.len() - SEPARATOR.len() / 2;

        assert!(buffer.push(&bytes[..split]).unwrap().is_empty());
        let messages = buffer.push(&bytes[split..]).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 7);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = frame_bytes(1, "x", json!("hi"), true);
        bytes.extend(frame_bytes(2, "y", json!("there"), true));

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].data, json!("hi"));
        assert_eq!(all[1].kind(), "y");
    }

    #[test]
    fn test_multibyte_utf8_split() {
        let mut buffer = FrameBuffer::new();
        let bytes = frame_bytes(5, "x", json!("привет ✓"), false);
        let split = bytes.iter().position(|b| *b >= 0x80).unwrap() + 1;

        assert!(buffer.push(&bytes[..split]).unwrap().is_empty());
        let messages = buffer.push(&bytes[split..]).unwrap();

        assert_eq!(messages[0].data, json!("привет ✓"));
    }

    #[test]
    fn test_empty_segments_skipped() {
        let mut buffer = FrameBuffer::new();
        let mut data = SEPARATOR.as_bytes().to_vec();
        data.extend(frame_bytes(9, "x", json!({}), false));
        data.extend_from_slice(SEPARATOR.as_bytes());

        let messages = buffer.push(&data).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 9);
    }

    #[test]
    fn test_malformed_segment_is_protocol_error() {
        let mut buffer = FrameBuffer::new();
        let data = format!("{{not json{}", SEPARATOR);

        let result = buffer.push(data.as_bytes());

        assert!(matches!(result, Err(BasError::Protocol(_))));
    }

    #[test]
    fn test_feed_keeps_messages_before_malformed_segment() {
        let mut buffer = FrameBuffer::new();
        let mut data = frame_bytes(314159, kind::RUN_TASK, json!("done"), true);
        data.extend_from_slice(format!("{{garbage{}", SEPARATOR).as_bytes());
        data.extend(frame_bytes(2, "x", json!({}), false));

        let (messages, error) = buffer.feed(&data);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 314159);
        assert_eq!(messages[0].data, json!("done"));
        assert!(matches!(error, Some(BasError::Protocol(_))));
    }

    #[test]
    fn test_feed_keeps_messages_before_oversize_tail() {
        let mut buffer = FrameBuffer::with_max_frame_size(200);
        let mut data = frame_bytes(1, "x", json!({}), false);
        data.extend_from_slice(&[b'x'; 201]);

        let (messages, error) = buffer.feed(&data);

        assert_eq!(messages.len(), 1);
        assert!(error.unwrap().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_max_frame_size_validation() {
        let mut buffer = FrameBuffer::with_max_frame_size(100);

        let result = buffer.push(&[b'x'; 101]);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = frame_bytes(1, "x", json!({}), false);
        buffer.push(&bytes[..5]).unwrap();
        assert_eq!(buffer.len(), 5);

        buffer.clear();

        assert!(buffer.is_empty());
        let messages = buffer.push(&bytes).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_round_trip_any_split_point() {
        let message = Message::new(
            123456,
            kind::RUN_TASK,
            json!({"params": "{\"X\":2}", "function_name": "Add", "thread_id": 0}),
            true,
        );
        let bytes = encode_frame(&message).unwrap().into_bytes();

        for split in 0..=bytes.len() {
            let mut buffer = FrameBuffer::new();
            let mut decoded = buffer.push(&bytes[..split]).unwrap();
            decoded.extend(buffer.push(&bytes[split..]).unwrap());
            assert_eq!(decoded, vec![message.clone()], "split at {}", split);
        }
    }
}
