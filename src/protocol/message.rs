//! Message struct with typed accessors.
//!
//! A message is one JSON record on the wire:
//! `{"type": ..., "data": ..., "id": ..., "async": ...}`.
//!
//! # Example
//!
//! ```
//! use bas_remote::protocol::{kind, Message};
//! use serde_json::json;
//!
//! let message = Message::new(123456, kind::RUN_TASK, json!({"function_name": "Add"}), true);
//!
//! assert!(message.is_async());
//! assert!(message.has_correlation_id());
//! assert_eq!(message.kind(), "run_task");
//! ```

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Range correlation ids are drawn from.
pub const CORRELATION_ID_RANGE: RangeInclusive<u32> = 100_000..=999_999;

/// Message kinds used by the client and the engine.
pub mod kind {
    /// Engine → client: resources are about to be requested.
    pub const INITIALIZE: &str = "initialize";
    /// Engine → client: a thread started; the first one marks the session ready.
    pub const THREAD_START: &str = "thread_start";
    /// Engine → client before readiness: credentials rejected.
    pub const MESSAGE: &str = "message";
    /// Client → engine: credentials, sent on socket open.
    pub const REMOTE_CONTROL_DATA: &str = "remote_control_data";
    /// Client → engine: answer to `initialize`.
    pub const ACCEPT_RESOURCES: &str = "accept_resources";
    /// Client → engine: run one function.
    pub const RUN_TASK: &str = "run_task";
    /// Client → engine: start a thread.
    pub const START_THREAD: &str = "start_thread";
    /// Client → engine: stop a thread.
    pub const STOP_THREAD: &str = "stop_thread";
    /// Client → engine: read a global variable. The reply payload is JSON text.
    pub const GET_GLOBAL_VARIABLE: &str = "get_global_variable";
    /// Client → engine: write a global variable.
    pub const SET_GLOBAL_VARIABLE: &str = "set_global_variable";
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id (0 = none).
    #[serde(default)]
    pub id: u32,
    /// Message kind, selects protocol semantics.
    #[serde(rename = "type", alias = "name")]
    pub kind: String,
    /// Payload.
    #[serde(default)]
    pub data: Value,
    /// Whether the sender expects a correlated reply.
    #[serde(rename = "async", default)]
    pub is_async: bool,
}

impl Message {
    /// Create a new message. A null payload is sent as `{}`.
    pub fn new(id: u32, kind: &str, data: Value, is_async: bool) -> Self {
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };
        Self {
            id,
            kind: kind.to_string(),
            data,
            is_async,
        }
    }

    /// Get the message kind.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Check if the message carries the async flag.
    #[inline]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Check if the message carries a correlation id.
    #[inline]
    pub fn has_correlation_id(&self) -> bool {
        self.id != 0
    }

    /// Check if this message is a reply to an outstanding request.
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.is_async && self.has_correlation_id()
    }

    /// Decode the payload of a reply.
    ///
    /// `get_global_variable` replies carry JSON text which is parsed; every
    /// other kind passes the payload through unchanged.
    pub fn decode_reply(&self) -> Result<Value> {
        match (&self.data, self.kind.as_str()) {
            (Value::String(text), kind::GET_GLOBAL_VARIABLE) => Ok(serde_json::from_str(text)?),
            (data, _) => Ok(data.clone()),
        }
    }
}

/// Structured result of a `run_task` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the remote function succeeded.
    #[serde(default)]
    pub success: bool,
    /// Error text when `success` is false.
    #[serde(default)]
    pub message: String,
    /// Function result.
    #[serde(default)]
    pub result: Value,
}

impl Response {
    /// Parse a `run_task` payload, which is either JSON text or an object.
    pub fn from_payload(payload: Value) -> Result<Self> {
        match payload {
            Value::String(text) => Ok(serde_json::from_str(&text)?),
            other => Ok(serde_json::from_value(other)?),
        }
    }
}
