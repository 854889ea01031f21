//! Request module - correlation of outbound requests to inbound replies.
//!
//! - [`RequestRegistry`] owns the id → completion handle map
//! - [`PendingRequest`] is the caller's side of one entry

mod registry;

pub use registry::{random_correlation_id, RequestRegistry};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{BasError, Result};

/// Caller's handle on one registered request.
#[derive(Debug)]
pub struct PendingRequest {
    id: u32,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingRequest {
    pub(crate) fn new(id: u32, rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self { id, rx }
    }

    /// Correlation id of the request.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns the error the request was resolved with, or
    /// [`BasError::NetworkFatal`] if the entry was dropped unresolved.
    pub async fn wait(self) -> Result<Value> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BasError::NetworkFatal(format!(
                "request {} abandoned",
                self.id
            ))),
        }
    }
}
