//! Registry of outstanding async requests.
//!
//! Maps a correlation id to the completion handle of the caller waiting on
//! it. Each id is live for at most one request at a time: ids are drawn at
//! random from [`CORRELATION_ID_RANGE`] and re-drawn while taken. Every
//! entry is resolved at most once, either by its reply or by [`fail_all`].
//!
//! [`fail_all`]: RequestRegistry::fail_all
//!
//! # Example
//!
//! ```
//! use bas_remote::request::RequestRegistry;
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let registry = RequestRegistry::new();
//! let pending = registry.register().await.unwrap();
//! let id = pending.id();
//!
//! registry.resolve(id, Ok(json!(5))).await.unwrap();
//! assert_eq!(pending.wait().await.unwrap(), json!(5));
//! # });
//! ```

use std::collections::HashMap;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use super::PendingRequest;
use crate::error::{BasError, Result};
use crate::protocol::CORRELATION_ID_RANGE;

#[derive(Default)]
struct State {
    pending: HashMap<u32, oneshot::Sender<Result<Value>>>,
    /// Set once the registry was bulk-failed; holds the reason.
    closed: Option<String>,
}

/// Instance-owned map of outstanding requests.
#[derive(Default)]
pub struct RequestRegistry {
    state: Mutex<State>,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request under a fresh correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`BasError::NetworkFatal`] if the registry was already
    /// bulk-failed, since no reply can arrive any more.
    pub async fn register(&self) -> Result<PendingRequest> {
        let mut state = self.state.lock().await;

        if let Some(reason) = &state.closed {
            return Err(BasError::NetworkFatal(reason.clone()));
        }

        let id = loop {
            let candidate = random_correlation_id();
            if !state.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, tx);
        tracing::trace!("registered request {} ({} pending)", id, state.pending.len());

        Ok(PendingRequest::new(id, rx))
    }

    /// Resolve the request registered under `id`, removing it.
    ///
    /// # Errors
    ///
    /// Returns [`BasError::Protocol`] if no request is registered under `id`
    /// (unknown, or already resolved).
    pub async fn resolve(&self, id: u32, outcome: Result<Value>) -> Result<()> {
        let sender = self.state.lock().await.pending.remove(&id);

        match sender {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    tracing::debug!("request {} resolved after its caller went away", id);
                }
                Ok(())
            }
            None => Err(BasError::Protocol(format!(
                "unexpected correlation id {}",
                id
            ))),
        }
    }

    /// Remove a request without resolving it (its write failed).
    pub async fn discard(&self, id: u32) {
        self.state.lock().await.pending.remove(&id);
    }

    /// Fail every outstanding request with a network-fatal error.
    ///
    /// The registry ends empty and rejects further registrations.
    /// Returns the number of requests failed.
    pub async fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock().await;
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.pending.drain().collect()
        };

        let count = drained.len();
        if count > 0 {
            tracing::warn!("failing {} outstanding requests: {}", count, reason);
        }
        for (_, sender) in drained {
            let _ = sender.send(Err(BasError::NetworkFatal(reason.to_string())));
        }
        count
    }

    /// Number of outstanding requests.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Check if no request is outstanding.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    /// Check if a request is registered under `id`.
    pub async fn contains(&self, id: u32) -> bool {
        self.state.lock().await.pending.contains_key(&id)
    }
}

/// Draw a correlation id from [`CORRELATION_ID_RANGE`].
pub fn random_correlation_id() -> u32 {
    rand::rng().random_range(CORRELATION_ID_RANGE)
}
