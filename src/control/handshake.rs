//! Startup handshake with the engine.
//!
//! ```text
//! client                              engine
//!   │ ── remote_control_data ────────────► │   (on socket open)
//!   │ ◄──────────────────── initialize ─── │
//!   │ ── accept_resources ───────────────► │
//!   │ ◄────────────────── thread_start ─── │   ready
//!   │ ◄─────────────────────── message ─── │   or: credentials rejected
//! ```
//!
//! Only the first `thread_start` / `message` resolves the startup; later
//! ones belong to normal operation.

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};

use crate::error::Result;
use crate::protocol::{kind, Message};

/// Credentials sent to the engine when the socket opens.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Credentials {
    /// Name of the script the engine should run.
    #[serde(rename = "script")]
    pub script_name: String,
    /// Account login, if the script is protected.
    pub login: Option<String>,
    /// Account password, if the script is protected.
    pub password: Option<String>,
}

impl Credentials {
    /// Credentials for a script without an account.
    pub fn new(script_name: &str) -> Self {
        Self {
            script_name: script_name.to_string(),
            login: None,
            password: None,
        }
    }

    /// Credentials for a protected script.
    pub fn with_account(script_name: &str, login: &str, password: &str) -> Self {
        Self {
            script_name: script_name.to_string(),
            login: Some(login.to_string()),
            password: Some(password.to_string()),
        }
    }

    /// Payload of the `remote_control_data` message.
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Payload of the `accept_resources` answer to `initialize`.
pub fn accept_resources_payload() -> Value {
    json!({ "-bas-empty-script-": true })
}

/// What a received message means for the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Engine asks for resources: answer with `accept_resources`.
    AcceptResources,
    /// Engine is ready.
    Ready,
    /// Engine rejected the credentials.
    Rejected,
    /// Not part of the handshake.
    None,
}

/// Classify a received message.
///
/// `Ready` and `Rejected` are only produced while the startup is pending.
pub fn classify(message: &Message, startup_pending: bool) -> HandshakeStep {
    match message.kind() {
        kind::INITIALIZE => HandshakeStep::AcceptResources,
        kind::THREAD_START if startup_pending => HandshakeStep::Ready,
        kind::MESSAGE if startup_pending => HandshakeStep::Rejected,
        _ => HandshakeStep::None,
    }
}

/// Single-use completion handle for the startup handshake.
#[derive(Debug)]
pub struct StartupSlot {
    tx: Mutex<Option<oneshot::Sender<Result<()>>>>,
}

impl StartupSlot {
    /// Create the slot and the receiver `start()` waits on.
    pub fn new() -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Check if the startup is still unresolved.
    pub async fn is_pending(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    /// Resolve the startup. Returns `false` (and does nothing) if it was
    /// already resolved.
    pub async fn resolve(&self, outcome: Result<()>) -> bool {
        match self.tx.lock().await.take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BasError;

    fn message(kind: &str) -> Message {
        Message::new(0, kind, json!({}), false)
    }

    #[test]
    fn test_credentials_payload() {
        let payload = Credentials::with_account("TestRemoteControl", "user", "secret")
            .to_payload()
            .unwrap();

        assert_eq!(payload["script"], "TestRemoteControl");
        assert_eq!(payload["login"], "user");
        assert_eq!(payload["password"], "secret");
    }

    #[test]
    fn test_credentials_without_account() {
        let payload = Credentials::new("Public").to_payload().unwrap();
        assert_eq!(payload["script"], "Public");
        assert!(payload["login"].is_null());
    }

    #[test]
    fn test_accept_resources_payload() {
        assert_eq!(accept_resources_payload()["-bas-empty-script-"], true);
    }

    #[test]
    fn test_classify_during_startup() {
        assert_eq!(
            classify(&message(kind::INITIALIZE), true),
            HandshakeStep::AcceptResources
        );
        assert_eq!(classify(&message(kind::THREAD_START), true), HandshakeStep::Ready);
        assert_eq!(classify(&message(kind::MESSAGE), true), HandshakeStep::Rejected);
        assert_eq!(classify(&message(kind::RUN_TASK), true), HandshakeStep::None);
    }

    #[test]
    fn test_classify_after_startup() {
        assert_eq!(
            classify(&message(kind::INITIALIZE), false),
            HandshakeStep::AcceptResources
        );
        assert_eq!(classify(&message(kind::THREAD_START), false), HandshakeStep::None);
        assert_eq!(classify(&message(kind::MESSAGE), false), HandshakeStep::None);
    }

    #[tokio::test]
    async fn test_startup_slot_resolves_once() {
        let (slot, rx) = StartupSlot::new();
        assert!(slot.is_pending().await);

        assert!(slot.resolve(Ok(())).await);
        assert!(!slot.resolve(Err(BasError::Authentication)).await);

        assert!(!slot.is_pending().await);
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_startup_slot_authentication_failure() {
        let (slot, rx) = StartupSlot::new();

        slot.resolve(Err(BasError::Authentication)).await;

        assert!(matches!(rx.await.unwrap(), Err(BasError::Authentication)));
    }
}
