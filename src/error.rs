//! Error types for bas-remote.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum BasError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error outside the retried connect path.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The provisioner reports that the script does not exist.
    #[error("Script with selected name not exist")]
    ScriptNotExist,

    /// The provisioner reports an unsupported engine version.
    #[error("Script engine not supported")]
    ScriptNotSupported,

    /// Connect retries exhausted.
    #[error("Cannot connect to the engine socket after {attempts} attempts")]
    SocketNotConnected {
        /// Number of connect attempts made.
        attempts: u32,
    },

    /// The WebSocket upgrade did not complete in time.
    #[error("WebSocket handshake did not complete within {0:?}")]
    OpenTimeout(Duration),

    /// The engine rejected the handshake credentials.
    #[error("Unsuccessful authentication")]
    Authentication,

    /// The engine did not signal readiness in time.
    #[error("Engine did not become ready within {0:?}")]
    StartupTimeout(Duration),

    /// Transport fault: connection closed or broken.
    #[error("Can not communicate with the engine, connection closed or broken: {0}")]
    NetworkFatal(String),

    /// Malformed frame or unexpected correlation id.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Remote function reported `success = false`.
    #[error("Function error: {0}")]
    Function(String),

    /// A runner lost its transport while waiting for the result.
    #[error("Runner fatal error: {0}")]
    RunnerFatal(String),

    /// Request issued before `start()` completed.
    #[error("Request can not be sent. Client is not started")]
    ClientNotStarted,

    /// `start()` called twice.
    #[error("Client is already started")]
    ClientAlreadyStarted,

    /// Operation attempted after `close()`.
    #[error("Client is closed")]
    ClientClosed,

    /// Thread function call before `Thread::start`.
    #[error("Thread is not started")]
    ThreadNotStarted,

    /// `Thread::start` called twice.
    #[error("Thread is already started")]
    ThreadAlreadyStarted,

    /// Thread used after `Thread::stop`.
    #[error("Thread is stopped")]
    ThreadStopped,

    /// Thread is still running its previous function.
    #[error("Another task is already running. Unable to start a new one")]
    AlreadyRunning,
}

impl BasError {
    /// Whether this error means the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BasError::Io(_)
                | BasError::WebSocket(_)
                | BasError::NetworkFatal(_)
                | BasError::Protocol(_)
                | BasError::RunnerFatal(_)
        )
    }

    /// Whether this error was raised at the call site without network activity.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            BasError::ClientNotStarted
                | BasError::ClientAlreadyStarted
                | BasError::ClientClosed
                | BasError::ThreadNotStarted
                | BasError::ThreadAlreadyStarted
                | BasError::ThreadStopped
                | BasError::AlreadyRunning
        )
    }
}

/// Result type alias using BasError.
pub type Result<T> = std::result::Result<T, BasError>;
