//! Control module - the startup handshake.
//!
//! The handshake gates every other request: credentials go out when the
//! socket opens, and the session is ready once the engine starts its first
//! thread.
//!
//! # Workflow
//!
//! 1. Client connects to the engine socket
//! 2. Client sends `remote_control_data` with the credentials
//! 3. Engine sends `initialize`, client answers `accept_resources`
//! 4. Engine sends `thread_start` (ready) or `message` (rejected)

mod handshake;

pub use handshake::{
    accept_resources_payload, classify, Credentials, HandshakeStep, StartupSlot,
};
