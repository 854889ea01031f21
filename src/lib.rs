//! # bas-remote
//!
//! Rust client for driving a BAS script engine remotely.
//!
//! The engine listens on a loopback WebSocket port and exchanges JSON
//! messages delimited by `---Message--End---`. This crate connects to it,
//! performs the startup handshake and lets callers invoke script functions,
//! either ad hoc or inside long-lived remote threads.
//!
//! ## Architecture
//!
//! - **Protocol**: message model and delimiter framing
//! - **Connection**: socket lifecycle, receive loop, writer task
//! - **Session** ([`Client`]): handshake, request correlation, fatal fan-out
//! - **Runners**: [`Runner`] futures for function calls, [`Thread`] handles
//!
//! ## Example
//!
//! ```no_run
//! use bas_remote::Client;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> bas_remote::Result<()> {
//!     let client = Client::builder()
//!         .script("TestRemoteControl")
//!         .port(9000)
//!         .start()
//!         .await?;
//!
//!     let mut thread = client.create_thread();
//!     thread.start().await?;
//!     let result = thread.run_function("Add", json!({"X": 4, "Y": 5}))?.await?;
//!     println!("{}", result);
//!     thread.stop().await?;
//!
//!     client.close().await
//! }
//! ```

pub mod connection;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod request;
pub mod runner;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, DEFAULT_STARTUP_TIMEOUT};
pub use control::Credentials;
pub use engine::{EngineDescriptor, EngineProvisioner, ExternalEngine};
pub use error::{BasError, Result};
pub use events::{Event, EventStream};
pub use protocol::Message;
pub use runner::{Runner, RunnerKind, RunnerState, Thread};
