//! Transport module - the duplex stream to the engine.
//!
//! The engine speaks WebSocket on a loopback port. Each WebSocket message
//! carries raw protocol bytes; framing happens one layer up.

mod socket;

pub use socket::{
    connect, find_free_port, split, ConnectPolicy, Incoming, WsReader, WsWriter,
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_INTERVAL, DEFAULT_OPEN_TIMEOUT, ENGINE_HOST,
};

#[cfg(test)]
pub(crate) use socket::tests::ws_pair;
