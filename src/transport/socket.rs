//! Loopback WebSocket to the engine.
//!
//! The engine listens on `ws://127.0.0.1:<port>`. Connecting is retried
//! while the port refuses connections, which is normal right after the
//! engine process was launched. A listener that accepts TCP but never
//! answers the upgrade is cut off by the open timeout.
//!
//! # Example
//!
//! ```ignore
//! use bas_remote::transport::{connect, ConnectPolicy};
//!
//! let (writer, reader) = connect(port, &ConnectPolicy::default()).await?;
//! ```

use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message as WsFrame};
use tokio_tungstenite::WebSocketStream;

use crate::error::{BasError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Default number of connect attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 60;

/// Default pause between connect attempts.
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on one TCP connect plus WebSocket upgrade.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed local address the engine binds to.
pub const ENGINE_HOST: &str = "127.0.0.1";

type BoxedSink = Pin<Box<dyn Sink<WsFrame, Error = tungstenite::Error> + Send>>;
type BoxedStream = Pin<Box<dyn Stream<Item = std::result::Result<WsFrame, tungstenite::Error>> + Send>>;

/// Retry policy for [`connect`].
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    /// Attempts before giving up.
    pub attempts: u32,
    /// Pause after each refused attempt.
    pub interval: Duration,
    /// Bound on each attempt, upgrade included.
    pub open_timeout: Duration,
    /// Largest WebSocket message or frame accepted; `None` keeps the
    /// tungstenite defaults.
    pub max_message_size: Option<usize>,
}

impl ConnectPolicy {
    /// WebSocket settings applied to the connection.
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(size) = self.max_message_size {
            config.max_message_size = Some(size);
            config.max_frame_size = Some(size);
        }
        config
    }
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            interval: DEFAULT_CONNECT_INTERVAL,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            max_message_size: Some(DEFAULT_MAX_FRAME_SIZE),
        }
    }
}

/// Data or close notification read from the socket.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    /// Payload of a text or binary WebSocket message.
    Data(Vec<u8>),
    /// The peer sent a close frame.
    Closed,
}

/// Write half of the engine socket.
pub struct WsWriter {
    sink: BoxedSink,
}

impl WsWriter {
    /// Queue a text message without flushing.
    pub async fn feed_text(&mut self, text: String) -> Result<()> {
        self.sink.feed(WsFrame::Text(text)).await?;
        Ok(())
    }

    /// Flush queued messages to the socket.
    pub async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await?;
        Ok(())
    }

    /// Send a close frame and close the sink.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

/// Read half of the engine socket.
pub struct WsReader {
    stream: BoxedStream,
}

impl WsReader {
    /// Receive the next data chunk, returning `None` when the stream ends.
    ///
    /// Control frames are skipped; tungstenite answers pings itself.
    pub async fn recv(&mut self) -> Option<Result<Incoming>> {
        loop {
            match self.stream.next().await? {
                Ok(WsFrame::Text(text)) => return Some(Ok(Incoming::Data(text.into_bytes()))),
                Ok(WsFrame::Binary(data)) => return Some(Ok(Incoming::Data(data))),
                Ok(WsFrame::Close(_)) => return Some(Ok(Incoming::Closed)),
                Ok(WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(BasError::WebSocket(e))),
            }
        }
    }
}

/// Split an established WebSocket into writer and reader halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (WsWriter, WsReader)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (
        WsWriter {
            sink: Box::pin(sink),
        },
        WsReader {
            stream: Box::pin(stream),
        },
    )
}

/// Connect to the engine on `port`, retrying while the port refuses.
///
/// # Errors
///
/// Returns [`BasError::SocketNotConnected`] once `policy.attempts` refused
/// attempts are exhausted, [`BasError::OpenTimeout`] if an attempt does not
/// complete within `policy.open_timeout`, or the WebSocket error of any
/// other failure.
pub async fn connect(port: u16, policy: &ConnectPolicy) -> Result<(WsWriter, WsReader)> {
    let url = format!("ws://{}:{}", ENGINE_HOST, port);
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        tracing::debug!("connecting to {}, attempt {}", url, attempt);

        let opening = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            Some(policy.websocket_config()),
            false,
        );
        let outcome = match tokio::time::timeout(policy.open_timeout, opening).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!("no upgrade from {} within {:?}", url, policy.open_timeout);
                return Err(BasError::OpenTimeout(policy.open_timeout));
            }
        };

        match outcome {
            Ok((ws, _response)) => {
                tracing::info!("connected to {}", url);
                return Ok(split(ws));
            }
            Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                if attempt >= attempts {
                    tracing::error!("giving up on {} after {} attempts", url, attempt);
                    return Err(BasError::SocketNotConnected { attempts: attempt });
                }
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
            Err(e) => return Err(BasError::WebSocket(e)),
        }
    }
}

/// Find a free loopback port for the engine to bind.
pub async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind((ENGINE_HOST, 0)).await?;
    Ok(listener.local_addr()?.port())
}
