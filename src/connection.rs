//! Connection to the engine: connect, receive loop, send, close.
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─► Closing ─► Closed
//!                     │             │                     ▲
//!                     └─────────────┴── fault / remote ───┘
//! ```
//!
//! The receive loop owns the [`FrameBuffer`] and publishes one
//! [`Event::MessageReceived`] per decoded message, in arrival order. It
//! always concludes with exactly one [`Event::SocketClosed`], preceded by
//! [`Event::Fatal`] when it ended on a fault the local side did not cause.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{BasError, Result};
use crate::events::{Dispatcher, Event};
use crate::protocol::{encode_frame, FrameBuffer, Message, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::{self, ConnectPolicy, Incoming, WsReader, WsWriter};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default wait for the closing handshake before the receive loop is aborted.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Disconnected,
    /// Connect in progress (possibly retrying).
    Connecting,
    /// Socket open, receive loop running.
    Connected,
    /// Local close in progress.
    Closing,
    /// Receive loop finished. Terminal.
    Closed,
}

/// Configuration for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connect retry policy.
    pub connect: ConnectPolicy,
    /// Writer task configuration.
    pub writer: WriterConfig,
    /// Largest undelimited frame accepted.
    pub max_frame_size: usize,
    /// Wait for the closing handshake on `close()`.
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect: ConnectPolicy::default(),
            writer: WriterConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// State shared with the receive loop.
struct Shared {
    state: watch::Sender<ConnectionState>,
    events: Arc<Dispatcher>,
    writer: Mutex<Option<WriterHandle>>,
    fatal_reported: AtomicBool,
    finished: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Publish a fatal event, once per connection.
    fn report_fatal(&self, reason: String) {
        if !self.fatal_reported.swap(true, Ordering::AcqRel) {
            self.events.publish(Event::Fatal(reason));
        }
    }

    /// Conclude the connection. Only the first call has an effect.
    async fn finish(&self, outcome: Result<()>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        match outcome {
            Ok(()) => tracing::info!("connection closed"),
            Err(e) if self.state() == ConnectionState::Closing => {
                tracing::debug!("error while closing: {}", e);
            }
            Err(e) => {
                tracing::error!("connection failed: {}", e);
                self.report_fatal(e.to_string());
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        self.events.publish(Event::SocketClosed);

        // Dropping the last handle stops the writer task.
        self.writer.lock().await.take();
    }
}

/// One duplex connection to the engine.
pub struct Connection {
    shared: Arc<Shared>,
    config: ConnectionConfig,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Connection {
    /// Create a disconnected connection publishing to `events`.
    pub fn new(events: Arc<Dispatcher>, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                state,
                events,
                writer: Mutex::new(None),
                fatal_reported: AtomicBool::new(false),
                finished: AtomicBool::new(false),
            }),
            config,
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Connect to the engine on `port` and start the receive loop.
    ///
    /// A connection is single-use: connecting is only allowed from
    /// [`ConnectionState::Disconnected`].
    ///
    /// # Errors
    ///
    /// Returns [`BasError::SocketNotConnected`] once the connect retries are
    /// exhausted; the connection is then closed. A `close()` while connecting
    /// abandons the attempt and returns [`BasError::NetworkFatal`].
    pub async fn connect(&self, port: u16) -> Result<()> {
        let mut current = ConnectionState::Disconnected;
        let allowed = self.shared.state.send_if_modified(|state| {
            current = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !allowed {
            return Err(BasError::NetworkFatal(format!(
                "cannot connect a connection that is {:?}",
                current
            )));
        }

        let mut state = self.watch_state();
        let connecting = transport::connect(port, &self.config.connect);
        let outcome = tokio::select! {
            outcome = connecting => outcome,
            _ = state.wait_for(|state| *state != ConnectionState::Connecting) => {
                tracing::info!("connect to port {} abandoned", port);
                return Err(closed_while_connecting());
            }
        };

        let (writer, reader) = match outcome {
            Ok(halves) => halves,
            Err(e) => {
                self.shared.state.send_replace(ConnectionState::Closed);
                self.shared.finished.store(true, Ordering::Release);
                return Err(e);
            }
        };

        self.attach(writer, reader).await
    }

    /// Take over an established socket and start the receive loop.
    async fn attach(&self, writer: WsWriter, reader: WsReader) -> Result<()> {
        let (handle, writer_task) = spawn_writer_task(writer, self.config.writer.clone());
        *self.shared.writer.lock().await = Some(handle);
        *self.writer_task.lock().await = Some(writer_task);

        let opened = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !opened {
            // close() ran while we were connecting and may already be done.
            drop(reader);
            self.shared.writer.lock().await.take();
            let writer_task = self.writer_task.lock().await.take();
            if let Some(task) = writer_task {
                let abort = task.abort_handle();
                if tokio::time::timeout(self.config.close_timeout, task)
                    .await
                    .is_err()
                {
                    abort.abort();
                }
            }
            self.shared.finish(Ok(())).await;
            return Err(closed_while_connecting());
        }

        self.shared.events.publish(Event::SocketOpened);

        let task = tokio::spawn(read_loop(
            reader,
            self.shared.clone(),
            self.config.max_frame_size,
        ));
        *self.reader_task.lock().await = Some(task);

        Ok(())
    }

    /// Encode and write one message, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`BasError::NetworkFatal`] if the connection is not open or
    /// the write failed. A failed write closes the connection; it is not
    /// retried.
    pub async fn send(&self, message: &Message) -> Result<u32> {
        let writer = self.shared.writer.lock().await.clone();
        let writer = match (self.state(), writer) {
            (ConnectionState::Connected, Some(writer)) => writer,
            (state, _) => {
                return Err(BasError::NetworkFatal(format!("connection is {:?}", state)));
            }
        };

        let frame = encode_frame(message)?;

        if let Err(e) = writer.send(frame).await {
            tracing::error!("send of {} {} failed: {}", message.kind(), message.id, e);
            self.shared.report_fatal(e.to_string());
            self.close().await;
            return Err(e);
        }

        tracing::debug!("message sent: {} id={}", message.kind(), message.id);
        self.shared
            .events
            .publish(Event::MessageSent(message.clone()));
        Ok(message.id)
    }

    /// Close the connection. Closing a connection that is not open is a no-op.
    pub async fn close(&self) {
        let initiated = self.shared.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                *state = ConnectionState::Closing;
                true
            }
            _ => false,
        });
        if !initiated {
            return;
        }

        tracing::info!("closing connection");

        // The writer task sends a close frame once its last handle is gone.
        self.shared.writer.lock().await.take();

        let reader = self.reader_task.lock().await.take();
        if let Some(task) = reader {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.config.close_timeout, task)
                .await
                .is_err()
            {
                tracing::warn!(
                    "no closing handshake within {:?}, dropping connection",
                    self.config.close_timeout
                );
                abort.abort();
            }
        }

        let writer = self.writer_task.lock().await.take();
        if let Some(task) = writer {
            if !task.is_finished() {
                task.abort();
            }
        }

        self.shared.finish(Ok(())).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.get_mut().take() {
            task.abort();
        }
    }
}

fn closed_while_connecting() -> BasError {
    BasError::NetworkFatal("connection closed while connecting".to_string())
}

/// Receive loop task.
async fn read_loop(mut reader: WsReader, shared: Arc<Shared>, max_frame_size: usize) {
    let outcome = receive(&mut reader, &shared.events, max_frame_size).await;
    shared.finish(outcome).await;
}

/// Read, decode and publish until the socket ends.
///
/// Returns `Ok` on a clean remote close, the cause otherwise. Messages
/// decoded ahead of a bad frame are still published.
async fn receive(reader: &mut WsReader, events: &Dispatcher, max_frame_size: usize) -> Result<()> {
    let mut buffer = FrameBuffer::with_max_frame_size(max_frame_size);

    loop {
        let data = match reader.recv().await {
            Some(Ok(Incoming::Data(data))) => data,
            None | Some(Ok(Incoming::Closed)) => {
                if !buffer.is_empty() {
                    tracing::warn!("discarding {} bytes of partial frame", buffer.len());
                }
                return Ok(());
            }
            Some(Err(e)) => return Err(e),
        };

        let (messages, error) = buffer.feed(&data);
        for message in messages {
            tracing::debug!("message received: {} id={}", message.kind(), message.id);
            events.publish(Event::MessageReceived(message));
        }
        if let Some(e) = error {
            return Err(e);
        }
    }
}
