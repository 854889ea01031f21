//! Dedicated writer task for frame sending.
//!
//! Callers never touch the socket sink directly. Frames go through an mpsc
//! channel to one writer task, which batches whatever is ready into a
//! single flush and reports the outcome back to every caller in the batch.
//!
//! # Architecture
//!
//! ```text
//! Runner 1 ─┐
//! Runner 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► WebSocket
//! Session  ─┘          ▲                            │
//!                      └──── oneshot ack ◄──────────┘
//! ```
//!
//! A write fault ends the writer task; every frame still queued is failed.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{BasError, Result};
use crate::transport::WsWriter;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single flush.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written, with its completion ack.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded frame text (JSON record + separator).
    pub text: String,
    ack: oneshot::Sender<Result<()>>,
}

impl OutboundFrame {
    /// Create a new outbound frame and the receiver of its ack.
    pub fn new(text: String) -> (Self, oneshot::Receiver<Result<()>>) {
        let (ack, rx) = oneshot::channel();
        (Self { text, ack }, rx)
    }

    /// Total size of this frame in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.text.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable. Dropping every handle closes the socket gracefully.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Send a frame and wait until it is flushed to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`BasError::NetworkFatal`] if the writer task is gone or the
    /// write failed. Writes are not retried.
    pub async fn send(&self, text: String) -> Result<()> {
        let (frame, ack) = OutboundFrame::new(text);

        self.tx
            .send(frame)
            .await
            .map_err(|_| BasError::NetworkFatal("writer closed".to_string()))?;

        ack.await
            .map_err(|_| BasError::NetworkFatal("writer dropped the frame".to_string()))?
    }

    /// Check if the writer task has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle resolves
/// once the writer stops, with the write error if it stopped on one.
pub fn spawn_writer_task(
    writer: WsWriter,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: WsWriter) -> Result<()> {
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                // All handles dropped: close gracefully.
                tracing::debug!("writer channel closed, closing socket");
                return writer.close().await;
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let bytes: usize = batch.iter().map(OutboundFrame::size).sum();

        match write_batch(&mut writer, &mut batch).await {
            Ok(()) => {
                tracing::trace!("flushed {} frames ({} bytes)", batch.len(), bytes);
                for frame in batch {
                    let _ = frame.ack.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::error!("write failed: {}", e);
                let reason = e.to_string();
                for frame in batch {
                    let _ = frame.ack.send(Err(BasError::NetworkFatal(reason.clone())));
                }
                rx.close();
                while let Ok(frame) = rx.try_recv() {
                    let _ = frame.ack.send(Err(BasError::NetworkFatal(reason.clone())));
                }
                return Err(e);
            }
        }
    }
}

/// Feed every frame of the batch, then flush once.
async fn write_batch(writer: &mut WsWriter, batch: &mut [OutboundFrame]) -> Result<()> {
    for frame in batch.iter_mut() {
        writer.feed_text(std::mem::take(&mut frame.text)).await?;
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ws_pair, Incoming};

    #[test]
    fn test_outbound_frame_creation() {
        let (frame, _ack) = OutboundFrame::new("hello".to_string());
        assert_eq!(frame.size(), 5);
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let ((client_writer, _client_reader), (_server_writer, mut server_reader)) =
            ws_pair().await;
        let (handle, _task) = spawn_writer_task(client_writer, WriterConfig::default());

        handle.send("hello".to_string()).await.unwrap();

        let incoming = server_reader.recv().await.unwrap().unwrap();
        assert_eq!(incoming, Incoming::Data(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let ((client_writer, _client_reader), (_server_writer, mut server_reader)) =
            ws_pair().await;
        let (handle, _task) = spawn_writer_task(client_writer, WriterConfig::default());

        for i in 0..10 {
            handle.send(format!("frame-{}", i)).await.unwrap();
        }

        for i in 0..10 {
            let incoming = server_reader.recv().await.unwrap().unwrap();
            assert_eq!(incoming, Incoming::Data(format!("frame-{}", i).into_bytes()));
        }
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let ((client_writer, _client_reader), (_server_writer, mut server_reader)) =
            ws_pair().await;
        let (handle, task) = spawn_writer_task(client_writer, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(
            server_reader.recv().await.unwrap().unwrap(),
            Incoming::Closed
        );
    }

    #[tokio::test]
    async fn test_send_after_peer_gone_fails() {
        let ((client_writer, client_reader), server) = ws_pair().await;
        drop(server);
        drop(client_reader);
        let (handle, task) = spawn_writer_task(client_writer, WriterConfig::default());

        let result = handle.send("lost".to_string()).await;

        assert!(matches!(result, Err(BasError::NetworkFatal(_))));
        assert!(task.await.unwrap().is_err());
        assert!(handle.is_closed());
    }
}
