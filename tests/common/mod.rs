//! Scripted stand-in for the engine, driven from the test body.

#![allow(dead_code)]

use std::time::Duration;

use bas_remote::protocol::{encode_frame, kind, FrameBuffer, Message};
use bas_remote::{Client, ClientBuilder};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::WebSocketStream;

/// Listening side of the fake engine.
pub struct FakeEngine {
    listener: TcpListener,
    pub port: u16,
}

impl FakeEngine {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub async fn accept(&self) -> EngineSocket {
        let (stream, _) = self.listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        EngineSocket {
            ws,
            buffer: FrameBuffer::new(),
            queued: Vec::new(),
        }
    }

    /// Builder pointed at this engine with short timeouts.
    pub fn builder(&self) -> ClientBuilder {
        Client::builder()
            .script("TestRemoteControl")
            .port(self.port)
            .connect_attempts(3)
            .connect_interval(Duration::from_millis(10))
            .startup_timeout(Duration::from_secs(5))
            .close_timeout(Duration::from_millis(500))
    }
}

/// One accepted client connection.
pub struct EngineSocket {
    ws: WebSocketStream<TcpStream>,
    buffer: FrameBuffer,
    queued: Vec<Message>,
}

impl EngineSocket {
    /// Next message from the client, `None` once it closed.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            if !self.queued.is_empty() {
                return Some(self.queued.remove(0));
            }
            match self.ws.next().await? {
                Ok(WsFrame::Text(text)) => {
                    let messages = self.buffer.push(text.as_bytes()).unwrap();
                    self.queued.extend(messages);
                }
                Ok(WsFrame::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Next message, which must be of `expected` kind.
    pub async fn expect(&mut self, expected: &str) -> Message {
        let message = tokio::time::timeout(Duration::from_secs(5), self.recv())
            .await
            .expect("timed out waiting for the client")
            .expect("client closed the connection");
        assert_eq!(message.kind(), expected, "unexpected message {:?}", message);
        message
    }

    pub async fn send(&mut self, message: Message) {
        let frame = encode_frame(&message).unwrap();
        self.send_raw(&frame).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(WsFrame::Text(text.to_string())).await.unwrap();
    }

    /// Push an engine notification without correlation.
    pub async fn notify(&mut self, kind: &str, data: Value) {
        self.send(Message::new(0, kind, data, false)).await;
    }

    /// Answer a request under its correlation id.
    pub async fn reply(&mut self, request: &Message, data: Value) {
        self.send(Message::new(request.id, request.kind(), data, true))
            .await;
    }

    /// Answer a `run_task` request the way the engine does: JSON text.
    pub async fn reply_task(
        &mut self,
        request: &Message,
        success: bool,
        message: &str,
        result: Value,
    ) {
        let text = json!({
            "success": success,
            "message": message,
            "result": result,
        })
        .to_string();
        self.reply(request, Value::String(text)).await;
    }

    /// Run the engine side of the startup handshake, returning the
    /// credentials payload.
    pub async fn handshake(&mut self) -> Value {
        let credentials = self.expect(kind::REMOTE_CONTROL_DATA).await;
        self.notify(kind::INITIALIZE, json!({})).await;
        self.expect(kind::ACCEPT_RESOURCES).await;
        self.notify(kind::THREAD_START, json!({})).await;
        credentials.data
    }

    /// Drop the socket without a closing handshake.
    pub fn drop_abruptly(self) {
        drop(self);
    }

    /// Wait until the client closes its side.
    pub async fn wait_closed(&mut self) {
        while self.recv().await.is_some() {}
    }
}

/// Fake engine plus a client that completed the handshake.
pub async fn started_pair() -> (Client, EngineSocket) {
    let engine = FakeEngine::bind().await;
    let builder = engine.builder();

    let (client, socket) = tokio::join!(builder.start(), async {
        let mut socket = engine.accept().await;
        socket.handshake().await;
        socket
    });

    (client.unwrap(), socket)
}

/// Parameters a `run_task` request carries, decoded from JSON text.
pub fn task_params(request: &Message) -> Value {
    let text = request.data["params"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}
