//! Client builder and session lifecycle.
//!
//! The [`ClientBuilder`] configures credentials, connection policy and the
//! engine provisioner. The [`Client`] manages the lifecycle:
//! 1. Ask the provisioner to describe and launch the engine
//! 2. Connect to the engine socket, retrying while it refuses
//! 3. Send credentials, answer `initialize`, wait for readiness
//! 4. Route replies to outstanding requests until closed
//!
//! # Example
//!
//! ```no_run
//! use bas_remote::Client;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .script("TestRemoteControl")
//!         .start()
//!         .await?;
//!
//!     let sum = client
//!         .run_function("Add", json!({"X": 2, "Y": 3}))?
//!         .await?;
//!     println!("2 + 3 = {}", sum);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionConfig};
use crate::control::{
    accept_resources_payload, classify, Credentials, HandshakeStep, StartupSlot,
};
use crate::engine::{EngineProvisioner, ExternalEngine};
use crate::error::{BasError, Result};
use crate::events::{Dispatcher, Event, EventStream};
use crate::protocol::{kind, Message};
use crate::request::{random_correlation_id, PendingRequest, RequestRegistry};
use crate::runner::{Runner, RunnerKind, Thread};
use crate::transport::find_free_port;

/// Default wait for the engine to signal readiness.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder for configuring and creating a client.
pub struct ClientBuilder {
    credentials: Credentials,
    port: Option<u16>,
    connection: ConnectionConfig,
    startup_timeout: Duration,
    provisioner: Box<dyn EngineProvisioner>,
    dispatcher: Dispatcher,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            credentials: Credentials::default(),
            port: None,
            connection: ConnectionConfig::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            provisioner: Box::new(ExternalEngine::new()),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Set the script the engine should run, without an account.
    pub fn script(mut self, name: &str) -> Self {
        self.credentials = Credentials::new(name);
        self
    }

    /// Set the script and account credentials.
    pub fn credentials(mut self, script: &str, login: &str, password: &str) -> Self {
        self.credentials = Credentials::with_account(script, login, password);
        self
    }

    /// Connect to a fixed port instead of picking a free one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set how many refused connects are tolerated.
    ///
    /// Default: 60
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connection.connect.attempts = attempts;
        self
    }

    /// Set the pause between refused connects.
    ///
    /// Default: 1 second
    pub fn connect_interval(mut self, interval: Duration) -> Self {
        self.connection.connect.interval = interval;
        self
    }

    /// Set how long one connect attempt may take, WebSocket upgrade included.
    ///
    /// Default: 10 seconds
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect.open_timeout = timeout;
        self
    }

    /// Set how long `start()` waits for the engine to become ready.
    ///
    /// Default: 60 seconds
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set how long `close()` waits for the closing handshake.
    ///
    /// Default: 5 seconds
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.connection.close_timeout = timeout;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.connection.writer.channel_capacity = capacity;
        self
    }

    /// Set the largest frame accepted before the connection is torn down.
    ///
    /// Also caps single WebSocket messages.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.connection.max_frame_size = size;
        self.connection.connect.max_message_size = Some(size);
        self
    }

    /// Set the engine provisioner.
    ///
    /// Default: [`ExternalEngine`]
    pub fn provisioner<P: EngineProvisioner>(mut self, provisioner: P) -> Self {
        self.provisioner = Box::new(provisioner);
        self
    }

    /// Observe connection events. Must be called before `build()`.
    ///
    /// Events queue without bound until read; drop the stream when no
    /// longer interested.
    pub fn subscribe(&mut self) -> EventStream {
        self.dispatcher.subscribe()
    }

    /// Build the client without starting it.
    pub fn build(mut self) -> Client {
        let router_events = self.dispatcher.subscribe();
        let (startup, startup_rx) = StartupSlot::new();
        let (lifecycle, _) = watch::channel(Lifecycle::Idle);

        Client {
            inner: Arc::new(Session {
                connection: Connection::new(Arc::new(self.dispatcher), self.connection),
                registry: RequestRegistry::new(),
                credentials: self.credentials,
                port: self.port,
                startup_timeout: self.startup_timeout,
                startup,
                startup_rx: Mutex::new(Some(startup_rx)),
                lifecycle,
                provisioner: self.provisioner,
                launched: AtomicBool::new(false),
                router_events: Mutex::new(Some(router_events)),
                router_task: Mutex::new(None),
            }),
        }
    }

    /// Build and start the client.
    pub async fn start(self) -> Result<Client> {
        let client = self.build();
        client.start().await?;
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Started,
    Closed,
}

/// Session state shared by the client, its router task and its runners.
pub(crate) struct Session {
    connection: Connection,
    registry: RequestRegistry,
    credentials: Credentials,
    port: Option<u16>,
    startup_timeout: Duration,
    startup: StartupSlot,
    startup_rx: Mutex<Option<oneshot::Receiver<Result<()>>>>,
    lifecycle: watch::Sender<Lifecycle>,
    provisioner: Box<dyn EngineProvisioner>,
    /// Set once `launch` was attempted, so `shutdown` is owed.
    launched: AtomicBool,
    router_events: Mutex<Option<EventStream>>,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Fail fast unless the session is started.
    pub(crate) fn ensure_started(&self) -> Result<()> {
        match self.lifecycle() {
            Lifecycle::Started => Ok(()),
            Lifecycle::Closed => Err(BasError::ClientClosed),
            Lifecycle::Idle | Lifecycle::Starting => Err(BasError::ClientNotStarted),
        }
    }

    /// Provision, connect and wait for the handshake.
    async fn open(self: &Arc<Self>) -> Result<()> {
        let descriptor = self.provisioner.initialize().await?;
        if !descriptor.exists {
            return Err(BasError::ScriptNotExist);
        }
        if !descriptor.supported {
            return Err(BasError::ScriptNotSupported);
        }

        let port = match self.port {
            Some(port) => port,
            None => find_free_port().await?,
        };
        tracing::info!(
            "starting engine for script {} on port {}",
            self.credentials.script_name,
            port
        );

        self.launched.store(true, Ordering::Release);
        self.provisioner.launch(port).await?;

        if let Some(events) = self.router_events.lock().await.take() {
            let task = tokio::spawn(route_events(Arc::downgrade(self), events));
            *self.router_task.lock().await = Some(task);
        }

        self.connection.connect(port).await?;

        let ready = self
            .startup_rx
            .lock()
            .await
            .take()
            .ok_or(BasError::ClientAlreadyStarted)?;

        match tokio::time::timeout(self.startup_timeout, ready).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BasError::NetworkFatal(
                "startup abandoned".to_string(),
            )),
            Err(_) => Err(BasError::StartupTimeout(self.startup_timeout)),
        }
    }

    /// Release everything the session holds.
    async fn teardown(&self, reason: &str) -> Result<()> {
        self.connection.close().await;
        self.startup
            .resolve(Err(BasError::NetworkFatal(reason.to_string())))
            .await;
        self.registry.fail_all(reason).await;

        if let Some(task) = self.router_task.lock().await.take() {
            task.abort();
        }

        if self.launched.swap(false, Ordering::AcqRel) {
            self.provisioner.shutdown().await?;
        }
        Ok(())
    }

    /// Write a fire-and-forget message under a random id.
    pub(crate) async fn post(&self, kind: &str, data: Value) -> Result<u32> {
        let message = Message::new(random_correlation_id(), kind, data, false);
        self.connection.send(&message).await
    }

    /// Register a request and write it. The caller waits on the result
    /// without holding the session.
    pub(crate) async fn submit(&self, kind: &str, data: Value) -> Result<PendingRequest> {
        let pending = self.registry.register().await?;
        let message = Message::new(pending.id(), kind, data, true);

        if let Err(e) = self.connection.send(&message).await {
            self.registry.discard(pending.id()).await;
            return Err(e);
        }
        Ok(pending)
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::SocketOpened => {
                tracing::debug!("socket opened, sending credentials");
                let payload = match self.credentials.to_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.startup.resolve(Err(e)).await;
                        return;
                    }
                };
                if let Err(e) = self.post(kind::REMOTE_CONTROL_DATA, payload).await {
                    tracing::warn!("failed to send credentials: {}", e);
                }
            }
            Event::MessageReceived(message) => self.on_message(message).await,
            Event::MessageSent(_) => {}
            Event::Fatal(reason) => {
                tracing::error!("connection fatal: {}", reason);
                self.startup
                    .resolve(Err(BasError::NetworkFatal(reason.clone())))
                    .await;
                self.registry.fail_all(&reason).await;
            }
            Event::SocketClosed => {
                self.startup
                    .resolve(Err(BasError::NetworkFatal(
                        "connection closed during startup".to_string(),
                    )))
                    .await;
                self.registry.fail_all("connection closed").await;
            }
        }
    }

    async fn on_message(&self, message: Message) {
        let pending = self.startup.is_pending().await;

        match classify(&message, pending) {
            HandshakeStep::AcceptResources => {
                if let Err(e) = self
                    .post(kind::ACCEPT_RESOURCES, accept_resources_payload())
                    .await
                {
                    tracing::warn!("failed to accept resources: {}", e);
                }
            }
            HandshakeStep::Ready => {
                if self.startup.resolve(Ok(())).await {
                    tracing::info!("engine ready");
                }
            }
            HandshakeStep::Rejected => {
                tracing::warn!("engine rejected credentials");
                self.startup.resolve(Err(BasError::Authentication)).await;
            }
            HandshakeStep::None if message.is_reply() => {
                let outcome = message.decode_reply();
                if let Err(e) = self.registry.resolve(message.id, outcome).await {
                    tracing::error!("{}", e);
                    self.abort(e).await;
                }
            }
            HandshakeStep::None => {
                tracing::trace!("ignoring {} message", message.kind());
            }
        }
    }

    /// Tear the connection down after a protocol error.
    async fn abort(&self, error: BasError) {
        let reason = error.to_string();
        self.startup.resolve(Err(error)).await;
        self.registry.fail_all(&reason).await;
        self.connection.close().await;
    }
}

/// Routes connection events into the session until the socket closes.
async fn route_events(session: Weak<Session>, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        let closed = matches!(event, Event::SocketClosed);

        tracing::trace!("event: {}", event.name());
        session.handle_event(event).await;

        if closed {
            break;
        }
    }
}

/// A session with one engine.
///
/// Cheaply cloneable; clones share the session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Session>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start the session: provision, connect, handshake.
    ///
    /// # Errors
    ///
    /// - [`BasError::ScriptNotExist`] / [`BasError::ScriptNotSupported`]
    ///   from the provisioner, before any socket activity
    /// - [`BasError::SocketNotConnected`] once connect retries are exhausted
    /// - [`BasError::Authentication`] if the engine rejects the credentials
    /// - [`BasError::StartupTimeout`] if the engine is not ready in time
    ///
    /// A failed start releases the connection and the engine; the client
    /// cannot be started again.
    pub async fn start(&self) -> Result<()> {
        let mut previous = Lifecycle::Idle;
        let acquired = self.inner.lifecycle.send_if_modified(|state| {
            previous = *state;
            if *state == Lifecycle::Idle {
                *state = Lifecycle::Starting;
                true
            } else {
                false
            }
        });
        if !acquired {
            return Err(match previous {
                Lifecycle::Closed => BasError::ClientClosed,
                _ => BasError::ClientAlreadyStarted,
            });
        }

        if let Err(e) = self.inner.open().await {
            tracing::error!("start failed: {}", e);
            self.inner.lifecycle.send_replace(Lifecycle::Closed);
            if let Err(cleanup) = self.inner.teardown("start failed").await {
                tracing::warn!("cleanup after failed start: {}", cleanup);
            }
            return Err(e);
        }

        let started = self.inner.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Starting {
                *state = Lifecycle::Started;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(BasError::ClientClosed);
        }

        tracing::info!("client started");
        Ok(())
    }

    /// Check if `start()` completed and `close()` was not called.
    pub fn is_started(&self) -> bool {
        self.inner.lifecycle() == Lifecycle::Started
    }

    /// Check if the engine socket is open.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Number of requests waiting for a reply.
    pub async fn pending_requests(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Send a message, returning its id.
    ///
    /// An async message registers for a reply that nobody waits on; use
    /// [`send_async`](Self::send_async) to receive it.
    pub async fn send(&self, kind: &str, data: Value, is_async: bool) -> Result<u32> {
        self.inner.ensure_started()?;
        if is_async {
            let pending = self.inner.submit(kind, data).await?;
            let id = pending.id();
            tokio::spawn(async move {
                let _ = pending.wait().await;
            });
            Ok(id)
        } else {
            self.inner.post(kind, data).await
        }
    }

    /// Send an async message and wait for the engine's reply.
    pub async fn send_async(&self, kind: &str, data: Value) -> Result<Value> {
        self.inner.ensure_started()?;
        self.inner.submit(kind, data).await?.wait().await
    }

    /// Run a remote function outside any thread.
    ///
    /// Usage errors are returned immediately; the returned [`Runner`]
    /// resolves to the function result. Must be called within a Tokio
    /// runtime.
    pub fn run_function(&self, name: &str, params: Value) -> Result<Runner> {
        self.inner.ensure_started()?;
        Ok(Runner::spawn(&self.inner, RunnerKind::Function, name, params))
    }

    /// Create a thread handle. The thread is started with [`Thread::start`].
    pub fn create_thread(&self) -> Thread {
        Thread::new(Arc::downgrade(&self.inner))
    }

    /// Start a remote thread with the given id.
    pub async fn start_thread(&self, thread_id: u32) -> Result<()> {
        self.inner.ensure_started()?;
        self.inner
            .post(kind::START_THREAD, json!({ "thread_id": thread_id }))
            .await?;
        Ok(())
    }

    /// Stop the remote thread with the given id.
    pub async fn stop_thread(&self, thread_id: u32) -> Result<()> {
        self.inner.ensure_started()?;
        self.inner
            .post(kind::STOP_THREAD, json!({ "thread_id": thread_id }))
            .await?;
        Ok(())
    }

    /// Read a global variable of the running script.
    pub async fn get_global_variable(&self, name: &str) -> Result<Value> {
        self.send_async(
            kind::GET_GLOBAL_VARIABLE,
            json!({ "name": format!("GLOBAL:{}", name) }),
        )
        .await
    }

    /// Set a global variable of the running script.
    pub async fn set_global_variable<T>(&self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_string(value)?;
        self.send_async(
            kind::SET_GLOBAL_VARIABLE,
            json!({ "name": format!("GLOBAL:{}", name), "value": value }),
        )
        .await?;
        Ok(())
    }

    /// Close the session. Outstanding requests fail; later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let previous = self.inner.lifecycle.send_replace(Lifecycle::Closed);
        if previous == Lifecycle::Closed {
            return Ok(());
        }

        tracing::info!("closing client");
        self.inner.teardown("client closed").await
    }
}
