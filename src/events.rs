//! Event dispatcher between the connection and its subscribers.
//!
//! Subscriptions are taken while the client is being built, then the
//! dispatcher is frozen behind an `Arc` and only publishes. Each subscriber
//! gets its own unbounded queue, so the receive loop never blocks on a slow
//! subscriber and every subscriber sees events in publish order.
//!
//! # Example
//!
//! ```
//! use bas_remote::events::{Dispatcher, Event};
//!
//! # tokio_test_block_on(async {
//! let mut dispatcher = Dispatcher::new();
//! let mut events = dispatcher.subscribe();
//!
//! dispatcher.publish(Event::SocketOpened);
//! assert!(matches!(events.recv().await, Some(Event::SocketOpened)));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use tokio::sync::mpsc;

use crate::protocol::Message;

/// Lifecycle event published by the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The socket is connected.
    SocketOpened,
    /// A complete message was decoded from the socket.
    MessageReceived(Message),
    /// A message was flushed to the socket.
    MessageSent(Message),
    /// The connection failed; carries the cause.
    Fatal(String),
    /// The receive loop ended. Published exactly once per connection.
    SocketClosed,
}

impl Event {
    /// Short label for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::SocketOpened => "socket_open",
            Event::MessageReceived(_) => "message_received",
            Event::MessageSent(_) => "message_sent",
            Event::Fatal(_) => "fatal_received",
            Event::SocketClosed => "socket_close",
        }
    }
}

/// Receiving end of one subscription.
///
/// The queue behind it is unbounded: events pile up for as long as the
/// stream is held but not read. Drain it, or drop it to unsubscribe.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the dispatcher is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Number of events queued and not yet received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if no event is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Publish/subscribe hub for [`Event`]s.
#[derive(Debug, Default)]
pub struct Dispatcher {
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
}

impl Dispatcher {
    /// Create a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Only possible before the dispatcher is shared.
    ///
    /// Each subscriber gets its own unbounded queue, so a slow reader never
    /// stalls the receive loop but holds every event it has not read yet.
    pub fn subscribe(&mut self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        EventStream { rx }
    }

    /// Deliver an event to every live subscriber.
    pub fn publish(&self, event: Event) {
        tracing::trace!("publish {}", event.name());
        for subscriber in &self.subscribers {
            // A dropped subscriber is not an error.
            let _ = subscriber.send(event.clone());
        }
    }

    /// Number of subscriptions whose stream is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|subscriber| !subscriber.is_closed())
            .count()
    }
}
