//! # Connection Lifecycle Observers
//!
//! A transport reports what happens on its connections to an observer that
//! is bound when the client connects or the server starts. Decorators bind
//! themselves (or the outward observer directly) to their inner transports
//! at those same two points.
//!
//! ```text
//! inner transport ──on_data──> decorator observer ──on_data──> application
//! ```
//!
//! Observer handles ([`ClientEvents`], [`ServerEvents`]) are cheap to clone.
//! Clones share one handler, so a decorator can hand the same outward
//! observer to several inner transports.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::ChannelId;
use crate::connection::ConnectionId;
use crate::error::TransportErrorKind;

/// Receives notifications for the client role.
pub trait ClientHandler: Send {
    /// The connection to the server is established.
    fn on_connected(&mut self);

    /// A message arrived from the server.
    fn on_data(&mut self, data: &[u8], channel: ChannelId);

    /// Something went wrong on the connection.
    fn on_error(&mut self, kind: TransportErrorKind, reason: &str);

    /// The connection to the server is gone.
    fn on_disconnected(&mut self);
}

/// Receives notifications for the server role.
pub trait ServerHandler: Send {
    /// A client connected.
    fn on_connected(&mut self, connection: ConnectionId);

    /// A message arrived from a client.
    fn on_data(&mut self, connection: ConnectionId, data: &[u8], channel: ChannelId);

    /// Something went wrong on a connection.
    fn on_error(&mut self, connection: ConnectionId, kind: TransportErrorKind, reason: &str);

    /// A client disconnected.
    fn on_disconnected(&mut self, connection: ConnectionId);
}

/// Shared handle to a [`ClientHandler`].
#[derive(Clone)]
pub struct ClientEvents {
    handler: Arc<Mutex<dyn ClientHandler>>,
}

impl ClientEvents {
    /// Wraps a handler.
    pub fn new<H: ClientHandler + 'static>(handler: H) -> Self {
        let handler: Arc<Mutex<dyn ClientHandler>> = Arc::new(Mutex::new(handler));
        Self { handler }
    }

    /// A handle that drops every notification.
    #[must_use]
    pub fn ignore() -> Self {
        Self::new(Ignore)
    }

    /// Fires `on_connected`.
    pub fn connected(&self) {
        self.handler.lock().on_connected();
    }

    /// Fires `on_data`.
    pub fn data(&self, data: &[u8], channel: ChannelId) {
        self.handler.lock().on_data(data, channel);
    }

    /// Fires `on_error`.
    pub fn error(&self, kind: TransportErrorKind, reason: &str) {
        self.handler.lock().on_error(kind, reason);
    }

    /// Fires `on_disconnected`.
    pub fn disconnected(&self) {
        self.handler.lock().on_disconnected();
    }
}

impl fmt::Debug for ClientEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEvents").finish_non_exhaustive()
    }
}

/// Shared handle to a [`ServerHandler`].
#[derive(Clone)]
pub struct ServerEvents {
    handler: Arc<Mutex<dyn ServerHandler>>,
}

impl ServerEvents {
    /// Wraps a handler.
    pub fn new<H: ServerHandler + 'static>(handler: H) -> Self {
        let handler: Arc<Mutex<dyn ServerHandler>> = Arc::new(Mutex::new(handler));
        Self { handler }
    }

    /// A handle that drops every notification.
    #[must_use]
    pub fn ignore() -> Self {
        Self::new(Ignore)
    }

    /// Fires `on_connected`.
    pub fn connected(&self, connection: ConnectionId) {
        self.handler.lock().on_connected(connection);
    }

    /// Fires `on_data`.
    pub fn data(&self, connection: ConnectionId, data: &[u8], channel: ChannelId) {
        self.handler.lock().on_data(connection, data, channel);
    }

    /// Fires `on_error`.
    pub fn error(&self, connection: ConnectionId, kind: TransportErrorKind, reason: &str) {
        self.handler.lock().on_error(connection, kind, reason);
    }

    /// Fires `on_disconnected`.
    pub fn disconnected(&self, connection: ConnectionId) {
        self.handler.lock().on_disconnected(connection);
    }
}

impl fmt::Debug for ServerEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEvents").finish_non_exhaustive()
    }
}

/// Handler that drops everything.
struct Ignore;

impl ClientHandler for Ignore {
    fn on_connected(&mut self) {}
    fn on_data(&mut self, _data: &[u8], _channel: ChannelId) {}
    fn on_error(&mut self, _kind: TransportErrorKind, _reason: &str) {}
    fn on_disconnected(&mut self) {}
}

impl ServerHandler for Ignore {
    fn on_connected(&mut self, _connection: ConnectionId) {}
    fn on_data(&mut self, _connection: ConnectionId, _data: &[u8], _channel: ChannelId) {}
    fn on_error(&mut self, _connection: ConnectionId, _kind: TransportErrorKind, _reason: &str) {}
    fn on_disconnected(&mut self, _connection: ConnectionId) {}
}

/// A recorded notification.
///
/// Client-side notifications are recorded with [`ConnectionId::SERVER`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Connected(ConnectionId),
    /// Message received.
    Data {
        /// Connection the message arrived on.
        connection: ConnectionId,
        /// Payload bytes.
        data: Vec<u8>,
        /// Channel it arrived on.
        channel: ChannelId,
    },
    /// Error notification.
    Error {
        /// Affected connection.
        connection: ConnectionId,
        /// Error category.
        kind: TransportErrorKind,
        /// Human-readable reason.
        reason: String,
    },
    /// Connection closed.
    Disconnected(ConnectionId),
}

/// Handler that records every notification in order.
///
/// Clones share the same log, so keep one clone and hand the other to
/// [`ClientEvents::new`] or [`ServerEvents::new`].
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything recorded so far.
    #[must_use]
    pub fn drain(&self) -> Vec<TransportEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Returns a copy of everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    /// Returns the payloads of all recorded data notifications.
    #[must_use]
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Data { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn push(&self, event: TransportEvent) {
        self.events.lock().push(event);
    }
}

impl ClientHandler for EventLog {
    fn on_connected(&mut self) {
        self.push(TransportEvent::Connected(ConnectionId::SERVER));
    }

    fn on_data(&mut self, data: &[u8], channel: ChannelId) {
        self.push(TransportEvent::Data {
            connection: ConnectionId::SERVER,
            data: data.to_vec(),
            channel,
        });
    }

    fn on_error(&mut self, kind: TransportErrorKind, reason: &str) {
        self.push(TransportEvent::Error {
            connection: ConnectionId::SERVER,
            kind,
            reason: reason.to_string(),
        });
    }

    fn on_disconnected(&mut self) {
        self.push(TransportEvent::Disconnected(ConnectionId::SERVER));
    }
}

impl ServerHandler for EventLog {
    fn on_connected(&mut self, connection: ConnectionId) {
        self.push(TransportEvent::Connected(connection));
    }

    fn on_data(&mut self, connection: ConnectionId, data: &[u8], channel: ChannelId) {
        self.push(TransportEvent::Data {
            connection,
            data: data.to_vec(),
            channel,
        });
    }

    fn on_error(&mut self, connection: ConnectionId, kind: TransportErrorKind, reason: &str) {
        self.push(TransportEvent::Error {
            connection,
            kind,
            reason: reason.to_string(),
        });
    }

    fn on_disconnected(&mut self, connection: ConnectionId) {
        self.push(TransportEvent::Disconnected(connection));
    }
}
