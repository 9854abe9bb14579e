//! # The Transport Trait
//!
//! One object serves both roles: it can connect out as a client and listen
//! as a server at the same time. Decorators implement the same trait, so
//! they stack:
//!
//! ```text
//! MultiplexTransport
//! ├── LatencySimulation ── MemoryTransport ("memory")
//! └── LatencySimulation ── MemoryTransport ("relay")
//! ```

use std::fmt;

use crate::channel::ChannelId;
use crate::connection::ConnectionId;
use crate::endpoint::Endpoint;
use crate::error::TransportResult;
use crate::events::{ClientEvents, ServerEvents};

/// A message transport with client and server roles.
///
/// # Threading
///
/// Every method is called from the host's tick loop. Observers fire from
/// inside `client_early_update` / `server_early_update`.
pub trait Transport: fmt::Display + Send {
    /// True if this transport can run on the current platform.
    fn available(&self) -> bool;

    /// Connects to a plain `host[:port]` address.
    ///
    /// `events` becomes the client observer of this transport.
    fn client_connect(&mut self, address: &str, events: ClientEvents) -> TransportResult<()>;

    /// Connects to a URI. Transports reject schemes they do not speak with
    /// [`TransportError::AddressRejected`](crate::TransportError::AddressRejected).
    fn client_connect_uri(&mut self, uri: &Endpoint, events: ClientEvents)
        -> TransportResult<()>;

    /// True once the client connection is established.
    fn client_connected(&self) -> bool;

    /// Closes the client connection. Idempotent.
    fn client_disconnect(&mut self);

    /// Sends a message to the server.
    fn client_send(&mut self, payload: &[u8], channel: ChannelId) -> TransportResult<()>;

    /// Inbound phase of the client tick.
    fn client_early_update(&mut self) {}

    /// Outbound phase of the client tick.
    fn client_late_update(&mut self) {}

    /// Where the server can be reached.
    fn server_uri(&self) -> TransportResult<Endpoint>;

    /// True while the server is listening.
    fn server_active(&self) -> bool;

    /// Starts listening. `events` becomes the server observer.
    fn server_start(&mut self, events: ServerEvents) -> TransportResult<()>;

    /// Sends a message to one client.
    fn server_send(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
        channel: ChannelId,
    ) -> TransportResult<()>;

    /// Kicks one client.
    fn server_disconnect(&mut self, connection: ConnectionId) -> TransportResult<()>;

    /// Address of a connected client.
    fn server_get_client_address(&self, connection: ConnectionId) -> TransportResult<String>;

    /// Stops listening and drops every client. Idempotent.
    fn server_stop(&mut self);

    /// Inbound phase of the server tick.
    fn server_early_update(&mut self) {}

    /// Outbound phase of the server tick.
    fn server_late_update(&mut self) {}

    /// Largest payload accepted on `channel`.
    fn max_packet_size(&self, channel: ChannelId) -> usize;

    /// Size at which callers should stop batching messages for `channel`.
    fn batch_threshold(&self, channel: ChannelId) -> usize {
        self.max_packet_size(channel)
    }

    /// Tears down both roles.
    fn shutdown(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn available(&self) -> bool {
        (**self).available()
    }

    fn client_connect(&mut self, address: &str, events: ClientEvents) -> TransportResult<()> {
        (**self).client_connect(address, events)
    }

    fn client_connect_uri(
        &mut self,
        uri: &Endpoint,
        events: ClientEvents,
    ) -> TransportResult<()> {
        (**self).client_connect_uri(uri, events)
    }

    fn client_connected(&self) -> bool {
        (**self).client_connected()
    }

    fn client_disconnect(&mut self) {
        (**self).client_disconnect();
    }

    fn client_send(&mut self, payload: &[u8], channel: ChannelId) -> TransportResult<()> {
        (**self).client_send(payload, channel)
    }

    fn client_early_update(&mut self) {
        (**self).client_early_update();
    }

    fn client_late_update(&mut self) {
        (**self).client_late_update();
    }

    fn server_uri(&self) -> TransportResult<Endpoint> {
        (**self).server_uri()
    }

    fn server_active(&self) -> bool {
        (**self).server_active()
    }

    fn server_start(&mut self, events: ServerEvents) -> TransportResult<()> {
        (**self).server_start(events)
    }

    fn server_send(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
        channel: ChannelId,
    ) -> TransportResult<()> {
        (**self).server_send(connection, payload, channel)
    }

    fn server_disconnect(&mut self, connection: ConnectionId) -> TransportResult<()> {
        (**self).server_disconnect(connection)
    }

    fn server_get_client_address(&self, connection: ConnectionId) -> TransportResult<String> {
        (**self).server_get_client_address(connection)
    }

    fn server_stop(&mut self) {
        (**self).server_stop();
    }

    fn server_early_update(&mut self) {
        (**self).server_early_update();
    }

    fn server_late_update(&mut self) {
        (**self).server_late_update();
    }

    fn max_packet_size(&self, channel: ChannelId) -> usize {
        (**self).max_packet_size(channel)
    }

    fn batch_threshold(&self, channel: ChannelId) -> usize {
        (**self).batch_threshold(channel)
    }

    fn shutdown(&mut self) {
        (**self).shutdown();
    }
}
