//! # In-Process Transport
//!
//! [`MemoryTransport`] moves messages between transports that share a
//! [`MemoryHub`], over crossbeam channels, without touching the network.
//!
//! ```text
//!   client transport                         server transport
//!  ┌───────────────┐  Connect / Data / Bye  ┌────────────────┐
//!  │ ClientLink    │ ─────────────────────> │ Listener inbox │
//!  │  inbox  <──── │ <───────────────────── │ peers[id]      │
//!  └───────────────┘ Accepted / Data / Kick └────────────────┘
//! ```
//!
//! Like a socket transport, everything arriving is held until the next early
//! update, and observers fire only from there.
//!
//! Listeners are keyed by `scheme://host:port`, so a `"memory"` transport and
//! a `"relay"` transport can listen on the same address side by side.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use mirage_shared::{
    ChannelId, ClientEvents, ConnectionId, Endpoint, ServerEvents, Transport, TransportError,
    TransportErrorKind, TransportResult, DEFAULT_MAX_PACKET_SIZE,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Client → server traffic.
enum ServerMessage {
    Connect {
        address: String,
        reply: Sender<ClientMessage>,
    },
    Data {
        connection: ConnectionId,
        bytes: Vec<u8>,
        channel: ChannelId,
    },
    Disconnect {
        connection: ConnectionId,
    },
}

/// Server → client traffic.
enum ClientMessage {
    Accepted { connection: ConnectionId },
    Data { bytes: Vec<u8>, channel: ChannelId },
    Disconnected,
    Refused,
}

/// Registry of listening memory transports.
///
/// Clones share one registry.
#[derive(Clone, Debug, Default)]
pub struct MemoryHub {
    listeners: Arc<Mutex<HashMap<String, Sender<ServerMessage>>>>,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of listening transports.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn register(&self, key: &str, inbox: Sender<ServerMessage>) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.contains_key(key) {
            return false;
        }
        listeners.insert(key.to_string(), inbox);
        true
    }

    fn find(&self, key: &str) -> Option<Sender<ServerMessage>> {
        self.listeners.lock().get(key).cloned()
    }

    fn unregister(&self, key: &str, inbox: &Sender<ServerMessage>) {
        let mut listeners = self.listeners.lock();
        if listeners.get(key).is_some_and(|s| s.same_channel(inbox)) {
            listeners.remove(key);
        }
    }
}

struct ClientLink {
    events: ClientEvents,
    inbox: Receiver<ClientMessage>,
    outbox: Option<Sender<ServerMessage>>,
    connection: Option<ConnectionId>,
}

struct Peer {
    address: String,
    outbox: Sender<ClientMessage>,
}

struct Listener {
    key: String,
    events: ServerEvents,
    inbox: Receiver<ServerMessage>,
    loopback: Sender<ServerMessage>,
    peers: HashMap<ConnectionId, Peer>,
    next_id: u32,
}

/// Transport that talks to other [`MemoryTransport`]s on the same hub.
pub struct MemoryTransport {
    hub: MemoryHub,
    scheme: String,
    address: String,
    available: bool,
    max_packet_size: usize,
    client: Option<ClientLink>,
    server: Option<Listener>,
}

impl MemoryTransport {
    /// A transport speaking `scheme` that listens on `address` (`host:port`).
    pub fn new(hub: &MemoryHub, scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hub: hub.clone(),
            scheme: scheme.into().to_ascii_lowercase(),
            address: address.into(),
            available: true,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            client: None,
            server: None,
        }
    }

    /// Overrides the payload limit of both channels.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Marks the transport as (un)supported on this platform.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// URI scheme this transport speaks.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Number of clients connected to the server role.
    pub fn client_count(&self) -> usize {
        self.server.as_ref().map_or(0, |s| s.peers.len())
    }

    fn key(&self, address: &str) -> String {
        format!("{}://{address}", self.scheme)
    }

    fn check_size(&self, payload: &[u8], channel: ChannelId) -> TransportResult<()> {
        if payload.len() > self.max_packet_size {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_packet_size,
                channel,
            });
        }
        Ok(())
    }

    fn connect(&mut self, address: &str, events: ClientEvents) {
        self.client_disconnect();

        let (reply, inbox) = unbounded();
        let outbox = self.hub.find(&self.key(address));
        let outbox = match outbox {
            Some(outbox) => {
                let request = ServerMessage::Connect {
                    address: self.key(&self.address),
                    reply,
                };
                outbox.send(request).ok().map(|()| outbox)
            }
            None => None,
        };

        if outbox.is_none() {
            warn!(scheme = %self.scheme, address, "Nothing listening");
            // Surfaces on the next early update, like a refused socket.
            let (refusal, refused_inbox) = unbounded();
            let _ = refusal.send(ClientMessage::Refused);
            self.client = Some(ClientLink {
                events,
                inbox: refused_inbox,
                outbox: None,
                connection: None,
            });
            return;
        }

        debug!(scheme = %self.scheme, address, "Connecting");
        self.client = Some(ClientLink {
            events,
            inbox,
            outbox,
            connection: None,
        });
    }

    fn rejected(&self, address: &str) -> TransportError {
        TransportError::AddressRejected {
            transport: self.to_string(),
            address: address.to_string(),
        }
    }
}

impl Transport for MemoryTransport {
    fn available(&self) -> bool {
        self.available
    }

    /// Connects to `host:port`. Addresses with a scheme are rejected.
    fn client_connect(&mut self, address: &str, events: ClientEvents) -> TransportResult<()> {
        if address.contains("://") {
            return Err(self.rejected(address));
        }
        self.connect(address, events);
        Ok(())
    }

    fn client_connect_uri(
        &mut self,
        uri: &Endpoint,
        events: ClientEvents,
    ) -> TransportResult<()> {
        if uri.scheme() != self.scheme {
            return Err(self.rejected(&uri.to_string()));
        }
        self.connect(&uri.authority(), events);
        Ok(())
    }

    fn client_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.connection.is_some())
    }

    /// Leaves the server. No local notification fires.
    fn client_disconnect(&mut self) {
        let Some(link) = self.client.take() else {
            return;
        };
        if let (Some(outbox), Some(connection)) = (link.outbox, link.connection) {
            let _ = outbox.send(ServerMessage::Disconnect { connection });
            debug!(scheme = %self.scheme, %connection, "Client left");
        }
    }

    fn client_send(&mut self, payload: &[u8], channel: ChannelId) -> TransportResult<()> {
        self.check_size(payload, channel)?;
        let link = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        let (Some(outbox), Some(connection)) = (&link.outbox, link.connection) else {
            return Err(TransportError::NotConnected);
        };
        outbox
            .send(ServerMessage::Data {
                connection,
                bytes: payload.to_vec(),
                channel,
            })
            .map_err(|_| TransportError::NotConnected)
    }

    fn client_early_update(&mut self) {
        loop {
            let (events, received) = match &self.client {
                Some(link) => (link.events.clone(), link.inbox.try_recv()),
                None => return,
            };

            match received {
                Ok(ClientMessage::Accepted { connection }) => {
                    if let Some(link) = &mut self.client {
                        link.connection = Some(connection);
                    }
                    events.connected();
                }
                Ok(ClientMessage::Data { bytes, channel }) => events.data(&bytes, channel),
                Ok(ClientMessage::Disconnected) => {
                    self.client = None;
                    events.disconnected();
                }
                Ok(ClientMessage::Refused) => {
                    self.client = None;
                    events.error(TransportErrorKind::Refused, "nothing listening at that address");
                    events.disconnected();
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    // Server went away without saying goodbye.
                    self.client = None;
                    events.error(TransportErrorKind::ConnectionClosed, "server vanished");
                    events.disconnected();
                }
            }
        }
    }

    fn server_uri(&self) -> TransportResult<Endpoint> {
        self.key(&self.address).parse()
    }

    fn server_active(&self) -> bool {
        self.server.is_some()
    }

    fn server_start(&mut self, events: ServerEvents) -> TransportResult<()> {
        if let Some(listener) = &mut self.server {
            listener.events = events;
            return Ok(());
        }

        let key = self.key(&self.address);
        let (loopback, inbox) = unbounded();
        if !self.hub.register(&key, loopback.clone()) {
            return Err(self.rejected(&key));
        }

        info!(%key, "Listening");
        self.server = Some(Listener {
            key,
            events,
            inbox,
            loopback,
            peers: HashMap::new(),
            next_id: 1,
        });
        Ok(())
    }

    fn server_send(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
        channel: ChannelId,
    ) -> TransportResult<()> {
        self.check_size(payload, channel)?;
        let listener = self.server.as_ref().ok_or(TransportError::ServerNotActive)?;
        let peer = listener
            .peers
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        peer.outbox
            .send(ClientMessage::Data {
                bytes: payload.to_vec(),
                channel,
            })
            .map_err(|_| TransportError::UnknownConnection(connection))
    }

    /// Kicks a client. The server observer hears about it on the next early
    /// update.
    fn server_disconnect(&mut self, connection: ConnectionId) -> TransportResult<()> {
        let listener = self.server.as_ref().ok_or(TransportError::ServerNotActive)?;
        let peer = listener
            .peers
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        let _ = peer.outbox.send(ClientMessage::Disconnected);
        let _ = listener.loopback.send(ServerMessage::Disconnect { connection });
        Ok(())
    }

    fn server_get_client_address(&self, connection: ConnectionId) -> TransportResult<String> {
        let listener = self.server.as_ref().ok_or(TransportError::ServerNotActive)?;
        listener
            .peers
            .get(&connection)
            .map(|peer| peer.address.clone())
            .ok_or(TransportError::UnknownConnection(connection))
    }

    fn server_stop(&mut self) {
        let Some(listener) = self.server.take() else {
            return;
        };
        for peer in listener.peers.values() {
            let _ = peer.outbox.send(ClientMessage::Disconnected);
        }
        self.hub.unregister(&listener.key, &listener.loopback);
        info!(key = %listener.key, clients = listener.peers.len(), "Stopped listening");
    }

    fn server_early_update(&mut self) {
        loop {
            let received = match &self.server {
                Some(listener) => listener.inbox.try_recv(),
                None => return,
            };
            let Ok(message) = received else {
                return;
            };
            let Some(listener) = &mut self.server else {
                return;
            };

            match message {
                ServerMessage::Connect { address, reply } => {
                    let connection = ConnectionId(listener.next_id);
                    // Client gave up before we got to it.
                    if reply.send(ClientMessage::Accepted { connection }).is_err() {
                        continue;
                    }
                    listener.next_id = listener.next_id.wrapping_add(1).max(1);
                    debug!(key = %listener.key, %connection, %address, "Client accepted");
                    listener.peers.insert(
                        connection,
                        Peer {
                            address,
                            outbox: reply,
                        },
                    );
                    listener.events.connected(connection);
                }
                ServerMessage::Data {
                    connection,
                    bytes,
                    channel,
                } => {
                    if listener.peers.contains_key(&connection) {
                        listener.events.data(connection, &bytes, channel);
                    }
                }
                ServerMessage::Disconnect { connection } => {
                    if listener.peers.remove(&connection).is_some() {
                        listener.events.disconnected(connection);
                    }
                }
            }
        }
    }

    fn max_packet_size(&self, _channel: ChannelId) -> usize {
        self.max_packet_size
    }

    fn shutdown(&mut self) {
        self.client_disconnect();
        self.server_stop();
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme)
    }
}
