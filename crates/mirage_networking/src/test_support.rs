//! Scriptable in-memory transport for unit tests.

use std::fmt;
use std::sync::Arc;

use mirage_shared::{
    ChannelId, ClientEvents, ConnectionId, Endpoint, ServerEvents, Transport, TransportError,
    TransportErrorKind, TransportResult, DEFAULT_MAX_PACKET_SIZE,
};
use parking_lot::Mutex;

/// How often each lifecycle call reached the transport.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Counters {
    pub client_disconnects: usize,
    pub client_early_updates: usize,
    pub client_late_updates: usize,
    pub server_starts: usize,
    pub server_stops: usize,
    pub server_early_updates: usize,
    pub server_late_updates: usize,
    pub shutdowns: usize,
}

struct State {
    available: bool,
    reject_addresses: bool,
    refuse_start: bool,
    max_packet_size: usize,
    client_connected: bool,
    server_active: bool,
    connects: Vec<String>,
    client_sends: Vec<(Vec<u8>, ChannelId)>,
    server_sends: Vec<(ConnectionId, Vec<u8>, ChannelId)>,
    server_disconnects: Vec<ConnectionId>,
    counters: Counters,
    client_events: Option<ClientEvents>,
    server_events: Option<ServerEvents>,
}

/// Test-side handle to a [`RecordingTransport`].
#[derive(Clone)]
pub(crate) struct Probe {
    state: Arc<Mutex<State>>,
}

impl Probe {
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn set_reject_addresses(&self, reject: bool) {
        self.state.lock().reject_addresses = reject;
    }

    pub fn set_refuse_start(&self, refuse: bool) {
        self.state.lock().refuse_start = refuse;
    }

    pub fn set_max_packet_size(&self, size: usize) {
        self.state.lock().max_packet_size = size;
    }

    pub fn set_server_active(&self, active: bool) {
        self.state.lock().server_active = active;
    }

    pub fn connects(&self) -> Vec<String> {
        self.state.lock().connects.clone()
    }

    pub fn client_sends(&self) -> Vec<(Vec<u8>, ChannelId)> {
        self.state.lock().client_sends.clone()
    }

    pub fn server_sends(&self) -> Vec<(ConnectionId, Vec<u8>, ChannelId)> {
        self.state.lock().server_sends.clone()
    }

    pub fn server_disconnects(&self) -> Vec<ConnectionId> {
        self.state.lock().server_disconnects.clone()
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().counters
    }

    fn server_events(&self) -> ServerEvents {
        // Clone out of the lock; observers may call back into the probe.
        let events = self.state.lock().server_events.clone();
        events.unwrap_or_else(ServerEvents::ignore)
    }

    /// Fires a server-side connect as if a client arrived.
    pub fn server_connected(&self, connection: ConnectionId) {
        self.server_events().connected(connection);
    }

    pub fn server_data(&self, connection: ConnectionId, data: &[u8], channel: ChannelId) {
        self.server_events().data(connection, data, channel);
    }

    pub fn server_error(&self, connection: ConnectionId, kind: TransportErrorKind, reason: &str) {
        self.server_events().error(connection, kind, reason);
    }

    pub fn server_disconnected(&self, connection: ConnectionId) {
        self.server_events().disconnected(connection);
    }

    pub fn client_data(&self, data: &[u8], channel: ChannelId) {
        let events = self.state.lock().client_events.clone();
        if let Some(events) = events {
            events.data(data, channel);
        }
    }
}

/// Transport that records every call and fires events on demand.
pub(crate) struct RecordingTransport {
    name: &'static str,
    state: Arc<Mutex<State>>,
}

impl RecordingTransport {
    pub fn new(name: &'static str) -> (Self, Probe) {
        let state = Arc::new(Mutex::new(State {
            available: true,
            reject_addresses: false,
            refuse_start: false,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            client_connected: false,
            server_active: false,
            connects: Vec::new(),
            client_sends: Vec::new(),
            server_sends: Vec::new(),
            server_disconnects: Vec::new(),
            counters: Counters::default(),
            client_events: None,
            server_events: None,
        }));
        let probe = Probe {
            state: Arc::clone(&state),
        };
        (Self { name, state }, probe)
    }

    fn connect(&mut self, address: String, events: ClientEvents) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.reject_addresses {
            return Err(TransportError::AddressRejected {
                transport: self.name.to_string(),
                address,
            });
        }
        state.connects.push(address);
        state.client_connected = true;
        state.client_events = Some(events);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn available(&self) -> bool {
        self.state.lock().available
    }

    fn client_connect(&mut self, address: &str, events: ClientEvents) -> TransportResult<()> {
        self.connect(address.to_string(), events)
    }

    fn client_connect_uri(
        &mut self,
        uri: &Endpoint,
        events: ClientEvents,
    ) -> TransportResult<()> {
        self.connect(uri.to_string(), events)
    }

    fn client_connected(&self) -> bool {
        self.state.lock().client_connected
    }

    fn client_disconnect(&mut self) {
        let mut state = self.state.lock();
        state.client_connected = false;
        state.counters.client_disconnects += 1;
    }

    fn client_send(&mut self, payload: &[u8], channel: ChannelId) -> TransportResult<()> {
        self.state.lock().client_sends.push((payload.to_vec(), channel));
        Ok(())
    }

    fn client_early_update(&mut self) {
        self.state.lock().counters.client_early_updates += 1;
    }

    fn client_late_update(&mut self) {
        self.state.lock().counters.client_late_updates += 1;
    }

    fn server_uri(&self) -> TransportResult<Endpoint> {
        Ok(Endpoint::new(self.name, "localhost", Some(7777)))
    }

    fn server_active(&self) -> bool {
        self.state.lock().server_active
    }

    fn server_start(&mut self, events: ServerEvents) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.refuse_start {
            return Err(TransportError::AddressRejected {
                transport: self.name.to_string(),
                address: "localhost:7777".to_string(),
            });
        }
        state.server_active = true;
        state.server_events = Some(events);
        state.counters.server_starts += 1;
        Ok(())
    }

    fn server_send(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
        channel: ChannelId,
    ) -> TransportResult<()> {
        self.state
            .lock()
            .server_sends
            .push((connection, payload.to_vec(), channel));
        Ok(())
    }

    fn server_disconnect(&mut self, connection: ConnectionId) -> TransportResult<()> {
        self.state.lock().server_disconnects.push(connection);
        Ok(())
    }

    fn server_get_client_address(&self, connection: ConnectionId) -> TransportResult<String> {
        Ok(format!("{}-client-{}", self.name, connection.value()))
    }

    fn server_stop(&mut self) {
        let mut state = self.state.lock();
        state.server_active = false;
        state.counters.server_stops += 1;
    }

    fn server_early_update(&mut self) {
        self.state.lock().counters.server_early_updates += 1;
    }

    fn server_late_update(&mut self) {
        self.state.lock().counters.server_late_updates += 1;
    }

    fn max_packet_size(&self, _channel: ChannelId) -> usize {
        self.state.lock().max_packet_size
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        state.client_connected = false;
        state.server_active = false;
        state.counters.shutdowns += 1;
    }
}

impl fmt::Display for RecordingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
