//! # Multiplex Transport
//!
//! Presents several inner transports as one.
//!
//! - **Client role**: the first available transport that accepts the target
//!   address carries the connection. Every later client call goes to it.
//! - **Server role**: every inner transport listens. Their connection ids are
//!   merged into one id space through a [`ConnectionLookup`].
//!
//! ```text
//!                 application ids: 1 2 3 4
//!                        │
//!            ┌───── ConnectionLookup ─────┐
//!   (7, 0) ↔ 1   (8, 0) ↔ 3       (7, 1) ↔ 2   (1, 1) ↔ 4
//!      transport 0                   transport 1
//! ```
//!
//! The server is active only while every inner transport is active; the
//! transport is available as soon as any inner transport is.

mod lookup;

use std::fmt;
use std::sync::Arc;

use mirage_shared::{
    ChannelId, ClientEvents, ConnectionId, Endpoint, ServerEvents, ServerHandler, Transport,
    TransportError, TransportErrorKind, TransportResult,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

pub use lookup::{ConnectionLookup, Origin};

/// Server observer bound to one inner transport.
///
/// Translates that transport's connection ids before passing events on.
struct IndexedServerHandler {
    index: usize,
    lookup: Arc<Mutex<ConnectionLookup>>,
    outward: ServerEvents,
}

impl IndexedServerHandler {
    fn translate(&self, original: ConnectionId) -> Option<ConnectionId> {
        let translated = self.lookup.lock().multiplex_id(original, self.index);
        match translated {
            Ok(id) => Some(id),
            Err(e) => {
                error!(transport = self.index, "Dropping event: {e}");
                None
            }
        }
    }
}

impl ServerHandler for IndexedServerHandler {
    fn on_connected(&mut self, original: ConnectionId) {
        let added = self.lookup.lock().add_to_lookup(original, self.index);
        match added {
            Ok(id) => self.outward.connected(id),
            Err(e) => error!(transport = self.index, %original, "Dropping connect: {e}"),
        }
    }

    fn on_data(&mut self, original: ConnectionId, data: &[u8], channel: ChannelId) {
        if let Some(id) = self.translate(original) {
            self.outward.data(id, data, channel);
        }
    }

    fn on_error(&mut self, original: ConnectionId, kind: TransportErrorKind, reason: &str) {
        if let Some(id) = self.translate(original) {
            self.outward.error(id, kind, reason);
        }
    }

    fn on_disconnected(&mut self, original: ConnectionId) {
        // Handlers may still resolve the id while the notification runs.
        if let Some(id) = self.translate(original) {
            self.outward.disconnected(id);
            let removed = self.lookup.lock().remove_from_lookup(original, self.index);
            if let Err(e) = removed {
                error!(transport = self.index, "Lookup changed during disconnect: {e}");
            }
        }
    }
}

/// A [`Transport`] that fans out over an ordered list of transports.
pub struct MultiplexTransport {
    transports: Vec<Box<dyn Transport>>,
    selected: Option<usize>,
    lookup: Arc<Mutex<ConnectionLookup>>,
}

impl MultiplexTransport {
    /// Multiplexes `transports`, in priority order.
    ///
    /// An empty list is logged and accepted; such a multiplexer is never
    /// available and refuses to start a server.
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        if transports.is_empty() {
            error!("Multiplexer created without inner transports");
        }
        Self {
            transports,
            selected: None,
            lookup: Arc::new(Mutex::new(ConnectionLookup::new())),
        }
    }

    /// Number of inner transports.
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Number of server connections across all inner transports.
    pub fn connection_count(&self) -> usize {
        self.lookup.lock().len()
    }

    /// Index of the transport carrying the client connection.
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Origin of a multiplexed server connection.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownConnection`] if `connection` is not live.
    pub fn original_id(&self, connection: ConnectionId) -> TransportResult<Origin> {
        self.lookup.lock().original_id(connection)
    }

    /// Inner transport at `index`.
    pub fn transport(&self, index: usize) -> Option<&dyn Transport> {
        self.transports.get(index).map(|t| &**t as &dyn Transport)
    }

    fn selected_mut(&mut self) -> Option<&mut Box<dyn Transport>> {
        self.selected.and_then(|index| self.transports.get_mut(index))
    }

    fn route(&self, connection: ConnectionId) -> TransportResult<(ConnectionId, usize)> {
        let (original, index) = self.lookup.lock().original_id(connection)?;
        if index < self.transports.len() {
            Ok((original, index))
        } else {
            Err(TransportError::UnknownConnection(connection))
        }
    }
}

impl Transport for MultiplexTransport {
    fn available(&self) -> bool {
        self.transports.iter().any(|t| t.available())
    }

    /// Connects through the first available transport.
    ///
    /// A rejection from that transport is returned as is; later transports
    /// are not tried.
    fn client_connect(&mut self, address: &str, events: ClientEvents) -> TransportResult<()> {
        let Some(index) = self.transports.iter().position(|t| t.available()) else {
            return Err(TransportError::NoSuitableTransport);
        };

        self.transports[index].client_connect(address, events)?;
        debug!(transport = %self.transports[index], address, "Client transport selected");
        self.selected = Some(index);
        Ok(())
    }

    /// Connects through the first available transport that accepts `uri`.
    fn client_connect_uri(
        &mut self,
        uri: &Endpoint,
        events: ClientEvents,
    ) -> TransportResult<()> {
        for (index, transport) in self.transports.iter_mut().enumerate() {
            if !transport.available() {
                continue;
            }

            match transport.client_connect_uri(uri, events.clone()) {
                Ok(()) => {
                    debug!(transport = %transport, %uri, "Client transport selected");
                    self.selected = Some(index);
                    return Ok(());
                }
                Err(TransportError::AddressRejected { .. }) => {
                    warn!(transport = %transport, %uri, "Transport rejected uri, trying next");
                    self.selected = None;
                }
                Err(e) => return Err(e),
            }
        }
        Err(TransportError::NoSuitableTransport)
    }

    fn client_connected(&self) -> bool {
        self.selected
            .and_then(|index| self.transports.get(index))
            .is_some_and(|t| t.client_connected())
    }

    fn client_disconnect(&mut self) {
        if let Some(transport) = self.selected_mut() {
            transport.client_disconnect();
        }
    }

    fn client_send(&mut self, payload: &[u8], channel: ChannelId) -> TransportResult<()> {
        match self.selected_mut() {
            Some(transport) => transport.client_send(payload, channel),
            None => Err(TransportError::NotConnected),
        }
    }

    fn client_early_update(&mut self) {
        for transport in &mut self.transports {
            transport.client_early_update();
        }
    }

    fn client_late_update(&mut self) {
        for transport in &mut self.transports {
            transport.client_late_update();
        }
    }

    /// URI of the first inner transport only.
    fn server_uri(&self) -> TransportResult<Endpoint> {
        self.transports
            .first()
            .ok_or(TransportError::NoTransports)?
            .server_uri()
    }

    fn server_active(&self) -> bool {
        self.transports.iter().all(|t| t.server_active())
    }

    fn server_start(&mut self, events: ServerEvents) -> TransportResult<()> {
        if self.transports.is_empty() {
            return Err(TransportError::NoTransports);
        }

        for index in 0..self.transports.len() {
            let handler = IndexedServerHandler {
                index,
                lookup: Arc::clone(&self.lookup),
                outward: events.clone(),
            };
            if let Err(e) = self.transports[index].server_start(ServerEvents::new(handler)) {
                error!(transport = %self.transports[index], "Server start failed: {e}");
                for started in &mut self.transports[..index] {
                    started.server_stop();
                }
                self.lookup.lock().clear();
                return Err(e);
            }
        }
        info!(transports = self.transports.len(), "Multiplexed server started");
        Ok(())
    }

    fn server_send(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
        channel: ChannelId,
    ) -> TransportResult<()> {
        let (original, index) = self.route(connection)?;
        self.transports[index].server_send(original, payload, channel)
    }

    fn server_disconnect(&mut self, connection: ConnectionId) -> TransportResult<()> {
        let (original, index) = self.route(connection)?;
        self.transports[index].server_disconnect(original)
    }

    fn server_get_client_address(&self, connection: ConnectionId) -> TransportResult<String> {
        let (original, index) = self.route(connection)?;
        self.transports[index].server_get_client_address(original)
    }

    fn server_stop(&mut self) {
        for transport in &mut self.transports {
            transport.server_stop();
        }
        self.lookup.lock().clear();
    }

    fn server_early_update(&mut self) {
        for transport in &mut self.transports {
            transport.server_early_update();
        }
    }

    fn server_late_update(&mut self) {
        for transport in &mut self.transports {
            transport.server_late_update();
        }
    }

    /// Smallest limit of all inner transports.
    fn max_packet_size(&self, channel: ChannelId) -> usize {
        self.transports
            .iter()
            .map(|t| t.max_packet_size(channel))
            .min()
            .unwrap_or(0)
    }

    fn batch_threshold(&self, channel: ChannelId) -> usize {
        self.transports
            .iter()
            .map(|t| t.batch_threshold(channel))
            .min()
            .unwrap_or(0)
    }

    fn shutdown(&mut self) {
        for transport in &mut self.transports {
            transport.shutdown();
        }
        self.lookup.lock().clear();
        self.selected = None;
    }
}

impl fmt::Display for MultiplexTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Multiplex(")?;
        for (index, transport) in self.transports.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{transport}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Probe, RecordingTransport};
    use mirage_shared::{EventLog, TransportEvent};

    fn multiplex(names: &[&'static str]) -> (MultiplexTransport, Vec<Probe>) {
        let mut transports: Vec<Box<dyn Transport>> = Vec::new();
        let mut probes = Vec::new();
        for name in names {
            let (transport, probe) = RecordingTransport::new(name);
            transports.push(Box::new(transport));
            probes.push(probe);
        }
        (MultiplexTransport::new(transports), probes)
    }

    fn started(names: &[&'static str]) -> (MultiplexTransport, Vec<Probe>, EventLog) {
        let (mut mux, probes) = multiplex(names);
        let log = EventLog::new();
        mux.server_start(ServerEvents::new(log.clone())).unwrap();
        (mux, probes, log)
    }

    #[test]
    fn test_available_is_any() {
        let (mux, probes) = multiplex(&["a", "b"]);
        probes[0].set_available(false);
        assert!(mux.available());

        probes[1].set_available(false);
        assert!(!mux.available());
    }

    #[test]
    fn test_connect_selects_first_available() {
        let (mut mux, probes) = multiplex(&["a", "b"]);
        probes[1].set_available(false);

        mux.client_connect("addr", ClientEvents::ignore()).unwrap();

        assert_eq!(probes[0].connects(), vec!["addr".to_string()]);
        assert!(probes[1].connects().is_empty());
        assert_eq!(mux.selected(), Some(0));
        assert!(mux.client_connected());
    }

    #[test]
    fn test_connect_skips_unavailable() {
        let (mut mux, probes) = multiplex(&["a", "b"]);
        probes[0].set_available(false);

        mux.client_connect("addr", ClientEvents::ignore()).unwrap();
        assert!(probes[0].connects().is_empty());
        assert_eq!(probes[1].connects(), vec!["addr".to_string()]);
    }

    #[test]
    fn test_string_connect_does_not_probe_past_rejection() {
        let (mut mux, probes) = multiplex(&["a", "b"]);
        probes[0].set_reject_addresses(true);

        let result = mux.client_connect("addr", ClientEvents::ignore());

        assert!(matches!(result, Err(TransportError::AddressRejected { .. })));
        assert!(probes[1].connects().is_empty());
        assert_eq!(mux.selected(), None);
    }

    #[test]
    fn test_uri_connect_probes_past_rejection() {
        let (mut mux, probes) = multiplex(&["a", "b"]);
        probes[0].set_reject_addresses(true);

        let uri: Endpoint = "b://localhost:7777".parse().unwrap();
        mux.client_connect_uri(&uri, ClientEvents::ignore()).unwrap();

        assert_eq!(probes[1].connects(), vec!["b://localhost:7777".to_string()]);
        assert_eq!(mux.selected(), Some(1));
    }

    #[test]
    fn test_no_suitable_transport() {
        let (mut mux, probes) = multiplex(&["a", "b"]);
        probes[0].set_available(false);
        probes[1].set_reject_addresses(true);

        let uri: Endpoint = "a://host".parse().unwrap();
        assert_eq!(
            mux.client_connect_uri(&uri, ClientEvents::ignore()),
            Err(TransportError::NoSuitableTransport)
        );

        probes[1].set_available(false);
        assert_eq!(
            mux.client_connect("host", ClientEvents::ignore()),
            Err(TransportError::NoSuitableTransport)
        );
    }

    #[test]
    fn test_client_calls_before_connect() {
        let (mut mux, probes) = multiplex(&["a"]);

        assert!(!mux.client_connected());
        mux.client_disconnect();
        assert_eq!(
            mux.client_send(b"x", ChannelId::RELIABLE),
            Err(TransportError::NotConnected)
        );
        assert_eq!(probes[0].counters().client_disconnects, 0);
    }

    #[test]
    fn test_client_traffic_goes_to_selected() {
        let (mut mux, probes) = multiplex(&["a", "b"]);
        probes[0].set_available(false);
        let log = EventLog::new();
        mux.client_connect("addr", ClientEvents::new(log.clone())).unwrap();

        mux.client_send(b"hello", ChannelId::UNRELIABLE).unwrap();
        probes[1].client_data(b"welcome", ChannelId::RELIABLE);
        mux.client_disconnect();

        assert!(probes[0].client_sends().is_empty());
        assert_eq!(
            probes[1].client_sends(),
            vec![(b"hello".to_vec(), ChannelId::UNRELIABLE)]
        );
        assert_eq!(log.payloads(), vec![b"welcome".to_vec()]);
        assert_eq!(probes[1].counters().client_disconnects, 1);
    }

    #[test]
    fn test_server_ids_are_merged() {
        let (mux, probes, log) = started(&["a", "b"]);

        probes[0].server_connected(ConnectionId(7));
        probes[1].server_connected(ConnectionId(7));
        probes[0].server_connected(ConnectionId(8));

        assert_eq!(
            log.drain(),
            vec![
                TransportEvent::Connected(ConnectionId(1)),
                TransportEvent::Connected(ConnectionId(2)),
                TransportEvent::Connected(ConnectionId(3)),
            ]
        );
        assert_eq!(mux.connection_count(), 3);
        assert_eq!(mux.original_id(ConnectionId(2)), Ok((ConnectionId(7), 1)));
    }

    #[test]
    fn test_server_events_are_translated() {
        let (_mux, probes, log) = started(&["a", "b"]);
        probes[1].server_connected(ConnectionId(30));
        log.clear();

        probes[1].server_data(ConnectionId(30), &[1, 2, 3], ChannelId::RELIABLE);
        probes[1].server_error(ConnectionId(30), TransportErrorKind::Timeout, "quiet");

        assert_eq!(
            log.drain(),
            vec![
                TransportEvent::Data {
                    connection: ConnectionId(1),
                    data: vec![1, 2, 3],
                    channel: ChannelId::RELIABLE,
                },
                TransportEvent::Error {
                    connection: ConnectionId(1),
                    kind: TransportErrorKind::Timeout,
                    reason: "quiet".to_string(),
                },
            ]
        );
    }

    /// Outward observer that resolves the id it is told about.
    struct ResolvingObserver {
        lookup: Arc<Mutex<ConnectionLookup>>,
        resolved: Arc<Mutex<Vec<TransportResult<Origin>>>>,
    }

    impl ServerHandler for ResolvingObserver {
        fn on_connected(&mut self, _connection: ConnectionId) {}
        fn on_data(&mut self, _connection: ConnectionId, _data: &[u8], _channel: ChannelId) {}
        fn on_error(&mut self, _: ConnectionId, _: TransportErrorKind, _: &str) {}
        fn on_disconnected(&mut self, connection: ConnectionId) {
            self.resolved.lock().push(self.lookup.lock().original_id(connection));
        }
    }

    #[test]
    fn test_disconnect_notifies_before_removal() {
        let (mut mux, probes) = multiplex(&["a"]);
        let resolved = Arc::new(Mutex::new(Vec::new()));
        let observer = ResolvingObserver {
            lookup: Arc::clone(&mux.lookup),
            resolved: Arc::clone(&resolved),
        };
        mux.server_start(ServerEvents::new(observer)).unwrap();

        probes[0].server_connected(ConnectionId(5));
        probes[0].server_disconnected(ConnectionId(5));

        assert_eq!(*resolved.lock(), vec![Ok((ConnectionId(5), 0))]);
        assert_eq!(mux.connection_count(), 0);
    }

    #[test]
    fn test_unregistered_events_are_dropped() {
        let (_mux, probes, log) = started(&["a"]);

        probes[0].server_data(ConnectionId(99), b"ghost", ChannelId::RELIABLE);
        probes[0].server_disconnected(ConnectionId(99));

        assert!(log.is_empty());
    }

    #[test]
    fn test_reconnect_gets_fresh_id() {
        let (_mux, probes, log) = started(&["a"]);

        probes[0].server_connected(ConnectionId(1));
        probes[0].server_disconnected(ConnectionId(1));
        probes[0].server_connected(ConnectionId(1));

        assert_eq!(
            log.drain(),
            vec![
                TransportEvent::Connected(ConnectionId(1)),
                TransportEvent::Disconnected(ConnectionId(1)),
                TransportEvent::Connected(ConnectionId(2)),
            ]
        );
    }

    #[test]
    fn test_server_calls_are_routed() {
        let (mut mux, probes, _log) = started(&["a", "b"]);
        probes[0].server_connected(ConnectionId(11));
        probes[1].server_connected(ConnectionId(22));

        mux.server_send(ConnectionId(2), b"to b", ChannelId::UNRELIABLE).unwrap();
        mux.server_disconnect(ConnectionId(1)).unwrap();
        let address = mux.server_get_client_address(ConnectionId(2)).unwrap();

        assert!(probes[0].server_sends().is_empty());
        assert_eq!(
            probes[1].server_sends(),
            vec![(ConnectionId(22), b"to b".to_vec(), ChannelId::UNRELIABLE)]
        );
        assert_eq!(probes[0].server_disconnects(), vec![ConnectionId(11)]);
        assert_eq!(address, "b-client-22");
    }

    #[test]
    fn test_unknown_connection_is_an_error() {
        let (mut mux, _probes, _log) = started(&["a"]);
        assert_eq!(
            mux.server_send(ConnectionId(4), b"x", ChannelId::RELIABLE),
            Err(TransportError::UnknownConnection(ConnectionId(4)))
        );
        assert!(mux.server_disconnect(ConnectionId(4)).is_err());
        assert!(mux.server_get_client_address(ConnectionId(4)).is_err());
    }

    #[test]
    fn test_failed_start_stops_started_transports() {
        let (mut mux, probes) = multiplex(&["a", "b", "c"]);
        probes[1].set_refuse_start(true);

        let result = mux.server_start(ServerEvents::new(EventLog::new()));

        assert!(matches!(result, Err(TransportError::AddressRejected { .. })));
        assert_eq!(probes[0].counters().server_starts, 1);
        assert_eq!(probes[0].counters().server_stops, 1);
        assert_eq!(probes[2].counters().server_starts, 0);
        assert!(!mux.transport(0).unwrap().server_active());
        assert!(!mux.server_active());
        assert_eq!(mux.connection_count(), 0);

        probes[1].set_refuse_start(false);
        mux.server_start(ServerEvents::new(EventLog::new())).unwrap();
        assert!(mux.server_active());
    }

    #[test]
    fn test_server_active_is_all() {
        let (mux, probes, _log) = started(&["a", "b", "c"]);
        assert!(mux.server_active());

        probes[2].set_server_active(false);
        assert!(!mux.server_active());
        assert!(probes.iter().all(|p| p.counters().server_starts == 1));
    }

    #[test]
    fn test_server_stop_clears_lookup() {
        let (mut mux, probes, _log) = started(&["a", "b"]);
        probes[0].server_connected(ConnectionId(1));

        mux.server_stop();

        assert_eq!(mux.connection_count(), 0);
        assert!(!mux.server_active());
        assert!(probes.iter().all(|p| p.counters().server_stops == 1));
    }

    #[test]
    fn test_max_packet_size_is_min() {
        let (mux, probes) = multiplex(&["a", "b", "c"]);
        probes[0].set_max_packet_size(1200);
        probes[1].set_max_packet_size(508);
        probes[2].set_max_packet_size(16_384);

        assert_eq!(mux.max_packet_size(ChannelId::RELIABLE), 508);
        assert_eq!(mux.batch_threshold(ChannelId::UNRELIABLE), 508);
    }

    #[test]
    fn test_updates_reach_every_transport() {
        let (mut mux, probes) = multiplex(&["a", "b"]);

        mux.client_early_update();
        mux.client_late_update();
        mux.server_early_update();
        mux.server_late_update();

        for probe in &probes {
            let counters = probe.counters();
            assert_eq!(counters.client_early_updates, 1);
            assert_eq!(counters.client_late_updates, 1);
            assert_eq!(counters.server_early_updates, 1);
            assert_eq!(counters.server_late_updates, 1);
        }
    }

    #[test]
    fn test_server_uri_is_first() {
        let (mux, _probes) = multiplex(&["a", "b"]);
        assert_eq!(mux.server_uri().unwrap().to_string(), "a://localhost:7777");
        assert_eq!(mux.to_string(), "Multiplex(a, b)");
        assert_eq!(mux.transport_count(), 2);
        assert_eq!(mux.transport(1).map(ToString::to_string), Some("b".to_string()));
    }

    #[test]
    fn test_empty_multiplexer() {
        let (mut mux, _probes) = multiplex(&[]);

        assert!(!mux.available());
        assert_eq!(mux.max_packet_size(ChannelId::RELIABLE), 0);
        assert_eq!(mux.server_uri(), Err(TransportError::NoTransports));
        assert_eq!(
            mux.server_start(ServerEvents::ignore()),
            Err(TransportError::NoTransports)
        );
        assert_eq!(
            mux.client_connect("addr", ClientEvents::ignore()),
            Err(TransportError::NoSuitableTransport)
        );
    }

    #[test]
    fn test_shutdown_reaches_every_transport() {
        let (mut mux, probes, _log) = started(&["a", "b"]);
        mux.client_connect("addr", ClientEvents::ignore()).unwrap();
        probes[1].server_connected(ConnectionId(3));

        mux.shutdown();

        assert!(probes.iter().all(|p| p.counters().shutdowns == 1));
        assert_eq!(mux.connection_count(), 0);
        assert_eq!(mux.selected(), None);
    }
}
