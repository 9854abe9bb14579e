//! # Connection Lookup
//!
//! Bijection between the ids a multiplexer hands out and the
//! `(original id, transport index)` pair that owns each one.

use bimap::BiHashMap;
use mirage_shared::{ConnectionId, TransportError, TransportResult};
use tracing::{debug, error, warn};

/// Connection as seen by one inner transport.
pub type Origin = (ConnectionId, usize);

/// Two-way map between multiplexed ids and their origins.
///
/// Ids start at 1 and are never reused, so a stale id held by the
/// application can never reach a newer connection. Once `u32::MAX` has been
/// handed out, further registrations are refused.
#[derive(Debug)]
pub struct ConnectionLookup {
    map: BiHashMap<Origin, ConnectionId>,
    /// `None` once every id has been handed out.
    next_id: Option<u32>,
}

impl ConnectionLookup {
    /// Empty lookup. The first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: BiHashMap::new(),
            next_id: Some(1),
        }
    }

    /// Registers a new connection and returns its multiplexed id.
    ///
    /// Registering an origin twice returns the id it already has.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectionIdsExhausted`] once every id has been used.
    pub fn add_to_lookup(
        &mut self,
        original: ConnectionId,
        transport: usize,
    ) -> TransportResult<ConnectionId> {
        if let Some(&existing) = self.map.get_by_left(&(original, transport)) {
            warn!(%original, transport, %existing, "Connection registered twice");
            return Ok(existing);
        }

        let Some(next) = self.next_id else {
            error!(%original, transport, "No multiplexed ids left");
            return Err(TransportError::ConnectionIdsExhausted);
        };
        self.next_id = next.checked_add(1);

        let id = ConnectionId(next);
        self.map.insert((original, transport), id);
        debug!(%original, transport, multiplexed = %id, "Connection added");
        Ok(id)
    }

    /// Drops a connection and returns the id it had.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownOriginalConnection`] if the origin is not
    /// registered.
    pub fn remove_from_lookup(
        &mut self,
        original: ConnectionId,
        transport: usize,
    ) -> TransportResult<ConnectionId> {
        let (_, id) = self
            .map
            .remove_by_left(&(original, transport))
            .ok_or(TransportError::UnknownOriginalConnection {
                original,
                transport,
            })?;
        debug!(%original, transport, multiplexed = %id, "Connection removed");
        Ok(id)
    }

    /// Multiplexed id of a registered origin.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownOriginalConnection`] for an unregistered
    /// origin.
    pub fn multiplex_id(
        &self,
        original: ConnectionId,
        transport: usize,
    ) -> TransportResult<ConnectionId> {
        self.map
            .get_by_left(&(original, transport))
            .copied()
            .ok_or(TransportError::UnknownOriginalConnection {
                original,
                transport,
            })
    }

    /// Origin of a multiplexed id.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownConnection`] for an unregistered id.
    pub fn original_id(&self, multiplexed: ConnectionId) -> TransportResult<Origin> {
        self.map
            .get_by_right(&multiplexed)
            .copied()
            .ok_or(TransportError::UnknownConnection(multiplexed))
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Forgets every connection. The id counter keeps counting.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Every registered `(multiplexed id, origin)` pair, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, Origin)> + '_ {
        self.map.iter().map(|(origin, id)| (*id, *origin))
    }
}

impl Default for ConnectionLookup {
    fn default() -> Self {
        Self::new()
    }
}
