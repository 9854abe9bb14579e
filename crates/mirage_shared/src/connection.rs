//! # Connection Identifiers

use std::fmt;

/// Identifier of a server-side connection.
///
/// Each transport numbers its own connections. Decorators that merge several
/// transports hand out their own ids (see the multiplexer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// The client's only peer. Used for client→server traffic, where the
    /// target is implicit.
    pub const SERVER: Self = Self(0);

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
