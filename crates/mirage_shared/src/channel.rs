//! # Channels
//!
//! Channel 0 is reliable, channel 1 is unreliable. Transports may accept
//! other ids; decorators treat them as unexpected but never fail on them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a delivery channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u8);

/// Delivery semantics of the two well-known channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Ordered, never dropped.
    Reliable,
    /// May be dropped or reordered.
    Unreliable,
}

impl ChannelId {
    /// The reliable channel.
    pub const RELIABLE: Self = Self(0);
    /// The unreliable channel.
    pub const UNRELIABLE: Self = Self(1);

    /// Returns the delivery semantics, or `None` for an unrecognized id.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> Option<ChannelKind> {
        match self.0 {
            0 => Some(ChannelKind::Reliable),
            1 => Some(ChannelKind::Unreliable),
            _ => None,
        }
    }
}

impl From<ChannelKind> for ChannelId {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Reliable => Self::RELIABLE,
            ChannelKind::Unreliable => Self::UNRELIABLE,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(ChannelKind::Reliable) => write!(f, "channel {} (reliable)", self.0),
            Some(ChannelKind::Unreliable) => write!(f, "channel {} (unreliable)", self.0),
            None => write!(f, "channel {}", self.0),
        }
    }
}
