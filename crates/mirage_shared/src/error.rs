//! # Transport Error Types
//!
//! Two families live here:
//!
//! - [`TransportError`]: returned from `Transport` calls.
//! - [`TransportErrorKind`]: carried by error notifications that a transport
//!   raises through its observer.

use thiserror::Error;

use crate::channel::ChannelId;
use crate::connection::ConnectionId;

/// Errors returned by transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport does not accept this address or URI.
    #[error("{transport} rejected address {address}")]
    AddressRejected {
        /// Name of the rejecting transport.
        transport: String,
        /// The rejected address.
        address: String,
    },

    /// No inner transport is both available and willing to connect.
    #[error("no transport suitable for this platform")]
    NoSuitableTransport,

    /// A decorator was built without any inner transport.
    #[error("no inner transports configured")]
    NoTransports,

    /// Client operation without an established connection.
    #[error("client is not connected")]
    NotConnected,

    /// Server operation while the server is not listening.
    #[error("server is not active")]
    ServerNotActive,

    /// The connection id is not registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The (original id, transport index) pair is not registered.
    #[error("unknown connection {original} on transport {transport}")]
    UnknownOriginalConnection {
        /// Connection id as reported by the inner transport.
        original: ConnectionId,
        /// Index of the inner transport.
        transport: usize,
    },

    /// Every connection id has been handed out.
    #[error("connection ids exhausted")]
    ConnectionIdsExhausted,

    /// An address could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Payload larger than the channel allows.
    #[error("payload of {size} bytes exceeds the {max} byte limit of {channel}")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Limit of the channel.
        max: usize,
        /// Channel the payload was sent on.
        channel: ChannelId,
    },
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Category of an error notification raised by a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Host name could not be resolved.
    DnsResolve,
    /// Peer refused the connection.
    Refused,
    /// Peer stopped responding.
    Timeout,
    /// Outbound buffers are full.
    Congestion,
    /// Received data could not be processed.
    InvalidReceive,
    /// Data could not be sent.
    InvalidSend,
    /// The connection was closed.
    ConnectionClosed,
    /// Anything else.
    Unexpected,
}
