//! # MIRAGE Shared
//!
//! The transport contract used by every MIRAGE transport and decorator.
//!
//! ## Tick Model
//!
//! ```text
//! every tick:
//!   client_early_update / server_early_update   <- inbound I/O, observers fire
//!   ... game logic calls client_send / server_send ...
//!   client_late_update  / server_late_update    <- outbound flush
//! ```
//!
//! Nothing in this workspace spawns threads. The host drives every transport
//! from a single tick loop; observers fire synchronously inside the early
//! update of the transport that produced the event.
//!
//! ## CRITICAL RULE
//!
//! This crate defines the contract only. Concrete transports and decorators
//! live in `mirage_networking`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod clock;
pub mod connection;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod transport;

pub use channel::{ChannelId, ChannelKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::ConnectionId;
pub use constants::{DEFAULT_MAX_PACKET_SIZE, DEFAULT_TICK_RATE};
pub use endpoint::Endpoint;
pub use error::{TransportError, TransportErrorKind, TransportResult};
pub use events::{
    ClientEvents, ClientHandler, EventLog, ServerEvents, ServerHandler, TransportEvent,
};
pub use transport::Transport;
