//! # MIRAGE Networking
//!
//! Transport decorators for tick-driven game networking.
//!
//! ## Architecture
//!
//! ```text
//!            application
//!                 │  client_send / server_send
//!        ┌────────▼─────────┐
//!        │ MultiplexTransport│  one id space, first available client path
//!        └──┬────────────┬───┘
//!   ┌───────▼──────┐ ┌───▼──────────┐
//!   │LatencySimulat│ │LatencySimulat│  delay, loss, scramble (outbound only)
//!   └───────┬──────┘ └───┬──────────┘
//!   ┌───────▼──────┐ ┌───▼──────────┐
//!   │MemoryTransport│ │MemoryTransport│  or any other `Transport`
//!   └──────────────┘ └──────────────┘
//! ```
//!
//! Every box is a [`Transport`](mirage_shared::Transport), so the decorators
//! stack in any order.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mirage_networking::{LatencyConfig, LatencySimulation, MemoryHub, MemoryTransport};
//!
//! let hub = MemoryHub::new();
//! let inner = MemoryTransport::new(&hub, "memory", "localhost:7777");
//! let mut transport = LatencySimulation::builder()
//!     .wrap(inner)
//!     .config(LatencyConfig::poor_network())
//!     .build()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod latency;
pub mod memory;
pub mod multiplex;

#[cfg(test)]
mod test_support;

pub use error::{ConfigError, ConfigResult};
pub use latency::{
    JitterNoise, LatencyConfig, LatencySimulation, LatencySimulationBuilder, LatencyStats,
    MessageQueue, QueuedMessage,
};
pub use memory::{MemoryHub, MemoryTransport};
pub use multiplex::{ConnectionLookup, MultiplexTransport};
