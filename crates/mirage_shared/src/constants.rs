//! # Network Constants

/// Default maximum packet size (MTU-safe).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1200;

/// Default tick rate of the scenario runner (updates per second).
pub const DEFAULT_TICK_RATE: u32 = 60;
