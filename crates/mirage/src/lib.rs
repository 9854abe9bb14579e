//! # MIRAGE
//!
//! Scenario runner for latency-simulated, multiplexed links.
//!
//! ## Crates
//!
//! - [`shared`]: the transport contract
//! - [`networking`]: latency simulation, multiplexing, in-process transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use mirage::{run_scenario, ScenarioConfig};
//!
//! let config = ScenarioConfig::from_toml_file("crates/mirage/data/link_sim.toml")?;
//! let report = run_scenario(config)?;
//! println!("{report}");
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod scenario;

pub use mirage_networking as networking;
pub use mirage_shared as shared;

pub use scenario::{
    run_scenario, LegConfig, Scenario, ScenarioConfig, ScenarioError, ScenarioReport,
    ScenarioResult, PAYLOAD_HEADER,
};
