//! # Configuration Error Types

use thiserror::Error;

/// Errors raised while building or configuring a decorator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A latency simulation was built without a transport to wrap.
    #[error("latency simulation needs an inner transport to wrap")]
    MissingInnerTransport,

    /// A tunable is outside its documented range.
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        /// Name of the tunable.
        field: &'static str,
        /// Offending value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// The config file could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),

    /// The config file could not be read.
    #[error("cannot read {path}: {reason}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        reason: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
