//! # Latency Configuration
//!
//! All tunables of a [`LatencySimulation`](super::LatencySimulation). Loaded
//! from TOML once at startup, adjustable at runtime through setters.
//!
//! ```toml
//! jitter = 0.02
//! jitter_speed = 1.0
//! reliable_latency_ms = 100.0
//! unreliable_loss = 1.0
//! unreliable_latency_ms = 100.0
//! unreliable_scramble = 1.0
//! seed = 42
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Upper bound for both base latencies, in milliseconds.
pub const MAX_LATENCY_MS: f64 = 10_000.0;

/// Upper bound for percentages.
pub const MAX_PERCENT: f64 = 100.0;

/// Latency, jitter, loss and scramble settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LatencyConfig {
    /// Jitter amplitude in seconds, `0..=1`.
    pub jitter: f64,
    /// How fast the jitter signal changes. Multiplies clock time.
    pub jitter_speed: f64,
    /// Base delay of the reliable channel, `0..=10000` ms.
    pub reliable_latency_ms: f64,
    /// Chance an unreliable message is dropped, `0..=100` %.
    pub unreliable_loss: f64,
    /// Base delay of the unreliable channel, `0..=10000` ms.
    pub unreliable_latency_ms: f64,
    /// Chance a surviving unreliable message is inserted at a random queue
    /// position, `0..=100` %.
    pub unreliable_scramble: f64,
    /// RNG and noise seed. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            jitter: 0.02,
            jitter_speed: 1.0,
            reliable_latency_ms: 100.0,
            unreliable_loss: 1.0,
            unreliable_latency_ms: 100.0,
            unreliable_scramble: 1.0,
            seed: None,
        }
    }
}

impl LatencyConfig {
    /// No delay, no loss, no scrambling.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            jitter: 0.0,
            jitter_speed: 0.0,
            reliable_latency_ms: 0.0,
            unreliable_loss: 0.0,
            unreliable_latency_ms: 0.0,
            unreliable_scramble: 0.0,
            seed: None,
        }
    }

    /// Typical poor consumer connection.
    #[must_use]
    pub fn poor_network() -> Self {
        Self {
            jitter: 0.05,
            jitter_speed: 1.0,
            reliable_latency_ms: 150.0,
            unreliable_loss: 5.0,
            unreliable_latency_ms: 150.0,
            unreliable_scramble: 5.0,
            seed: None,
        }
    }

    /// Mobile link: high latency, high jitter, frequent loss.
    #[must_use]
    pub fn mobile_network() -> Self {
        Self {
            jitter: 0.1,
            jitter_speed: 2.0,
            reliable_latency_ms: 250.0,
            unreliable_loss: 12.0,
            unreliable_latency_ms: 250.0,
            unreliable_scramble: 10.0,
            seed: None,
        }
    }

    /// Same settings with a fixed seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::OutOfRange`] for an invalid setting.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`LatencyConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks every tunable against its range.
    ///
    /// # Errors
    ///
    /// [`ConfigError::OutOfRange`] naming the first tunable that is out of
    /// range or NaN.
    pub fn validate(&self) -> ConfigResult<()> {
        check_range("jitter", self.jitter, 0.0, 1.0)?;
        check_range("jitter_speed", self.jitter_speed, 0.0, f64::MAX)?;
        check_range("reliable_latency_ms", self.reliable_latency_ms, 0.0, MAX_LATENCY_MS)?;
        check_range("unreliable_loss", self.unreliable_loss, 0.0, MAX_PERCENT)?;
        check_range("unreliable_latency_ms", self.unreliable_latency_ms, 0.0, MAX_LATENCY_MS)?;
        check_range("unreliable_scramble", self.unreliable_scramble, 0.0, MAX_PERCENT)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> ConfigResult<()> {
    // NaN fails both comparisons and is rejected too.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Clamps a runtime setting into range. NaN becomes `min`.
pub(crate) fn clamp_setting(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(LatencyConfig::default().validate().is_ok());
        assert!(LatencyConfig::passthrough().validate().is_ok());
        assert!(LatencyConfig::poor_network().validate().is_ok());
        assert!(LatencyConfig::mobile_network().validate().is_ok());
    }

    #[test]
    fn test_parse_partial_document() {
        let config = LatencyConfig::from_toml_str(
            r"
            reliable_latency_ms = 40
            unreliable_loss = 2.5
            seed = 9
            ",
        )
        .unwrap();

        assert_eq!(config.reliable_latency_ms, 40.0);
        assert_eq!(config.unreliable_loss, 2.5);
        assert_eq!(config.seed, Some(9));
        // Unspecified fields keep their defaults.
        assert_eq!(config.jitter, LatencyConfig::default().jitter);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = LatencyConfig::from_toml_str("unreliable_loss = 150.0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { field: "unreliable_loss", .. }
        ));

        let err = LatencyConfig::from_toml_str("jitter = -0.1").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "jitter", .. }));
    }

    #[test]
    fn test_nan_rejected() {
        let config = LatencyConfig {
            reliable_latency_ms: f64::NAN,
            ..LatencyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = LatencyConfig::from_toml_str("reliable_latency = 100").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = LatencyConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_clamp_setting() {
        assert_eq!(clamp_setting(250.0, 0.0, 100.0), 100.0);
        assert_eq!(clamp_setting(-3.0, 0.0, 100.0), 0.0);
        assert_eq!(clamp_setting(f64::NAN, 0.0, 1.0), 0.0);
    }
}
