//! Engine configuration and validation
//!
//! The expansion bound and the geo grid precision are deployment knobs,
//! not part of the matching algorithm, so both come from configuration.
//!
//! # Example
//!
//! ```ignore
//! use rtc_01_filter_engine::domain::EngineConfigBuilder;
//!
//! let config = EngineConfigBuilder::new()
//!     .max_expansion(128)
//!     .geo_precision(12)
//!     .build()
//!     .expect("Valid config");
//! ```

use crate::error::FilterError;
use serde::{Deserialize, Serialize};
use std::env;

/// Upper limit accepted for `max_expansion`.
pub const MAX_EXPANSION_LIMIT: usize = 65_536;

/// Deepest grid level accepted for `geo_precision`.
pub const MAX_GEO_PRECISION: u8 = 24;

/// Filter engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of AND-clauses a filter may expand to
    pub max_expansion: usize,
    /// Grid level used to bucket geo shapes (cell height = 180 / 2^level degrees)
    pub geo_precision: u8,
    /// Maximum accepted regular expression length
    pub max_regex_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_expansion: 256,
            geo_precision: 10, // ~0.18 degrees of latitude per cell
            max_regex_len: 1024,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RTC_MAX_FILTER_EXPANSION`: DNF clause bound (default: 256)
    /// - `RTC_GEO_PRECISION`: geo grid level (default: 10)
    /// - `RTC_MAX_REGEX_LEN`: regex length limit (default: 1024)
    pub fn from_env() -> Result<Self, FilterError> {
        let defaults = Self::default();
        let config = Self {
            max_expansion: env_or("RTC_MAX_FILTER_EXPANSION", defaults.max_expansion)?,
            geo_precision: env_or("RTC_GEO_PRECISION", defaults.geo_precision)?,
            max_regex_len: env_or("RTC_MAX_REGEX_LEN", defaults.max_regex_len)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate bounds
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.max_expansion == 0 || self.max_expansion > MAX_EXPANSION_LIMIT {
            return Err(FilterError::InvalidConfig(format!(
                "max_expansion must be between 1 and {}, got {}",
                MAX_EXPANSION_LIMIT, self.max_expansion
            )));
        }

        if self.geo_precision > MAX_GEO_PRECISION {
            return Err(FilterError::InvalidConfig(format!(
                "geo_precision must be at most {}, got {}",
                MAX_GEO_PRECISION, self.geo_precision
            )));
        }

        if self.max_regex_len == 0 {
            return Err(FilterError::InvalidConfig(
                "max_regex_len cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, FilterError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| FilterError::InvalidConfig(format!("{key}: cannot parse '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Builder for EngineConfig with validation
#[derive(Default)]
pub struct EngineConfigBuilder {
    max_expansion: Option<usize>,
    geo_precision: Option<u8>,
    max_regex_len: Option<usize>,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the DNF clause bound
    pub fn max_expansion(mut self, clauses: usize) -> Self {
        self.max_expansion = Some(clauses);
        self
    }

    /// Set the geo grid level
    pub fn geo_precision(mut self, level: u8) -> Self {
        self.geo_precision = Some(level);
        self
    }

    /// Set the regex length limit
    pub fn max_regex_len(mut self, len: usize) -> Self {
        self.max_regex_len = Some(len);
        self
    }

    /// Build the EngineConfig, validating all parameters
    pub fn build(self) -> Result<EngineConfig, FilterError> {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            max_expansion: self.max_expansion.unwrap_or(defaults.max_expansion),
            geo_precision: self.geo_precision.unwrap_or(defaults.geo_precision),
            max_regex_len: self.max_regex_len.unwrap_or(defaults.max_regex_len),
        };

        config.validate()?;
        Ok(config)
    }
}
