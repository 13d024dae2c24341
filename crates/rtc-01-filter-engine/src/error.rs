//! Error types for the Filter Engine subsystem

use thiserror::Error;

/// Errors raised while compiling or registering a filter.
///
/// Both compile errors are reported before the field index is touched:
/// a failed registration leaves the engine exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error("Filter too complex: expands to {clauses} clauses (max {max})")]
    FilterTooComplex { clauses: usize, max: usize },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl FilterError {
    /// Shorthand for a malformed-filter error.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFilter(reason.into())
    }
}
