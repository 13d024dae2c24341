//! Inbound Ports (Driving Ports)
//!
//! The API the room registry uses to register filters and test documents.

use std::collections::BTreeSet;

use shared_types::{Document, FilterId};

use crate::domain::NormalizedFilter;
use crate::error::FilterError;

/// Outcome of a registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Content-addressed filter id
    pub filter_id: FilterId,
    /// True when the filter was compiled into the index by this call,
    /// false when an identical filter was already registered
    pub created: bool,
}

/// Primary filter engine API (Driving Port)
///
/// Mutating methods take `&mut self`; callers serialize them against
/// `test` with a reader/writer lock so a pass never sees a half-applied
/// registration or teardown.
pub trait FilterEngineApi: Send + Sync {
    /// Compile a filter body without touching the index.
    fn compile(&self, body: &Document) -> Result<NormalizedFilter, FilterError>;

    /// Compile and register a filter body.
    ///
    /// All-or-nothing: on error the index is left unchanged.
    fn register(&mut self, body: &Document) -> Result<Registration, FilterError>;

    /// Register an already compiled filter.
    fn register_normalized(&mut self, filter: &NormalizedFilter) -> Registration;

    /// Drop one reference to a filter.
    ///
    /// Returns `None` for an unknown filter, `Some(true)` when the last
    /// reference was dropped and the filter was removed from the index.
    fn release(&mut self, filter_id: &FilterId) -> Option<bool>;

    /// Filters matching a document.
    fn test(&self, document: &Document) -> BTreeSet<FilterId>;

    /// Canonical body of a registered filter.
    fn canonical(&self, filter_id: &FilterId) -> Option<&str>;
}
