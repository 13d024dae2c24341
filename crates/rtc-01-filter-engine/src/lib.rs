//! # RTC-01 Filter Engine
//!
//! Compiles boolean filters over JSON documents into an index, so a single
//! document can be tested against thousands of registered filters without a
//! linear scan.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure logic, no I/O
//!   - `FilterExpr`: parsed filter tree with direct evaluation
//!   - `normalize`: De Morgan push-down, bounded DNF expansion, canonical form
//!   - `FilterGraph`: condition/subfilter/filter arena with reference counts
//!   - `FieldIndex`: per-field term, exists, range, geo and regexp entries
//!   - `EngineConfig` / `EngineConfigBuilder`: configuration with validation
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `FilterEngineApi`: Driving port (register, release, test)
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `FilterEngine`: Implements `FilterEngineApi`
//!
//! ## Filter language
//!
//! | Keyword | Example |
//! |---------|---------|
//! | `term` / `equals` | `{"term": {"city": "NYC"}}` |
//! | `in` | `{"in": {"city": ["NYC", "LA"]}}` |
//! | `exists` / `missing` | `{"exists": "name"}` |
//! | `range` | `{"range": {"age": {"gte": 18, "lt": 65}}}` |
//! | `geoBoundingBox` | `{"geoBoundingBox": {"loc": {"top": 1, "left": 0, "bottom": 0, "right": 1}}}` |
//! | `geoDistance` | `{"geoDistance": {"loc": {"lat": 0, "lon": 0}, "distance": "1km"}}` |
//! | `geoDistanceRange` | `{"geoDistanceRange": {"loc": [0, 0], "from": "1km", "to": "2km"}}` |
//! | `geoPolygon` | `{"geoPolygon": {"loc": {"points": [[0, 0], [0, 1], [1, 1]]}}}` |
//! | `regexp` | `{"regexp": {"name": {"value": "^a", "flags": "i"}}}` |
//! | `and` / `or` / `not` / `bool` | `{"not": {"exists": "deleted"}}` |
//!
//! `{}` matches every document.
//!
//! ## Invariants
//!
//! - Identical filter bodies compile to the same `FilterId` on every node
//! - Registration is all-or-nothing
//! - Every live condition sits in exactly one field index entry
//! - `test` agrees with direct evaluation of every registered filter
//!
//! ## Usage Example
//!
//! ```ignore
//! use rtc_01_filter_engine::{FilterEngine, FilterEngineApi};
//! use serde_json::json;
//!
//! let mut engine = FilterEngine::with_defaults();
//! let registration = engine.register(&json!({"term": {"city": "NYC"}}))?;
//!
//! let matched = engine.test(&json!({"city": "NYC"}));
//! assert!(matched.contains(&registration.filter_id));
//! ```

pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-exports for convenience
pub use domain::{EngineConfig, EngineConfigBuilder, FilterExpr, NormalizedFilter};
pub use error::FilterError;
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use ports::{FilterEngineApi, Registration};
pub use service::FilterEngine;
