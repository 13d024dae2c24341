//! Service Layer
//!
//! Contains the filter engine, which owns the graph and the field index and
//! runs matching passes over them.

pub mod engine;

pub use engine::FilterEngine;
