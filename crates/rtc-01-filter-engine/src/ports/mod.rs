//! Ports Layer
//!
//! Driving port of the filter engine. The engine has no driven ports: it
//! performs no I/O and owns no external dependencies.

pub mod inbound;

pub use inbound::{FilterEngineApi, Registration};
