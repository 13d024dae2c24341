//! # Realtime Core Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Match engine throughput
//! ├── integration/      # Registry and cluster flows
//! └── properties/       # Index vs. direct evaluation equivalence
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p rtc-tests
//!
//! # By category
//! cargo test -p rtc-tests integration::
//! cargo test -p rtc-tests properties::
//!
//! # Benchmarks
//! cargo bench -p rtc-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod benchmarks;
pub mod integration;
pub mod properties;
