//! # Property Tests
//!
//! Randomised checks of the matching pipeline against a brute-force
//! evaluator.

pub mod match_equivalence;
