//! # Realtime Core Benchmarks
//!
//! Performance benchmarks per subsystem.

pub mod rtc_01_match_engine;
