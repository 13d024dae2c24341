//! # Realtime Core Match Benchmarks
//!
//! | Subsystem | Claim | Target |
//! |-----------|-------|--------|
//! | rtc-01 Filter Engine | Document test independent of filter count | < 100µs per document |
//! | rtc-01 Filter Engine | Duplicate registration is a refcount bump | < 10µs |

use criterion::{criterion_group, criterion_main};

criterion_group!(benches, rtc_tests::benchmarks::rtc_01_match_engine::register_benchmarks);
criterion_main!(benches);
