//! Match engine metrics
//!
//! Lock-free counters updated on the matching hot path and by registration.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = FilterEngine::with_defaults();
//! engine.test(&document);
//! let snapshot = engine.metrics().snapshot();
//! println!("avg pass: {}ns", snapshot.avg_test_ns);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one engine instance
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Documents tested
    pub documents_tested: AtomicU64,
    /// Candidate conditions evaluated across all passes
    pub conditions_evaluated: AtomicU64,
    /// Filters returned across all passes
    pub filters_matched: AtomicU64,
    /// Filters created (refcount bumps excluded)
    pub filters_registered: AtomicU64,
    /// Filters torn down
    pub filters_removed: AtomicU64,
    /// Cumulative matching time in nanoseconds
    pub test_time_ns: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one matching pass
    pub fn record_test(&self, duration: Duration, evaluated: usize, matched: usize) {
        self.documents_tested.fetch_add(1, Ordering::Relaxed);
        self.conditions_evaluated.fetch_add(evaluated as u64, Ordering::Relaxed);
        self.filters_matched.fetch_add(matched as u64, Ordering::Relaxed);
        self.test_time_ns.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_registered(&self) {
        self.filters_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removed(&self) {
        self.filters_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        let tested = self.documents_tested.load(Ordering::Relaxed);
        let total_ns = self.test_time_ns.load(Ordering::Relaxed);
        EngineMetricsSnapshot {
            documents_tested: tested,
            conditions_evaluated: self.conditions_evaluated.load(Ordering::Relaxed),
            filters_matched: self.filters_matched.load(Ordering::Relaxed),
            filters_registered: self.filters_registered.load(Ordering::Relaxed),
            filters_removed: self.filters_removed.load(Ordering::Relaxed),
            avg_test_ns: if tested > 0 { total_ns / tested } else { 0 },
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    pub documents_tested: u64,
    pub conditions_evaluated: u64,
    pub filters_matched: u64,
    pub filters_registered: u64,
    pub filters_removed: u64,
    pub avg_test_ns: u64,
}
