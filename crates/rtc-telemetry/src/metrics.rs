//! Prometheus metrics for the realtime core.
//!
//! All metrics follow the naming convention: `rtc_<area>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // MATCHING
    // =========================================================================

    /// Documents tested against the registered filters
    pub static ref DOCUMENTS_TESTED: Counter = Counter::new(
        "rtc_documents_tested_total",
        "Total documents tested against registered filters"
    ).expect("metric creation failed");

    /// Rooms returned by matching passes
    pub static ref ROOMS_MATCHED: Counter = Counter::new(
        "rtc_rooms_matched_total",
        "Total rooms returned by matching passes"
    ).expect("metric creation failed");

    // =========================================================================
    // CLUSTER
    // =========================================================================

    /// Cluster deltas by direction
    pub static ref CLUSTER_DELTAS: CounterVec = CounterVec::new(
        Opts::new("rtc_cluster_deltas_total", "Cluster deltas by direction"),
        &["direction"]  // direction: sent/applied/ignored
    ).expect("metric creation failed");

    /// Cluster synchronisations by kind
    pub static ref CLUSTER_SYNCS: CounterVec = CounterVec::new(
        Opts::new("rtc_cluster_syncs_total", "Cluster synchronisations by kind"),
        &["kind"]  // kind: versions/full
    ).expect("metric creation failed");

    /// Deltas or snapshots that could not be applied consistently
    pub static ref CLUSTER_DESYNCS: Counter = Counter::new(
        "rtc_cluster_desyncs_total",
        "Total cluster desyncs detected"
    ).expect("metric creation failed");

    /// Vacant records dropped by tombstone collection
    pub static ref TOMBSTONES_COLLECTED: Counter = Counter::new(
        "rtc_cluster_tombstones_collected_total",
        "Total vacant resource records garbage collected"
    ).expect("metric creation failed");

    /// Time spent pulling and adopting peer state
    pub static ref CLUSTER_SYNC_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "rtc_cluster_sync_duration_seconds",
            "Time spent synchronising with peers"
        ).buckets(exponential_buckets(0.0001, 2.0, 14).unwrap_or_default())
    ).expect("metric creation failed");

    // =========================================================================
    // LOCKS
    // =========================================================================

    /// Lock waits that hit their deadline
    pub static ref LOCK_TIMEOUTS: Counter = Counter::new(
        "rtc_lock_timeouts_total",
        "Total resource lock acquisitions that timed out"
    ).expect("metric creation failed");

    /// Try-once acquisitions that found the resource busy
    pub static ref LOCK_BUSY: Counter = Counter::new(
        "rtc_lock_busy_total",
        "Total resource lock acquisitions rejected as busy"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Matching
        Box::new(DOCUMENTS_TESTED.clone()),
        Box::new(ROOMS_MATCHED.clone()),
        // Cluster
        Box::new(CLUSTER_DELTAS.clone()),
        Box::new(CLUSTER_SYNCS.clone()),
        Box::new(CLUSTER_DESYNCS.clone()),
        Box::new(CLUSTER_SYNC_DURATION.clone()),
        Box::new(TOMBSTONES_COLLECTED.clone()),
        // Locks
        Box::new(LOCK_TIMEOUTS.clone()),
        Box::new(LOCK_BUSY.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn gather() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
