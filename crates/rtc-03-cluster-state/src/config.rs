//! Cluster node configuration
//!
//! Lock acquisition is try-once unless a wait is configured; callers can
//! still pass their own deadline per operation.

use shared_types::NodeId;
use std::env;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::{ClusterError, LockMode};

/// Cluster state manager configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    /// This node's id
    pub node_id: NodeId,
    /// Default lock wait; `None` means try once and fail with `ResourceBusy`
    pub lock_wait: Option<Duration>,
    /// Deadline for one request/reply round trip with a peer
    pub sync_timeout: Duration,
    /// How long a vacant record is kept before collection, and how long its
    /// low-water mark outlives it
    pub tombstone_retention: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::random(),
            lock_wait: None,
            sync_timeout: Duration::from_secs(5),
            tombstone_retention: Duration::from_secs(300),
        }
    }
}

impl ClusterConfig {
    /// Configuration with a fixed node id and default knobs.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: NodeId::new(node_id),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RTC_NODE_ID`: node id (default: random UUID)
    /// - `RTC_LOCK_WAIT_MS`: default lock wait, 0 for try-once (default: 0)
    /// - `RTC_SYNC_TIMEOUT_MS`: peer round-trip deadline (default: 5000)
    /// - `RTC_TOMBSTONE_RETENTION_MS`: vacant record retention (default: 300000)
    pub fn from_env() -> Result<Self, ClusterError> {
        let defaults = Self::default();
        let lock_wait_ms: u64 = env_or("RTC_LOCK_WAIT_MS", 0)?;
        let sync_timeout_ms: u64 = env_or("RTC_SYNC_TIMEOUT_MS", defaults.sync_timeout.as_millis() as u64)?;
        let retention_ms: u64 = env_or(
            "RTC_TOMBSTONE_RETENTION_MS",
            defaults.tombstone_retention.as_millis() as u64,
        )?;

        let config = Self {
            node_id: env::var("RTC_NODE_ID").map(NodeId::new).unwrap_or(defaults.node_id),
            lock_wait: (lock_wait_ms > 0).then(|| Duration::from_millis(lock_wait_ms)),
            sync_timeout: Duration::from_millis(sync_timeout_ms),
            tombstone_retention: Duration::from_millis(retention_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate bounds
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.node_id.as_str().trim().is_empty() {
            return Err(ClusterError::InvalidConfig("node_id cannot be empty".to_string()));
        }

        if self.sync_timeout.is_zero() {
            return Err(ClusterError::InvalidConfig("sync_timeout cannot be 0".to_string()));
        }

        Ok(())
    }

    /// Lock mode for an operation starting now.
    pub fn lock_mode(&self) -> LockMode {
        match self.lock_wait {
            Some(wait) => LockMode::Until(Instant::now() + wait),
            None => LockMode::TryOnce,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ClusterError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ClusterError::InvalidConfig(format!("{key}: cannot parse '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Builder for ClusterConfig with validation
#[derive(Default)]
pub struct ClusterConfigBuilder {
    node_id: Option<NodeId>,
    lock_wait: Option<Duration>,
    sync_timeout: Option<Duration>,
    tombstone_retention: Option<Duration>,
}

impl ClusterConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node id
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Wait up to `wait` for contended locks instead of failing fast
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = Some(wait);
        self
    }

    /// Set the peer round-trip deadline
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Set how long vacant records are retained
    pub fn tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = Some(retention);
        self
    }

    /// Build the ClusterConfig, validating all parameters
    pub fn build(self) -> Result<ClusterConfig, ClusterError> {
        let defaults = ClusterConfig::default();

        let config = ClusterConfig {
            node_id: self.node_id.unwrap_or(defaults.node_id),
            lock_wait: self.lock_wait.or(defaults.lock_wait),
            sync_timeout: self.sync_timeout.unwrap_or(defaults.sync_timeout),
            tombstone_retention: self.tombstone_retention.unwrap_or(defaults.tombstone_retention),
        };

        config.validate()?;
        Ok(config)
    }
}
