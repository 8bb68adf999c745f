//! Configuration for the sync engine.

use std::time::Duration;

/// Tunables for the reconciler and coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Stable identifier for this client instance
    pub node_id: String,
    /// Interval between automatic cycles
    pub sync_interval: Duration,
    /// Push attempts per change log entry before it is surfaced as a
    /// permanent failure and excluded from automatic retries
    pub max_attempts: u32,
    /// Page size for pull requests
    pub pull_limit: usize,
    /// Timeout applied to each individual network call
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Config with the given node id and default tunables.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            sync_interval: Duration::from_secs(30),
            max_attempts: 5,
            pull_limit: 100,
            request_timeout: Duration::from_secs(10),
        }
    }
}
