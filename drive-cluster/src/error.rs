//! Error types for clusterdrive-cluster.

use std::time::Duration;

/// Readiness watch failures.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Cluster API request failed.
    #[error("cluster API error: {0}")]
    Kube(#[from] kube::Error),

    /// The deadline elapsed before the threshold was met.
    #[error("timed out after {timeout:?} waiting for readiness ({ready}/{target} ready, {total} observed)")]
    Timeout {
        /// The bound that was exceeded.
        timeout: Duration,
        /// Entities ready when the deadline hit.
        ready: usize,
        /// Entities observed.
        total: usize,
        /// Ready count required.
        target: usize,
    },

    /// The event stream ended while still waiting.
    #[error("event stream closed before readiness was reached")]
    StreamClosed,

    /// The event stream reported an error.
    #[error("watch failed: {0}")]
    Watch(String),

    /// The resource version the watch started from is too old (HTTP 410).
    #[error("watch resource version expired")]
    Expired,
}

impl ClusterError {
    /// Whether the deadline ended the watch.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::Timeout { .. })
    }
}

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
