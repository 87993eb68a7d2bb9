//! # clusterdrive-cluster
//!
//! Readiness watchers for clusterdrive: wait until enough nodes or pods in
//! a cluster are ready.
//!
//! A watch lists the current state first and returns immediately when the
//! threshold is already met. Otherwise it subscribes to change events,
//! falling back to periodic re-listing when the subscription cannot be
//! opened. Every watch is bounded by one timeout.
//!
//! ## Example
//!
//! ```ignore
//! use clusterdrive_cluster::{await_nodes_ready, ReadinessRequest};
//!
//! let client = kube::Client::try_default().await?;
//! let request = ReadinessRequest::new(2, Duration::from_secs(300));
//! let report = await_nodes_ready(client, Some("node-role.kubernetes.io/worker".into()), &request).await?;
//! println!("{}/{} nodes ready", report.summary.ready, report.summary.total);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod kubernetes;
pub mod mock;
pub mod source;
pub mod watch;

pub use error::{ClusterError, Result};
pub use kubernetes::{await_nodes_ready, await_pods_ready, KubeSource, NodeSource, PodSource, Readiness};
pub use mock::MockSource;
pub use source::{Change, ChangeStream, Listing, ReadinessSource};
pub use watch::{
    await_ready, ReadinessReport, ReadinessRequest, DEFAULT_POLL_INTERVAL,
    DEFAULT_READINESS_TIMEOUT,
};
