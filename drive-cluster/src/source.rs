//! The list + watch contract readiness watchers consume.

use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use clusterdrive_core::Entity;
use futures_util::stream::BoxStream;

/// One change reported by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// An entity was added or modified.
    Applied(Entity),
    /// An entity was removed.
    Deleted(String),
    /// The watch's resource version is gone; re-list and re-subscribe.
    Expired,
    /// The server closed the subscription on its own timeout. Re-list and
    /// re-subscribe; a stream that stops without this is a failure.
    Ended,
}

/// Current state of every entity, plus the version to watch from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Every entity with its readiness.
    pub entities: Vec<Entity>,
    /// Version to start the watch from.
    pub resource_version: String,
}

/// Change events, in order. Dropping the stream ends the subscription.
pub type ChangeStream = BoxStream<'static, std::result::Result<Change, ClusterError>>;

/// A set of entities that can be listed and watched.
#[async_trait]
pub trait ReadinessSource: Send + Sync {
    /// What is being watched, for log lines (e.g. `nodes`).
    fn kind(&self) -> &str;

    /// List every entity with its current readiness.
    async fn list(&self) -> Result<Listing>;

    /// Subscribe to changes after `resource_version`.
    async fn watch(&self, resource_version: &str) -> Result<ChangeStream>;
}
