//! Kubernetes-backed readiness sources.

use crate::error::{ClusterError, Result};
use crate::source::{Change, ChangeStream, Listing, ReadinessSource};
use crate::watch::{await_ready, ReadinessReport, ReadinessRequest};
use async_trait::async_trait;
use clusterdrive_core::Entity;
use futures_util::{future, stream, Stream, StreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// HTTP status the API server uses for an expired resource version.
const GONE: u16 = 410;

/// Decides whether one object counts as ready.
pub trait Readiness {
    /// Whether the object counts as ready.
    fn is_ready(&self) -> bool;
}

impl Readiness for Node {
    /// A node is ready when its `Ready` condition is `True`.
    fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
    }
}

impl Readiness for Pod {
    /// A pod is ready when it is `Running` with every container ready, or
    /// when it has `Succeeded`.
    fn is_ready(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        match status.phase.as_deref() {
            Some("Succeeded") => true,
            Some("Running") => status
                .container_statuses
                .as_ref()
                .is_some_and(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready)),
            _ => false,
        }
    }
}

/// Lists and watches one kind of Kubernetes object.
#[derive(Clone)]
pub struct KubeSource<K> {
    api: Api<K>,
    selector: Option<String>,
    kind: &'static str,
}

/// Node readiness source.
pub type NodeSource = KubeSource<Node>;

/// Pod readiness source.
pub type PodSource = KubeSource<Pod>;

impl KubeSource<Node> {
    /// Every node in the cluster, optionally filtered by label selector.
    pub fn nodes(client: Client, selector: Option<String>) -> Self {
        Self {
            api: Api::all(client),
            selector,
            kind: "nodes",
        }
    }
}

impl KubeSource<Pod> {
    /// Pods in `namespace` (all namespaces if `None`), optionally filtered
    /// by label selector.
    pub fn pods(client: Client, namespace: Option<&str>, selector: Option<String>) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self {
            api,
            selector,
            kind: "pods",
        }
    }
}

impl<K> KubeSource<K> {
    fn list_params(&self) -> ListParams {
        match &self.selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        }
    }

    fn watch_params(&self) -> WatchParams {
        match &self.selector {
            Some(selector) => WatchParams::default().labels(selector),
            None => WatchParams::default(),
        }
    }
}

impl<K> std::fmt::Debug for KubeSource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSource")
            .field("kind", &self.kind)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

fn entity<K: Resource + Readiness>(obj: &K) -> Entity {
    Entity::new(obj.name_any(), obj.is_ready())
}

#[async_trait]
impl<K> ReadinessSource for KubeSource<K>
where
    K: Resource + Readiness + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        self.kind
    }

    async fn list(&self) -> Result<Listing> {
        let list = self.api.list(&self.list_params()).await?;
        Ok(Listing {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            entities: list.items.iter().map(entity).collect(),
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<ChangeStream> {
        let events = self
            .api
            .watch(&self.watch_params(), resource_version)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref ae) if ae.code == GONE => ClusterError::Expired,
                other => ClusterError::Kube(other),
            })?;

        Ok(changes(events))
    }
}

/// Map raw watch events to changes. The API server ends every watch after
/// its timeout, so a normal end of `events` is reported as [`Change::Ended`].
fn changes<K, S>(events: S) -> ChangeStream
where
    K: Resource + Readiness + Send + 'static,
    S: Stream<Item = std::result::Result<WatchEvent<K>, kube::Error>> + Send + 'static,
{
    events
        .filter_map(|event| {
            future::ready(match event {
                Ok(WatchEvent::Added(obj)) | Ok(WatchEvent::Modified(obj)) => {
                    Some(Ok(Change::Applied(entity(&obj))))
                }
                Ok(WatchEvent::Deleted(obj)) => Some(Ok(Change::Deleted(obj.name_any()))),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(e)) if e.code == GONE => Some(Ok(Change::Expired)),
                Ok(WatchEvent::Error(e)) => Some(Err(ClusterError::Watch(e.message))),
                Err(e) => Some(Err(ClusterError::Kube(e))),
            })
        })
        .chain(stream::once(future::ready(Ok(Change::Ended))))
        .boxed()
}

/// Wait until enough nodes matching `selector` report `Ready`.
pub async fn await_nodes_ready(
    client: Client,
    selector: Option<String>,
    request: &ReadinessRequest,
) -> Result<ReadinessReport> {
    await_ready(&NodeSource::nodes(client, selector), request).await
}

/// Wait until enough pods in `namespace` matching `selector` are ready.
pub async fn await_pods_ready(
    client: Client,
    namespace: Option<&str>,
    selector: Option<String>,
    request: &ReadinessRequest,
) -> Result<ReadinessReport> {
    await_ready(&PodSource::pods(client, namespace, selector), request).await
}
