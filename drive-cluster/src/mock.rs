//! Mock readiness source for testing.
//!
//! Listings and watch subscriptions are scripted up front. Each `watch()`
//! takes the next script; without one the subscription opens and stays
//! silent.

use crate::error::{ClusterError, Result};
use crate::source::{Change, ChangeStream, Listing, ReadinessSource};
use async_trait::async_trait;
use clusterdrive_core::Entity;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Event = std::result::Result<Change, String>;

#[derive(Debug)]
struct WatchScript {
    events: Vec<Event>,
    keep_open: bool,
}

#[derive(Debug, Default)]
struct MockSourceState {
    listings: VecDeque<Listing>,
    scripts: VecDeque<WatchScript>,
    failing_watches: usize,
    list_calls: usize,
    watch_calls: usize,
    watched_from: Vec<String>,
    senders: Vec<mpsc::UnboundedSender<Event>>,
}

/// Mock source for testing.
///
/// Listings are served in order; the last one repeats.
#[derive(Debug, Default, Clone)]
pub struct MockSource {
    inner: Arc<Mutex<MockSourceState>>,
}

impl MockSource {
    /// Create a source whose first listing holds `entities`.
    pub fn new(entities: Vec<Entity>) -> Self {
        let source = Self::default();
        source.push_listing(entities);
        source
    }

    /// Queue another listing.
    pub fn push_listing(&self, entities: Vec<Entity>) {
        let mut inner = self.inner.lock().unwrap();
        let resource_version = (inner.listings.len() + 1).to_string();
        inner.listings.push_back(Listing {
            entities,
            resource_version,
        });
    }

    /// Script the next subscription: deliver `changes`, then stay open.
    pub fn on_watch(&self, changes: Vec<Change>) {
        self.script(changes.into_iter().map(Ok).collect(), true);
    }

    /// Script the next subscription: deliver `changes`, then end the stream.
    pub fn on_watch_then_close(&self, changes: Vec<Change>) {
        self.script(changes.into_iter().map(Ok).collect(), false);
    }

    /// Script the next subscription: deliver `changes`, then an error.
    pub fn on_watch_then_fail(&self, changes: Vec<Change>, reason: &str) {
        let mut events: Vec<Event> = changes.into_iter().map(Ok).collect();
        events.push(Err(reason.to_string()));
        self.script(events, true);
    }

    fn script(&self, events: Vec<Event>, keep_open: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.push_back(WatchScript { events, keep_open });
    }

    /// Cause the next `n` subscriptions to fail to open.
    pub fn fail_watches(&self, n: usize) {
        self.inner.lock().unwrap().failing_watches += n;
    }

    /// Number of `list()` calls.
    pub fn list_count(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    /// Number of `watch()` calls, failed ones included.
    pub fn watch_count(&self) -> usize {
        self.inner.lock().unwrap().watch_calls
    }

    /// Resource versions passed to successful `watch()` calls.
    pub fn watched_from(&self) -> Vec<String> {
        self.inner.lock().unwrap().watched_from.clone()
    }

    /// Subscriptions whose stream is still held by someone.
    pub fn active_watches(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.senders.retain(|tx| !tx.is_closed());
        inner.senders.len()
    }
}

#[async_trait]
impl ReadinessSource for MockSource {
    fn kind(&self) -> &str {
        "mock"
    }

    async fn list(&self) -> Result<Listing> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        let listing = if inner.listings.len() > 1 {
            inner.listings.pop_front()
        } else {
            inner.listings.front().cloned()
        };
        Ok(listing.unwrap_or_default())
    }

    async fn watch(&self, resource_version: &str) -> Result<ChangeStream> {
        let mut inner = self.inner.lock().unwrap();
        inner.watch_calls += 1;

        if inner.failing_watches > 0 {
            inner.failing_watches -= 1;
            return Err(ClusterError::Watch("mock watch refused".to_string()));
        }
        inner.watched_from.push(resource_version.to_string());

        let script = inner.scripts.pop_front().unwrap_or(WatchScript {
            events: Vec::new(),
            keep_open: true,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        for event in script.events {
            let _ = tx.send(event);
        }
        if script.keep_open {
            inner.senders.push(tx);
        }

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event.map_err(ClusterError::Watch), rx))
        });
        Ok(stream.boxed())
    }
}
