//! Async driver for [`ReadinessTracker`].
//!
//! The driver lists, subscribes, polls and keeps time; every decision is
//! made by the tracker. The whole watch runs under one deadline, and the
//! event subscription is dropped on every exit path.

use crate::error::{ClusterError, Result};
use crate::source::{Change, ChangeStream, ReadinessSource};
use clusterdrive_core::{
    CniRule, Directive, ReadinessInput, ReadinessPhase, ReadinessSummary, ReadinessTracker,
};
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Default bound on one readiness watch.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Default re-list interval when watching is unavailable.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Parameters for one readiness watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessRequest {
    /// Ready entities required. Zero, or more than exist, means all.
    pub min_ready: usize,
    /// Bound on the whole watch.
    pub timeout: Duration,
    /// Re-list interval when the subscription cannot be opened.
    pub poll_interval: Duration,
    /// CNI operator exception, for pod watches.
    pub cni: Option<CniRule>,
}

impl ReadinessRequest {
    /// Require `min_ready` entities within `timeout`.
    pub fn new(min_ready: usize, timeout: Duration) -> Self {
        Self {
            min_ready,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cni: None,
        }
    }

    /// Require every entity within `timeout`.
    pub fn all(timeout: Duration) -> Self {
        Self::new(0, timeout)
    }

    /// Builder: set the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder: apply the CNI operator exception.
    pub fn with_cni_rule(mut self, rule: CniRule) -> Self {
        self.cni = Some(rule);
        self
    }
}

/// Outcome of a converged watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    /// Final counters.
    #[serde(flatten)]
    pub summary: ReadinessSummary,
    /// Time from start to convergence.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Whether an event subscription was needed.
    pub subscribed: bool,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// How changes currently arrive.
enum Feed {
    Idle,
    Events(ChangeStream),
    Polling(Interval),
}

struct Watch<'a> {
    source: &'a dyn ReadinessSource,
    poll_interval: Duration,
    tracker: ReadinessTracker,
    resource_version: String,
    feed: Feed,
    subscribed: bool,
    failure: Option<ClusterError>,
}

/// Wait until `source` has enough ready entities.
///
/// Returns as soon as the initial listing meets the threshold, without
/// subscribing. Otherwise consumes change events, falling back to polling
/// when the subscription cannot be opened, until the threshold is met or
/// `request.timeout` elapses.
pub async fn await_ready(
    source: &dyn ReadinessSource,
    request: &ReadinessRequest,
) -> Result<ReadinessReport> {
    let started = Instant::now();
    let mut tracker = ReadinessTracker::new(request.min_ready);
    if let Some(rule) = &request.cni {
        tracker = tracker.with_cni_rule(rule.clone());
    }

    let mut watch = Watch {
        source,
        poll_interval: request.poll_interval,
        tracker,
        resource_version: String::new(),
        feed: Feed::Idle,
        subscribed: false,
        failure: None,
    };

    let outcome = tokio::time::timeout(request.timeout, watch.run()).await;
    if !matches!(watch.feed, Feed::Idle) {
        tracing::debug!("Stopping {} subscription", source.kind());
    }
    watch.feed = Feed::Idle;

    match outcome {
        Ok(Ok(())) => {
            let summary = watch.tracker.summary();
            tracing::info!(
                "{} ready: {}/{} (target {})",
                source.kind(),
                summary.ready,
                summary.total,
                summary.target
            );
            Ok(ReadinessReport {
                summary,
                elapsed: started.elapsed(),
                subscribed: watch.subscribed,
            })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            watch.tracker.on_input(ReadinessInput::Deadline);
            let summary = watch.tracker.summary();
            tracing::warn!(
                "Timed out waiting for {}: {}/{} ready",
                source.kind(),
                summary.ready,
                summary.target
            );
            Err(ClusterError::Timeout {
                timeout: request.timeout,
                ready: summary.ready,
                total: summary.total,
                target: summary.target,
            })
        }
    }
}

impl Watch<'_> {
    async fn run(&mut self) -> Result<()> {
        let mut directive = self.relist().await?;

        loop {
            match directive {
                Some(Directive::Finish) => return self.finish(),
                Some(Directive::Subscribe) => self.subscribe().await?,
                Some(Directive::Relist) => {
                    directive = self.relist().await?;
                    if directive.is_none() && matches!(self.feed, Feed::Idle) {
                        directive = Some(Directive::Subscribe);
                    }
                    continue;
                }
                None => {}
            }

            let input = self.next_input().await;
            directive = self.tracker.on_input(input);
        }
    }

    async fn relist(&mut self) -> Result<Option<Directive>> {
        let listing = match self.source.list().await {
            Ok(listing) => listing,
            // Polling tolerates a failed re-list; the deadline still applies.
            Err(e) if matches!(self.feed, Feed::Polling(_)) => {
                tracing::warn!("Re-listing {} failed: {}", self.source.kind(), e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.resource_version = listing.resource_version;
        Ok(self.tracker.on_input(ReadinessInput::Snapshot(listing.entities)))
    }

    async fn subscribe(&mut self) -> Result<()> {
        match self.source.watch(&self.resource_version).await {
            Ok(stream) => {
                tracing::debug!(
                    "Watching {} from resource version {:?}",
                    self.source.kind(),
                    self.resource_version
                );
                self.subscribed = true;
                self.feed = Feed::Events(stream);
            }
            Err(e) => {
                tracing::warn!(
                    "Cannot watch {} ({}); polling every {:?}",
                    self.source.kind(),
                    e,
                    self.poll_interval
                );
                let mut interval = tokio::time::interval_at(
                    Instant::now() + self.poll_interval,
                    self.poll_interval,
                );
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.feed = Feed::Polling(interval);
            }
        }
        Ok(())
    }

    async fn next_input(&mut self) -> ReadinessInput {
        let event = match &mut self.feed {
            Feed::Events(stream) => stream.next().await,
            Feed::Polling(interval) => {
                interval.tick().await;
                return ReadinessInput::Tick;
            }
            Feed::Idle => return ReadinessInput::Tick,
        };

        match event {
            Some(Ok(Change::Applied(entity))) => ReadinessInput::Applied(entity),
            Some(Ok(Change::Deleted(name))) => ReadinessInput::Deleted(name),
            Some(Ok(Change::Expired)) | Some(Err(ClusterError::Expired)) => {
                tracing::info!("{} watch expired; re-listing", self.source.kind());
                self.feed = Feed::Idle;
                ReadinessInput::Tick
            }
            Some(Ok(Change::Ended)) => {
                tracing::debug!("{} watch ended by server; re-listing", self.source.kind());
                self.feed = Feed::Idle;
                ReadinessInput::Tick
            }
            Some(Err(e)) => {
                let reason = e.to_string();
                self.failure = Some(e);
                ReadinessInput::SourceFailed(reason)
            }
            None => {
                self.failure = Some(ClusterError::StreamClosed);
                ReadinessInput::StreamClosed
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.feed = Feed::Idle;
        match self.tracker.phase() {
            ReadinessPhase::Converged => Ok(()),
            phase => {
                tracing::warn!("{} watch failed: {:?}", self.source.kind(), phase);
                Err(self
                    .failure
                    .take()
                    .unwrap_or_else(|| ClusterError::Watch(format!("watch ended in {:?}", phase))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSource;
    use clusterdrive_core::Entity;

    fn entities(states: &[(&str, bool)]) -> Vec<Entity> {
        states.iter().map(|(n, r)| Entity::new(*n, *r)).collect()
    }

    fn request(min_ready: usize) -> ReadinessRequest {
        ReadinessRequest::new(min_ready, Duration::from_secs(30))
            .with_poll_interval(Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_snapshot_never_subscribes() {
        let source = MockSource::new(entities(&[("n1", true), ("n2", true), ("n3", false)]));
        let report = await_ready(&source, &request(2)).await.unwrap();
        assert_eq!(report.summary.ready, 2);
        assert_eq!(report.summary.target, 2);
        assert!(!report.subscribed);
        assert_eq!(source.watch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_event_for_another_node_converges() {
        let source = MockSource::new(entities(&[("n1", true), ("n2", false), ("n3", false)]));
        source.on_watch(vec![Change::Applied(Entity::new("n3", true))]);

        let report = await_ready(&source, &request(2)).await.unwrap();
        assert!(report.subscribed);
        assert_eq!(report.summary.ready, 2);
        assert_eq!(source.watched_from(), vec!["1"]);
        assert_eq!(source.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_set_with_all_threshold_converges() {
        let source = MockSource::new(Vec::new());
        let report = await_ready(&source, &request(0)).await.unwrap();
        assert_eq!(report.summary.total, 0);
        assert_eq!(source.watch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn min_ready_above_total_waits_for_all() {
        let source = MockSource::new(entities(&[("n1", true), ("n2", false)]));
        source.on_watch(vec![
            Change::Applied(Entity::new("n1", false)),
            Change::Applied(Entity::new("n1", true)),
            Change::Applied(Entity::new("n2", true)),
        ]);
        let report = await_ready(&source, &request(5)).await.unwrap();
        assert_eq!(report.summary.target, 2);
        assert_eq!(report.summary.ready, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_a_distinct_timeout_and_releases_the_watch() {
        let source = MockSource::new(entities(&[("n1", true), ("n2", false), ("n3", false)]));
        source.on_watch(vec![Change::Applied(Entity::new("n2", false))]);

        let start = Instant::now();
        let err = await_ready(&source, &request(3)).await.unwrap_err();
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert!(err.is_timeout());
        assert!(matches!(
            err,
            ClusterError::Timeout {
                ready: 1,
                total: 3,
                target: 3,
                ..
            }
        ));
        assert_eq!(source.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_fails_the_watch() {
        let source = MockSource::new(entities(&[("n1", false)]));
        source.on_watch_then_close(vec![Change::Deleted("n0".to_string())]);
        let err = await_ready(&source, &request(1)).await.unwrap_err();
        assert!(matches!(err, ClusterError::StreamClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_fails_the_watch() {
        let source = MockSource::new(entities(&[("n1", false)]));
        source.on_watch_then_fail(Vec::new(), "too many requests");
        let err = await_ready(&source, &request(1)).await.unwrap_err();
        assert!(err.to_string().contains("too many requests"));
        assert_eq!(source.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_watch_relists_and_resubscribes() {
        let source = MockSource::new(entities(&[("n1", false), ("n2", false)]));
        source.push_listing(entities(&[("n1", true), ("n2", false)]));
        source.on_watch(vec![Change::Expired]);
        source.on_watch(vec![Change::Applied(Entity::new("n2", true))]);

        let report = await_ready(&source, &request(2)).await.unwrap();
        assert_eq!(report.summary.ready, 2);
        assert_eq!(source.list_count(), 2);
        assert_eq!(source.watched_from(), vec!["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn server_ended_watch_resubscribes_until_ready() {
        let source = MockSource::new(entities(&[("n1", false)]));
        source.on_watch(vec![Change::Ended]);
        source.on_watch(vec![Change::Applied(Entity::new("n1", true))]);

        let req = ReadinessRequest::new(1, Duration::from_secs(600));
        let report = await_ready(&source, &req).await.unwrap();
        assert_eq!(report.summary.ready, 1);
        assert_eq!(source.watch_count(), 2);
        assert_eq!(source.list_count(), 2);
        assert_eq!(source.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_watch_falls_back_to_polling() {
        let source = MockSource::new(entities(&[("n1", true), ("n2", false)]));
        source.push_listing(entities(&[("n1", true), ("n2", false)]));
        source.push_listing(entities(&[("n1", true), ("n2", true)]));
        source.fail_watches(1);

        let start = Instant::now();
        let report = await_ready(&source, &request(2)).await.unwrap();
        assert!(!report.subscribed);
        assert_eq!(source.list_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cni_operator_exception_on_single_server() {
        let pods = entities(&[
            ("coredns-6799fbcd5-x2k9p", true),
            ("cilium-operator-5c9b8d-abcde", true),
            ("cilium-operator-5c9b8d-fghij", false),
        ]);
        let source = MockSource::new(pods.clone());
        let req = request(0).with_cni_rule(CniRule::new(1, 0));
        let report = await_ready(&source, &req).await.unwrap();
        assert_eq!(report.summary.ready, 3);
        assert!(!report.subscribed);

        // Multi-node topologies get no exception.
        let source = MockSource::new(pods);
        let req = ReadinessRequest::all(Duration::from_secs(5)).with_cni_rule(CniRule::new(3, 2));
        assert!(await_ready(&source, &req).await.unwrap_err().is_timeout());
    }

    #[test]
    fn report_serializes_flat() {
        let report = ReadinessReport {
            summary: ReadinessSummary {
                ready: 2,
                total: 3,
                target: 2,
            },
            elapsed: Duration::from_millis(1500),
            subscribed: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ready"], 2);
        assert_eq!(json["target"], 2);
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["subscribed"], true);
    }
}
