//! Readiness convergence state machine for nodes and pods.
//!
//! This module is a pure state machine: it takes inputs (a snapshot, a
//! change event, a tick, the deadline) and returns the directive the driver
//! should carry out next. Listing, watching and timing are done by
//! `clusterdrive-cluster`, which keeps this logic testable without a cluster.
//!
//! ```text
//! Counting --snapshot meets threshold--> Converged
//! Counting --snapshot short-----------> Watching
//! Watching --event/snapshot meets-----> Converged
//! Counting|Watching --deadline--------> TimedOut
//! Counting|Watching --stream closed---> Failed
//! ```

use serde::Serialize;
use std::collections::HashMap;

/// Prefix of the CNI operator pods that may stay pending on a single node.
pub const DEFAULT_CNI_OPERATOR_PREFIX: &str = "cilium-operator";

/// One observed node or pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Object name.
    pub name: String,
    /// Whether it currently counts as ready.
    pub ready: bool,
}

impl Entity {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, ready: bool) -> Self {
        Self {
            name: name.into(),
            ready,
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessInput {
    /// Full listing (initial, or a re-list while polling).
    Snapshot(Vec<Entity>),
    /// An entity was added or modified.
    Applied(Entity),
    /// An entity was removed.
    Deleted(String),
    /// A poll interval elapsed.
    Tick,
    /// The deadline elapsed.
    Deadline,
    /// The event stream ended on its own.
    StreamClosed,
    /// The source reported an unrecoverable error.
    SourceFailed(String),
}

/// Where the watch currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessPhase {
    /// Waiting for the initial snapshot.
    Counting,
    /// Below threshold, consuming events.
    Watching,
    /// Threshold met.
    Converged,
    /// Deadline elapsed first.
    TimedOut,
    /// Source failed or the stream closed.
    Failed(String),
}

impl ReadinessPhase {
    /// Whether no further input changes the phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReadinessPhase::Converged | ReadinessPhase::TimedOut | ReadinessPhase::Failed(_)
        )
    }
}

/// What the driver should do after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Open the event subscription.
    Subscribe,
    /// List the entities again and feed a snapshot.
    Relist,
    /// Stop; the phase is terminal.
    Finish,
}

/// How many ready entities are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "count")]
pub enum Threshold {
    /// Every entity currently present.
    All,
    /// A fixed minimum.
    AtLeast(usize),
}

/// Single-node exception for CNI operator pods.
///
/// On a 1-server/0-agent topology the operator's extra replicas cannot be
/// scheduled, so once one instance is ready the rest count as ready too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CniRule {
    /// Pod name prefix identifying the operator.
    pub pod_prefix: String,
    /// Server nodes in the cluster.
    pub servers: usize,
    /// Agent nodes in the cluster.
    pub agents: usize,
}

impl CniRule {
    /// Rule for the default operator prefix.
    pub fn new(servers: usize, agents: usize) -> Self {
        Self {
            pod_prefix: DEFAULT_CNI_OPERATOR_PREFIX.to_string(),
            servers,
            agents,
        }
    }

    /// Whether the topology allows the exception at all.
    pub fn applies(&self) -> bool {
        self.servers == 1 && self.agents == 0
    }

    fn matches(&self, name: &str) -> bool {
        !self.pod_prefix.is_empty() && name.starts_with(&self.pod_prefix)
    }
}

/// Running tally of operator pods for one watch invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CniTally {
    ready: usize,
    total: usize,
}

impl CniTally {
    fn contribution(&self, applies: bool) -> usize {
        match (applies, self.ready) {
            (_, 0) => 0,
            (true, _) => self.total,
            (false, n) => n,
        }
    }
}

/// Counts reported back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessSummary {
    /// Entities counted as ready.
    pub ready: usize,
    /// Entities observed.
    pub total: usize,
    /// Ready count required.
    pub target: usize,
}

/// State of a single readiness watch.
///
/// Counters move by one per transition, so each event costs O(1).
#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    phase: ReadinessPhase,
    min_ready: usize,
    threshold: Threshold,
    entities: HashMap<String, bool>,
    ready: usize,
    cni: Option<(CniRule, CniTally)>,
}

impl ReadinessTracker {
    /// Create a tracker requiring `min_ready` entities. Zero means all.
    pub fn new(min_ready: usize) -> Self {
        Self {
            phase: ReadinessPhase::Counting,
            min_ready,
            threshold: Threshold::All,
            entities: HashMap::new(),
            ready: 0,
            cni: None,
        }
    }

    /// Builder: apply the CNI operator exception.
    pub fn with_cni_rule(mut self, rule: CniRule) -> Self {
        self.cni = Some((rule, CniTally::default()));
        self
    }

    /// Current phase.
    pub fn phase(&self) -> &ReadinessPhase {
        &self.phase
    }

    /// Threshold chosen at snapshot time.
    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Entities counted as ready, including the CNI exception.
    pub fn ready_count(&self) -> usize {
        let cni = self
            .cni
            .as_ref()
            .map(|(rule, tally)| tally.contribution(rule.applies()))
            .unwrap_or(0);
        self.ready + cni
    }

    /// Entities observed.
    pub fn total(&self) -> usize {
        self.entities.len()
    }

    /// Ready count required right now.
    pub fn target(&self) -> usize {
        match self.threshold {
            Threshold::All => self.total(),
            Threshold::AtLeast(n) => n,
        }
    }

    /// Snapshot of the counters.
    pub fn summary(&self) -> ReadinessSummary {
        ReadinessSummary {
            ready: self.ready_count(),
            total: self.total(),
            target: self.target(),
        }
    }

    /// The single transition function.
    pub fn on_input(&mut self, input: ReadinessInput) -> Option<Directive> {
        if self.phase.is_terminal() {
            return None;
        }
        let counting = self.phase == ReadinessPhase::Counting;

        match input {
            ReadinessInput::Snapshot(entities) => {
                self.load(entities);
                if counting {
                    let total = self.total();
                    self.threshold = if self.min_ready == 0 || self.min_ready > total {
                        Threshold::All
                    } else {
                        Threshold::AtLeast(self.min_ready)
                    };
                }
                self.settle()
            }
            ReadinessInput::Applied(entity) if !counting => {
                self.set(entity.name, Some(entity.ready));
                self.settle()
            }
            ReadinessInput::Deleted(name) if !counting => {
                self.set(name, None);
                self.settle()
            }
            ReadinessInput::Applied(_) | ReadinessInput::Deleted(_) => None,
            ReadinessInput::Tick => Some(Directive::Relist),
            ReadinessInput::Deadline => {
                self.phase = ReadinessPhase::TimedOut;
                Some(Directive::Finish)
            }
            ReadinessInput::StreamClosed => {
                self.phase = ReadinessPhase::Failed("event stream closed".to_string());
                Some(Directive::Finish)
            }
            ReadinessInput::SourceFailed(reason) => {
                self.phase = ReadinessPhase::Failed(reason);
                Some(Directive::Finish)
            }
        }
    }

    fn settle(&mut self) -> Option<Directive> {
        if self.ready_count() >= self.target() {
            self.phase = ReadinessPhase::Converged;
            return Some(Directive::Finish);
        }
        if self.phase == ReadinessPhase::Counting {
            self.phase = ReadinessPhase::Watching;
            return Some(Directive::Subscribe);
        }
        None
    }

    fn load(&mut self, entities: Vec<Entity>) {
        self.entities.clear();
        self.ready = 0;
        if let Some((_, tally)) = self.cni.as_mut() {
            *tally = CniTally::default();
        }
        for entity in entities {
            self.set(entity.name, Some(entity.ready));
        }
    }

    /// Record a new readiness (or removal, for `None`) and move the counters
    /// by the difference.
    fn set(&mut self, name: String, ready: Option<bool>) {
        let is_cni = self
            .cni
            .as_ref()
            .is_some_and(|(rule, _)| rule.matches(&name));

        let previous = match ready {
            Some(r) => self.entities.insert(name, r),
            None => self.entities.remove(&name),
        };

        let was_ready = usize::from(previous == Some(true));
        let now_ready = usize::from(ready == Some(true));

        if is_cni {
            if let Some((_, tally)) = self.cni.as_mut() {
                tally.ready = tally.ready + now_ready - was_ready;
                match (previous.is_some(), ready.is_some()) {
                    (false, true) => tally.total += 1,
                    (true, false) => tally.total -= 1,
                    _ => {}
                }
            }
        } else {
            self.ready = self.ready + now_ready - was_ready;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(states: &[(&str, bool)]) -> Vec<Entity> {
        states.iter().map(|(n, r)| Entity::new(*n, *r)).collect()
    }

    #[test]
    fn snapshot_meeting_threshold_converges_without_subscribing() {
        let mut t = ReadinessTracker::new(2);
        let d = t.on_input(ReadinessInput::Snapshot(nodes(&[
            ("n1", true),
            ("n2", true),
            ("n3", false),
        ])));
        assert_eq!(d, Some(Directive::Finish));
        assert_eq!(t.phase(), &ReadinessPhase::Converged);
        assert_eq!(t.threshold(), Threshold::AtLeast(2));
    }

    #[test]
    fn ready_event_for_another_node_converges() {
        let mut t = ReadinessTracker::new(2);
        let d = t.on_input(ReadinessInput::Snapshot(nodes(&[
            ("n1", true),
            ("n2", false),
            ("n3", false),
        ])));
        assert_eq!(d, Some(Directive::Subscribe));
        assert_eq!(t.phase(), &ReadinessPhase::Watching);

        let d = t.on_input(ReadinessInput::Applied(Entity::new("n3", true)));
        assert_eq!(d, Some(Directive::Finish));
        assert_eq!(t.phase(), &ReadinessPhase::Converged);
        assert_eq!(t.ready_count(), 2);
    }

    #[test]
    fn repeated_ready_events_do_not_double_count() {
        let mut t = ReadinessTracker::new(3);
        t.on_input(ReadinessInput::Snapshot(nodes(&[
            ("n1", true),
            ("n2", false),
            ("n3", false),
        ])));
        t.on_input(ReadinessInput::Applied(Entity::new("n1", true)));
        t.on_input(ReadinessInput::Applied(Entity::new("n1", true)));
        assert_eq!(t.ready_count(), 1);
        assert_eq!(t.phase(), &ReadinessPhase::Watching);
    }

    #[test]
    fn unready_transition_decrements() {
        let mut t = ReadinessTracker::new(0);
        t.on_input(ReadinessInput::Snapshot(nodes(&[("n1", true), ("n2", false)])));
        t.on_input(ReadinessInput::Applied(Entity::new("n1", false)));
        assert_eq!(t.ready_count(), 0);
        t.on_input(ReadinessInput::Applied(Entity::new("n2", true)));
        assert_eq!(t.ready_count(), 1);
        assert_eq!(t.phase(), &ReadinessPhase::Watching);
    }

    #[test]
    fn zero_or_oversized_minimum_means_all() {
        let mut t = ReadinessTracker::new(0);
        t.on_input(ReadinessInput::Snapshot(nodes(&[("a", true), ("b", false)])));
        assert_eq!(t.threshold(), Threshold::All);
        assert_eq!(t.target(), 2);

        let mut t = ReadinessTracker::new(9);
        t.on_input(ReadinessInput::Snapshot(nodes(&[("a", true), ("b", false)])));
        assert_eq!(t.threshold(), Threshold::All);
    }

    #[test]
    fn deleting_the_last_pending_entity_converges_all_threshold() {
        let mut t = ReadinessTracker::new(0);
        t.on_input(ReadinessInput::Snapshot(nodes(&[("a", true), ("b", false)])));
        let d = t.on_input(ReadinessInput::Deleted("b".into()));
        assert_eq!(d, Some(Directive::Finish));
        assert_eq!(t.summary(), ReadinessSummary { ready: 1, total: 1, target: 1 });
    }

    #[test]
    fn deadline_and_stream_close_are_terminal() {
        let mut t = ReadinessTracker::new(1);
        t.on_input(ReadinessInput::Snapshot(nodes(&[("a", false)])));
        assert_eq!(t.on_input(ReadinessInput::Deadline), Some(Directive::Finish));
        assert_eq!(t.phase(), &ReadinessPhase::TimedOut);
        // Terminal: later events are ignored.
        assert_eq!(t.on_input(ReadinessInput::Applied(Entity::new("a", true))), None);

        let mut t = ReadinessTracker::new(1);
        t.on_input(ReadinessInput::Snapshot(nodes(&[("a", false)])));
        t.on_input(ReadinessInput::StreamClosed);
        assert!(matches!(t.phase(), ReadinessPhase::Failed(_)));
    }

    #[test]
    fn events_before_snapshot_are_ignored_and_tick_requests_relist() {
        let mut t = ReadinessTracker::new(1);
        assert_eq!(t.on_input(ReadinessInput::Applied(Entity::new("a", true))), None);
        assert_eq!(t.total(), 0);
        assert_eq!(t.on_input(ReadinessInput::Tick), Some(Directive::Relist));
    }

    #[test]
    fn relist_snapshot_while_watching_recounts() {
        let mut t = ReadinessTracker::new(2);
        t.on_input(ReadinessInput::Snapshot(nodes(&[("a", false), ("b", false), ("c", false)])));
        let d = t.on_input(ReadinessInput::Snapshot(nodes(&[
            ("a", true),
            ("b", true),
            ("c", false),
        ])));
        assert_eq!(d, Some(Directive::Finish));
        assert_eq!(t.threshold(), Threshold::AtLeast(2));
    }

    #[test]
    fn cni_operator_single_node_one_ready_is_enough() {
        let mut t = ReadinessTracker::new(0).with_cni_rule(CniRule::new(1, 0));
        let d = t.on_input(ReadinessInput::Snapshot(nodes(&[
            ("coredns-abc", true),
            ("cilium-operator-1", false),
            ("cilium-operator-2", false),
        ])));
        assert_eq!(d, Some(Directive::Subscribe));
        assert_eq!(t.ready_count(), 1);

        let d = t.on_input(ReadinessInput::Applied(Entity::new("cilium-operator-1", true)));
        assert_eq!(d, Some(Directive::Finish));
        assert_eq!(t.ready_count(), 3);
    }

    #[test]
    fn cni_exception_needs_single_node_topology() {
        let mut t = ReadinessTracker::new(0).with_cni_rule(CniRule::new(1, 2));
        t.on_input(ReadinessInput::Snapshot(nodes(&[
            ("cilium-operator-1", true),
            ("cilium-operator-2", false),
        ])));
        assert_eq!(t.ready_count(), 1);
        assert_eq!(t.phase(), &ReadinessPhase::Watching);
    }

    #[test]
    fn cni_tally_is_per_tracker() {
        let mut first = ReadinessTracker::new(0).with_cni_rule(CniRule::new(1, 0));
        first.on_input(ReadinessInput::Snapshot(nodes(&[("cilium-operator-1", true)])));
        let mut second = ReadinessTracker::new(0).with_cni_rule(CniRule::new(1, 0));
        second.on_input(ReadinessInput::Snapshot(nodes(&[("cilium-operator-1", false)])));
        assert_eq!(first.ready_count(), 1);
        assert_eq!(second.ready_count(), 0);
    }
}
