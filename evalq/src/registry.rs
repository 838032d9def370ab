//! Correlation registry - which operations are in flight, and how many.
//!
//! Operations are tracked by id only. Completions are counted leniently:
//! the host may echo ids we never started (retries, late messages from a
//! superseded batch) and may deliver completions in any order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bridge::protocol::OperationId;

/// Per-batch operation counters.
///
/// Invariant: `completed <= started <= queued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounters {
    pub queued: u64,
    pub started: u64,
    pub completed: u64,
}

impl OperationCounters {
    /// Started operations still waiting for a completion message.
    pub fn outstanding(&self) -> u64 {
        self.started.saturating_sub(self.completed)
    }

    pub fn is_settled(&self) -> bool {
        self.started == self.completed
    }

    pub fn holds_invariant(&self) -> bool {
        self.completed <= self.started && self.started <= self.queued
    }
}

impl std::fmt::Display for OperationCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "queued={} started={} completed={}",
            self.queued, self.started, self.completed
        )
    }
}

/// How an operation entered the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Through the serialized task queue.
    Queued,
    /// Submitted immediately, no admission control.
    Eager,
}

impl Admission {
    pub fn from_queued(queued: bool) -> Self {
        if queued { Self::Queued } else { Self::Eager }
    }

    pub fn is_queued(self) -> bool {
        self == Self::Queued
    }
}

/// Result of recording a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The id was in flight.
    Tracked(Admission),
    /// Unknown id (never started, already completed, or from an earlier batch).
    Stray,
}

#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    counters: OperationCounters,
    outstanding: BTreeMap<OperationId, Admission>,
    stray_completions: u64,
    /// Completions not counted because `completed` had already caught up with `started`.
    uncounted_completions: u64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; used at the start of each batch.
    pub fn reset(&mut self) {
        if !self.outstanding.is_empty() {
            tracing::debug!(
                outstanding = self.outstanding.len(),
                "Dropping outstanding operations on reset"
            );
        }
        *self = Self::default();
    }

    pub fn record_queued(&mut self) {
        self.counters.queued += 1;
    }

    pub fn record_started(&mut self, id: OperationId, admission: Admission) {
        debug_assert!(
            self.counters.started < self.counters.queued,
            "started would exceed queued"
        );
        self.counters.started += 1;
        if self.outstanding.insert(id, admission).is_some() {
            tracing::warn!(operation_id = %id, "Operation started twice");
        }
    }

    /// Count one completion message for `id`.
    ///
    /// Every message counts once, tracked or not, as long as `completed` stays
    /// at or below `started`.
    pub fn record_completed(&mut self, id: OperationId) -> Completion {
        let completion = match self.outstanding.remove(&id) {
            Some(admission) => Completion::Tracked(admission),
            None => {
                self.stray_completions += 1;
                tracing::warn!(operation_id = %id, "Completion for untracked operation");
                Completion::Stray
            }
        };

        if self.counters.completed < self.counters.started {
            self.counters.completed += 1;
        } else {
            self.uncounted_completions += 1;
            tracing::warn!(
                operation_id = %id,
                started = self.counters.started,
                "Completion beyond started count; not counted"
            );
        }

        completion
    }

    pub fn snapshot(&self) -> OperationCounters {
        self.counters
    }

    pub fn admission(&self, id: OperationId) -> Option<Admission> {
        self.outstanding.get(&id).copied()
    }

    pub fn is_outstanding(&self, id: OperationId) -> bool {
        self.outstanding.contains_key(&id)
    }

    /// In-flight ids in ascending order.
    pub fn outstanding_ids(&self) -> Vec<OperationId> {
        self.outstanding.keys().copied().collect()
    }

    pub fn stray_completions(&self) -> u64 {
        self.stray_completions
    }

    pub fn uncounted_completions(&self) -> u64 {
        self.uncounted_completions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(raw: u64) -> OperationId {
        OperationId::new(raw)
    }

    fn started(registry: &mut CorrelationRegistry, ids: &[u64]) {
        for &id in ids {
            registry.record_queued();
            registry.record_started(op(id), Admission::Eager);
        }
    }

    #[test]
    fn tracked_completion_removes_id() {
        let mut registry = CorrelationRegistry::new();
        registry.record_queued();
        registry.record_started(op(1), Admission::Queued);
        assert_eq!(registry.admission(op(1)), Some(Admission::Queued));

        assert_eq!(
            registry.record_completed(op(1)),
            Completion::Tracked(Admission::Queued)
        );
        assert!(!registry.is_outstanding(op(1)));
        assert_eq!(
            registry.snapshot(),
            OperationCounters {
                queued: 1,
                started: 1,
                completed: 1
            }
        );
    }

    #[test]
    fn out_of_order_completions_all_count() {
        let mut registry = CorrelationRegistry::new();
        started(&mut registry, &[1, 2, 3, 4]);

        for id in [3, 1, 4, 2] {
            assert!(matches!(
                registry.record_completed(op(id)),
                Completion::Tracked(_)
            ));
            assert!(registry.snapshot().holds_invariant());
        }
        assert!(registry.snapshot().is_settled());
        assert!(registry.outstanding_ids().is_empty());
    }

    #[test]
    fn stray_completion_counts_while_work_is_outstanding() {
        let mut registry = CorrelationRegistry::new();
        started(&mut registry, &[1, 2]);

        assert_eq!(registry.record_completed(op(99)), Completion::Stray);
        assert_eq!(registry.snapshot().completed, 1);
        assert_eq!(registry.stray_completions(), 1);
        assert_eq!(registry.outstanding_ids(), vec![op(1), op(2)]);
    }

    #[test]
    fn completion_never_exceeds_started() {
        let mut registry = CorrelationRegistry::new();
        started(&mut registry, &[1]);

        registry.record_completed(op(1));
        assert_eq!(registry.record_completed(op(1)), Completion::Stray);
        registry.record_completed(op(42));

        let counters = registry.snapshot();
        assert_eq!(counters.completed, 1);
        assert!(counters.holds_invariant());
        assert_eq!(registry.stray_completions(), 2);
        assert_eq!(registry.uncounted_completions(), 2);
    }

    #[test]
    fn reset_clears_counters_and_ids() {
        let mut registry = CorrelationRegistry::new();
        started(&mut registry, &[1, 2]);
        registry.record_completed(op(7));

        registry.reset();
        assert_eq!(registry.snapshot(), OperationCounters::default());
        assert!(registry.outstanding_ids().is_empty());
        assert_eq!(registry.stray_completions(), 0);
    }

    #[test]
    fn counters_display() {
        let counters = OperationCounters {
            queued: 3,
            started: 2,
            completed: 1,
        };
        assert_eq!(counters.to_string(), "queued=3 started=2 completed=1");
        assert_eq!(counters.outstanding(), 1);
    }

    #[test]
    fn outstanding_saturates_on_inconsistent_counters() {
        let counters: OperationCounters =
            serde_json::from_str(r#"{"queued":1,"started":1,"completed":4}"#).unwrap();
        assert_eq!(counters.outstanding(), 0);
        assert!(!counters.holds_invariant());
    }
}
