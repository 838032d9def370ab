//! Session - the single owner of protocol state.
//!
//! Holds the correlation registry, the task queue and the active batch.
//! Nothing here performs I/O: operations return the [`HostCall`]s the caller
//! must submit, which keeps every transition callable from one event loop
//! (and from plain unit tests).

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::bridge::protocol::{BatchId, HostCall, OperationId};
use crate::host::DispatchError;
use crate::queue::{TaskDescriptor, TaskQueue};
use crate::registry::{Admission, Completion, CorrelationRegistry, OperationCounters};
use crate::stats::SessionStats;

/// Invoked once when a batch drains.
pub type BatchCallback = Box<dyn FnOnce(BatchReport) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchMode {
    /// Every task submitted at once.
    Unqueued,
    /// Tasks admitted one at a time, each after the previous completion.
    Queued,
    /// Eager tasks, each fanning out `fanout` more once its dispatch is acknowledged.
    Interleaved { fanout: usize },
}

impl std::fmt::Display for BatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unqueued => f.write_str("unqueued"),
            Self::Queued => f.write_str("queued"),
            Self::Interleaved { fanout } => write!(f, "interleaved x{fanout}"),
        }
    }
}

/// Summary handed to the batch callback.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub mode: BatchMode,
    pub counters: OperationCounters,
    /// When the batch started (RFC 3339).
    pub started_at: String,
    /// When the batch drained (RFC 3339).
    pub completed_at: String,
    pub elapsed_secs: f64,
}

struct ActiveBatch {
    id: BatchId,
    mode: BatchMode,
    started: Instant,
    started_at: String,
    on_complete: Option<BatchCallback>,
    /// Interleaved primaries whose dispatch acknowledgement is still due.
    awaiting_fanout: BTreeSet<OperationId>,
    drained: bool,
}

#[derive(Default)]
pub struct Session {
    registry: CorrelationRegistry,
    queue: TaskQueue,
    batch: Option<ActiveBatch>,
    last_operation: u64,
    dispatch_errors: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit `count` tasks at once.
    pub fn start_unqueued_batch(
        &mut self,
        count: usize,
        on_complete: Option<BatchCallback>,
    ) -> (BatchId, Vec<HostCall>) {
        self.start_batch(BatchMode::Unqueued, count, on_complete)
    }

    /// Enqueue `count` tasks and admit the first.
    pub fn start_queued_batch(
        &mut self,
        count: usize,
        on_complete: Option<BatchCallback>,
    ) -> (BatchId, Vec<HostCall>) {
        self.start_batch(BatchMode::Queued, count, on_complete)
    }

    /// Reset counters and queue, then start a batch of `count` tasks.
    ///
    /// Any batch still running is superseded: its callback is dropped without
    /// being invoked and its late completions will be treated as stray.
    pub fn start_batch(
        &mut self,
        mode: BatchMode,
        count: usize,
        on_complete: Option<BatchCallback>,
    ) -> (BatchId, Vec<HostCall>) {
        self.supersede();

        let id = BatchId::new();
        let mut awaiting_fanout = BTreeSet::new();
        let mut calls = Vec::new();

        match mode {
            BatchMode::Queued => {
                for _ in 0..count {
                    let descriptor = TaskDescriptor::queued(self.next_operation());
                    self.queue.enqueue(descriptor, &mut self.registry);
                }
                calls.extend(self.queue.admit_next(&mut self.registry));
            }
            BatchMode::Unqueued => {
                for _ in 0..count {
                    calls.push(self.start_eager().start_call());
                }
            }
            BatchMode::Interleaved { fanout } => {
                for _ in 0..count {
                    let descriptor = self.start_eager();
                    if fanout > 0 {
                        awaiting_fanout.insert(descriptor.operation_id);
                    }
                    calls.push(descriptor.start_call());
                }
            }
        }

        tracing::info!(batch_id = %id, %mode, count, "Batch started");
        self.batch = Some(ActiveBatch {
            id,
            mode,
            started: Instant::now(),
            started_at: chrono::Utc::now().to_rfc3339(),
            on_complete,
            awaiting_fanout,
            drained: false,
        });
        self.finish_if_drained();

        (id, calls)
    }

    /// Admit the next queued task, if any. No-op on an empty queue.
    pub fn admit_next(&mut self) -> Option<HostCall> {
        self.queue.admit_next(&mut self.registry)
    }

    /// Record a completion message and, for queued work, admit the next task.
    ///
    /// `queued` is the flag carried by the message; when absent, the
    /// admission recorded for `id` decides.
    pub fn complete(&mut self, id: OperationId, queued: Option<bool>) -> Option<HostCall> {
        let queued =
            queued.unwrap_or_else(|| self.registry.admission(id).is_some_and(Admission::is_queued));

        if let Completion::Tracked(admission) = self.registry.record_completed(id) {
            tracing::debug!(
                operation_id = %id,
                ?admission,
                counters = %self.registry.snapshot(),
                "Operation completed"
            );
        }

        if !queued {
            return None;
        }
        self.queue.settle();
        self.admit_next()
    }

    /// Handle the host's acknowledgement of a submitted call.
    ///
    /// A failed dispatch is logged and counted only: the operation stays
    /// outstanding and the queue does not move. Returns fan-out calls for
    /// interleaved batches.
    pub fn on_dispatch_ack(
        &mut self,
        call: &HostCall,
        result: &Result<serde_json::Value, DispatchError>,
    ) -> Vec<HostCall> {
        match result {
            Ok(_) => tracing::trace!(kind = call.kind(), "Dispatch acknowledged"),
            Err(e) => {
                self.dispatch_errors += 1;
                tracing::warn!(
                    kind = call.kind(),
                    operation_id = ?call.operation_id(),
                    error = %e,
                    "Dispatch failed; operation stays outstanding"
                );
            }
        }

        let HostCall::StartProcess { id, .. } = *call else {
            return Vec::new();
        };
        let Some(batch) = self.batch.as_mut() else {
            return Vec::new();
        };
        if !batch.awaiting_fanout.remove(&id) {
            return Vec::new();
        }
        let fanout = match batch.mode {
            BatchMode::Interleaved { fanout } => fanout,
            _ => 0,
        };
        if result.is_err() {
            tracing::warn!(operation_id = %id, fanout, "Fan-out cancelled after failed dispatch");
            return Vec::new();
        }

        tracing::debug!(operation_id = %id, fanout, "Fanning out interleaved operations");
        (0..fanout).map(|_| self.start_eager().start_call()).collect()
    }

    /// Fire the batch callback if the batch has just drained.
    ///
    /// The callback is taken before it runs, so it fires at most once per batch.
    pub fn finish_if_drained(&mut self) -> bool {
        if !self.is_drained() {
            return false;
        }
        let counters = self.registry.snapshot();
        let Some(batch) = self.batch.as_mut() else {
            return false;
        };
        if batch.drained {
            return false;
        }
        batch.drained = true;

        let report = BatchReport {
            batch_id: batch.id,
            mode: batch.mode,
            counters,
            started_at: batch.started_at.clone(),
            completed_at: chrono::Utc::now().to_rfc3339(),
            elapsed_secs: batch.started.elapsed().as_secs_f64(),
        };
        tracing::info!(
            batch_id = %batch.id,
            %counters,
            elapsed_secs = report.elapsed_secs,
            "Batch drained"
        );
        if let Some(callback) = batch.on_complete.take() {
            callback(report);
        }
        true
    }

    /// `started == completed`, nothing queued, no fan-out due.
    pub fn is_drained(&self) -> bool {
        let Some(batch) = self.batch.as_ref() else {
            return false;
        };
        self.registry.snapshot().is_settled()
            && self.queue.is_empty()
            && batch.awaiting_fanout.is_empty()
    }

    pub fn counters(&self) -> OperationCounters {
        self.registry.snapshot()
    }

    pub fn admission(&self, id: OperationId) -> Option<Admission> {
        self.registry.admission(id)
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch.as_ref().map(|b| b.id)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            batch_id: self.batch.as_ref().map(|b| b.id),
            mode: self.batch.as_ref().map(|b| b.mode),
            counters: self.registry.snapshot(),
            pending: self.queue.len(),
            in_flight: self.queue.in_flight(),
            outstanding: self.registry.outstanding_ids(),
            drained: self.batch.as_ref().is_some_and(|b| b.drained),
            dispatch_errors: self.dispatch_errors,
            stray_completions: self.registry.stray_completions(),
            uncounted_completions: self.registry.uncounted_completions(),
            pings_sent: 0,
            probing: false,
        }
    }

    /// Log and return the current stats.
    pub fn print_stats(&self) -> SessionStats {
        let stats = self.stats();
        stats.print();
        stats
    }

    fn start_eager(&mut self) -> TaskDescriptor {
        let descriptor = TaskDescriptor::eager(self.next_operation());
        self.registry.record_queued();
        self.registry
            .record_started(descriptor.operation_id, descriptor.admission());
        descriptor
    }

    fn next_operation(&mut self) -> OperationId {
        self.last_operation += 1;
        OperationId::new(self.last_operation)
    }

    fn supersede(&mut self) {
        if let Some(batch) = self.batch.take()
            && !batch.drained
        {
            tracing::warn!(
                batch_id = %batch.id,
                counters = %self.registry.snapshot(),
                pending = self.queue.len(),
                "Superseding batch before it drained"
            );
        }
        self.registry.reset();
        self.queue.clear();
        self.dispatch_errors = 0;
    }
}
