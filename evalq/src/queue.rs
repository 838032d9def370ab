//! Serialized task queue.
//!
//! Descriptors wait here until admitted. Admission happens once when a queued
//! batch starts and then once per queued completion, so at most one queued
//! operation is in flight at any time.

use std::collections::VecDeque;

use crate::bridge::protocol::{HostCall, OperationId};
use crate::registry::{Admission, CorrelationRegistry};

/// A unit of work requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub operation_id: OperationId,
    /// Admitted through this queue (true) or submitted eagerly (false).
    pub queued: bool,
}

impl TaskDescriptor {
    pub fn queued(operation_id: OperationId) -> Self {
        Self {
            operation_id,
            queued: true,
        }
    }

    pub fn eager(operation_id: OperationId) -> Self {
        Self {
            operation_id,
            queued: false,
        }
    }

    pub fn admission(&self) -> Admission {
        Admission::from_queued(self.queued)
    }

    pub fn start_call(&self) -> HostCall {
        HostCall::StartProcess {
            id: self.operation_id,
            queued: self.queued,
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: VecDeque<TaskDescriptor>,
    in_flight: Option<OperationId>,
    admitted: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `descriptor` and count it as queued in `registry`.
    pub fn enqueue(&mut self, descriptor: TaskDescriptor, registry: &mut CorrelationRegistry) {
        registry.record_queued();
        self.pending.push_back(descriptor);
    }

    /// Take the head descriptor and return the call that starts it.
    ///
    /// Counts the admission as started in `registry`. An empty queue is a
    /// no-op and touches nothing.
    pub fn admit_next(&mut self, registry: &mut CorrelationRegistry) -> Option<HostCall> {
        let descriptor = self.pending.pop_front()?;

        if let Some(previous) = self.in_flight {
            tracing::warn!(
                operation_id = %descriptor.operation_id,
                %previous,
                "Admitting while a queued operation is still in flight"
            );
        }

        registry.record_started(descriptor.operation_id, descriptor.admission());
        self.in_flight = Some(descriptor.operation_id);
        self.admitted += 1;

        tracing::debug!(
            operation_id = %descriptor.operation_id,
            remaining = self.pending.len(),
            "Admitted queued operation"
        );
        Some(descriptor.start_call())
    }

    /// The in-flight queued operation has finished.
    pub fn settle(&mut self) -> Option<OperationId> {
        self.in_flight.take()
    }

    /// Drop all pending descriptors, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.in_flight = None;
        self.admitted = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight(&self) -> Option<OperationId> {
        self.in_flight
    }

    /// Admissions since the last `clear`.
    pub fn admitted(&self) -> u64 {
        self.admitted
    }
}
