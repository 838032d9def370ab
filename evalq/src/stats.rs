//! Diagnostics snapshot.

use serde::Serialize;

use crate::bridge::protocol::{BatchId, OperationId};
use crate::registry::OperationCounters;
use crate::session::BatchMode;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<BatchMode>,
    pub counters: OperationCounters,
    /// Descriptors still waiting in the task queue.
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<OperationId>,
    pub outstanding: Vec<OperationId>,
    pub drained: bool,
    pub dispatch_errors: u64,
    pub stray_completions: u64,
    pub uncounted_completions: u64,
    pub pings_sent: u64,
    pub probing: bool,
}

impl SessionStats {
    pub fn with_probe(mut self, pings_sent: u64, probing: bool) -> Self {
        self.pings_sent = pings_sent;
        self.probing = probing;
        self
    }

    /// Log the snapshot at info level.
    pub fn print(&self) {
        tracing::info!(
            batch_id = ?self.batch_id,
            queued = self.counters.queued,
            started = self.counters.started,
            completed = self.counters.completed,
            pending = self.pending,
            dispatch_errors = self.dispatch_errors,
            stray_completions = self.stray_completions,
            pings_sent = self.pings_sent,
            "Operation stats"
        );
    }
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.batch_id, &self.mode) {
            (Some(id), Some(mode)) => writeln!(f, "batch {id} ({mode})")?,
            _ => writeln!(f, "no batch")?,
        }
        writeln!(f, "operations queued: {}", self.counters.queued)?;
        writeln!(f, "operations started: {}", self.counters.started)?;
        writeln!(f, "operations completed: {}", self.counters.completed)?;
        writeln!(f, "pending in queue: {}", self.pending)?;
        if !self.outstanding.is_empty() {
            let ids: Vec<String> = self.outstanding.iter().map(|id| id.to_string()).collect();
            writeln!(f, "outstanding: {}", ids.join(", "))?;
        }
        writeln!(f, "dispatch errors: {}", self.dispatch_errors)?;
        writeln!(f, "stray completions: {}", self.stray_completions)?;
        write!(f, "pings sent: {}", self.pings_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_counters_and_outstanding() {
        let stats = SessionStats {
            counters: OperationCounters {
                queued: 3,
                started: 2,
                completed: 1,
            },
            outstanding: vec![OperationId::new(2)],
            pending: 1,
            ..SessionStats::default()
        };
        let text = stats.to_string();
        assert!(text.starts_with("no batch\n"));
        assert!(text.contains("operations started: 2"));
        assert!(text.contains("outstanding: 2\n"));
        assert!(text.ends_with("pings sent: 0"));
    }

    #[test]
    fn serializes_without_empty_batch_fields() {
        let value = serde_json::to_value(SessionStats::default()).unwrap();
        assert!(value.get("batch_id").is_none());
        assert_eq!(value["counters"]["started"], 0);
        assert_eq!(value["outstanding"], serde_json::json!([]));
    }
}
