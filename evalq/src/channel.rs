//! Submission channel.
//!
//! `submit` hands a call to the host and returns at once. The host's
//! evaluation result comes back later as a [`DispatchAck`] on the event loop,
//! exactly once per submission.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bridge::protocol::HostCall;
use crate::host::{DispatchError, ScriptHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmissionId(u64);

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Dispatch acknowledgement. Says nothing about whether the work finished.
#[derive(Debug, Clone)]
pub struct DispatchAck {
    pub submission: SubmissionId,
    pub call: HostCall,
    pub result: Result<serde_json::Value, DispatchError>,
}

pub struct SubmissionChannel {
    host: Arc<dyn ScriptHost>,
    ack_tx: mpsc::UnboundedSender<DispatchAck>,
    last_submission: u64,
}

impl SubmissionChannel {
    pub fn new(host: Arc<dyn ScriptHost>, ack_tx: mpsc::UnboundedSender<DispatchAck>) -> Self {
        Self {
            host,
            ack_tx,
            last_submission: 0,
        }
    }

    pub fn submit(&mut self, call: HostCall) -> SubmissionId {
        self.last_submission += 1;
        let submission = SubmissionId(self.last_submission);
        let script = call.to_script();
        tracing::trace!(%submission, %script, "Submitting script");

        let host = Arc::clone(&self.host);
        let ack_tx = self.ack_tx.clone();
        tokio::spawn(async move {
            let result = host.evaluate(script).await;
            let ack = DispatchAck {
                submission,
                call,
                result,
            };
            if ack_tx.send(ack).is_err() {
                tracing::trace!(%submission, "Dispatch ack dropped; event loop gone");
            }
        });

        submission
    }

    pub fn submit_all(&mut self, calls: impl IntoIterator<Item = HostCall>) {
        for call in calls {
            self.submit(call);
        }
    }

    pub fn submitted(&self) -> u64 {
        self.last_submission
    }
}
