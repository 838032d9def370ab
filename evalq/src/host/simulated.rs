//! In-process host modelling a script that does its work out-of-band.
//!
//! Each step of a process returns from `evaluate` immediately and posts its
//! follow-up message after a delay:
//!
//! ```text
//! someLongRunningProcess(id, q)     -> { dataRequestProcessId: id, queued: q }
//! continueLongRunningProcess(id, q) -> { networkRequestProcessId: id }
//! finishLongRunningProcess(id)      -> { completedProcessId: id, queued: q }
//! ping(id)                          -> { pongId: id }   (no delay)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{DispatchError, InboundBody, ScriptHost};
use crate::bridge::protocol::{HostCall, InboundMessage, OperationId};

#[derive(Debug, Clone)]
pub struct SimulatedHostConfig {
    /// Delay between a call and the message it provokes.
    pub step_delay: Duration,
    /// Per-operation override of `step_delay`, used to reorder completions.
    pub delays: HashMap<OperationId, Duration>,
    /// Operations whose start call fails to evaluate.
    pub reject: HashSet<OperationId>,
    /// Operations that never post their completion.
    pub stall: HashSet<OperationId>,
    /// Operations whose completion is posted twice.
    pub duplicate: HashSet<OperationId>,
    pub inbound_buffer: usize,
}

impl Default for SimulatedHostConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(50),
            delays: HashMap::new(),
            reject: HashSet::new(),
            stall: HashSet::new(),
            duplicate: HashSet::new(),
            inbound_buffer: 256,
        }
    }
}

impl SimulatedHostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_delay(mut self, id: OperationId, delay: Duration) -> Self {
        self.delays.insert(id, delay);
        self
    }

    pub fn with_rejected(mut self, id: OperationId) -> Self {
        self.reject.insert(id);
        self
    }

    pub fn with_stalled(mut self, id: OperationId) -> Self {
        self.stall.insert(id);
        self
    }

    pub fn with_duplicated(mut self, id: OperationId) -> Self {
        self.duplicate.insert(id);
        self
    }

    pub fn with_inbound_buffer(mut self, n: usize) -> Self {
        self.inbound_buffer = n.max(1);
        self
    }

    fn delay_for(&self, id: OperationId) -> Duration {
        self.delays.get(&id).copied().unwrap_or(self.step_delay)
    }
}

pub struct SimulatedHost {
    config: SimulatedHostConfig,
    outbox: mpsc::Sender<InboundBody>,
    /// Live processes and the queued flag they were started with.
    processes: StdMutex<HashMap<OperationId, bool>>,
    history: StdMutex<Vec<HostCall>>,
}

/// Create a simulated host and the inbound channel it posts to.
pub fn simulated_host(config: SimulatedHostConfig) -> (Arc<SimulatedHost>, mpsc::Receiver<InboundBody>) {
    let (tx, rx) = mpsc::channel(config.inbound_buffer.max(1));
    let host = SimulatedHost {
        config,
        outbox: tx,
        processes: StdMutex::new(HashMap::new()),
        history: StdMutex::new(Vec::new()),
    };
    (Arc::new(host), rx)
}

impl SimulatedHost {
    /// Every call successfully parsed so far, in evaluation order.
    pub fn history(&self) -> Vec<HostCall> {
        match self.history.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of processes started and not yet finished.
    pub fn live_processes(&self) -> usize {
        match self.processes.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn with_processes<R>(&self, f: impl FnOnce(&mut HashMap<OperationId, bool>) -> R) -> R {
        match self.processes.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => {
                tracing::error!("Simulated host process table poisoned");
                f(&mut poisoned.into_inner())
            }
        }
    }

    fn record(&self, call: HostCall) {
        match self.history.lock() {
            Ok(mut guard) => guard.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    fn post_after(&self, delay: Duration, message: InboundMessage) {
        let tx = self.outbox.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if tx.send(message.to_body()).await.is_err() {
                tracing::trace!("Simulated host outbox closed");
            }
        });
    }
}

#[async_trait]
impl ScriptHost for SimulatedHost {
    async fn evaluate(&self, script: String) -> Result<serde_json::Value, DispatchError> {
        let Some(call) = HostCall::parse(&script) else {
            return Err(DispatchError::Evaluation(format!(
                "ReferenceError: cannot evaluate `{script}`"
            )));
        };
        self.record(call);

        match call {
            HostCall::StartProcess { id, queued } => {
                if self.config.reject.contains(&id) {
                    return Err(DispatchError::Evaluation(format!(
                        "TypeError: process {id} refused to start"
                    )));
                }
                self.with_processes(|p| p.insert(id, queued));
                self.post_after(
                    self.config.delay_for(id),
                    InboundMessage::data_request(id, queued),
                );
            }
            HostCall::ContinueProcess { id, queued } => {
                self.with_processes(|p| p.insert(id, queued));
                self.post_after(self.config.delay_for(id), InboundMessage::network_request(id));
            }
            HostCall::FinishProcess { id } => {
                let queued = self.with_processes(|p| p.remove(&id)).unwrap_or(false);
                if self.config.stall.contains(&id) {
                    tracing::debug!(operation_id = %id, "Simulated process stalls before completing");
                    return Ok(serde_json::Value::Null);
                }
                let copies = if self.config.duplicate.contains(&id) { 2 } else { 1 };
                for _ in 0..copies {
                    self.post_after(self.config.delay_for(id), InboundMessage::completed(id, queued));
                }
            }
            HostCall::Ping { id } => {
                self.post_after(Duration::ZERO, InboundMessage::pong(id));
            }
        }

        Ok(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::PingId;

    fn op(raw: u64) -> OperationId {
        OperationId::new(raw)
    }

    async fn next_message(rx: &mut mpsc::Receiver<InboundBody>) -> InboundMessage {
        let body = rx.recv().await.unwrap();
        InboundMessage::from_body(&body).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn process_walks_through_all_steps() {
        let (host, mut rx) = simulated_host(SimulatedHostConfig::new());

        host.evaluate(HostCall::StartProcess { id: op(1), queued: true }.to_script())
            .await
            .unwrap();
        assert_eq!(next_message(&mut rx).await, InboundMessage::data_request(op(1), true));

        host.evaluate(HostCall::ContinueProcess { id: op(1), queued: true }.to_script())
            .await
            .unwrap();
        assert_eq!(next_message(&mut rx).await, InboundMessage::network_request(op(1)));

        host.evaluate(HostCall::FinishProcess { id: op(1) }.to_script())
            .await
            .unwrap();
        assert_eq!(next_message(&mut rx).await, InboundMessage::completed(op(1), true));
        assert_eq!(host.live_processes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_is_answered() {
        let (host, mut rx) = simulated_host(SimulatedHostConfig::new());
        host.evaluate("ping(5);".to_string()).await.unwrap();
        assert_eq!(next_message(&mut rx).await, InboundMessage::pong(PingId::new(5)));
    }

    #[tokio::test]
    async fn unknown_script_fails_to_evaluate() {
        let (host, _rx) = simulated_host(SimulatedHostConfig::new());
        let err = host.evaluate("window.close();".to_string()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Evaluation(_)));
        assert!(host.history().is_empty());
    }

    #[tokio::test]
    async fn rejected_start_fails_without_posting() {
        let (host, mut rx) = simulated_host(SimulatedHostConfig::new().with_rejected(op(2)));
        let err = host
            .evaluate(HostCall::StartProcess { id: op(2), queued: false }.to_script())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Evaluation(_)));
        assert_eq!(host.live_processes(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicated_completion_is_posted_twice() {
        let config = SimulatedHostConfig::new().with_duplicated(op(3));
        let (host, mut rx) = simulated_host(config);
        host.evaluate(HostCall::FinishProcess { id: op(3) }.to_script())
            .await
            .unwrap();
        assert_eq!(next_message(&mut rx).await, InboundMessage::completed(op(3), false));
        assert_eq!(next_message(&mut rx).await, InboundMessage::completed(op(3), false));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_completion_is_never_posted() {
        let config = SimulatedHostConfig::new().with_stalled(op(4));
        let (host, mut rx) = simulated_host(config);
        host.evaluate(HostCall::FinishProcess { id: op(4) }.to_script())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
