//! Controller - the event loop that owns all protocol state.
//!
//! Flow:
//! 1. A caller starts a batch through [`ControllerHandle`]
//! 2. The session produces start calls; the submission channel dispatches them
//! 3. Dispatch acks, inbound host messages and probe ticks all arrive on this
//!    one loop, so session state is never shared
//! 4. When the batch drains its [`BatchTicket`] resolves
//!
//! The loop exits on shutdown, when every handle is dropped, or when the
//! host's inbound channel closes.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::protocol::BatchId;
use crate::channel::{DispatchAck, SubmissionChannel};
use crate::config::ControllerConfig;
use crate::host::{InboundBody, ScriptHost};
use crate::prober::{LivenessProber, ProbeMode, ProbeTick};
use crate::router;
use crate::session::{BatchCallback, BatchMode, BatchReport, Session};
use crate::stats::SessionStats;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("controller is not running")]
    Stopped,
    #[error("batch ended without draining (superseded or controller stopped)")]
    BatchAbandoned,
    #[error("controller task failed: {0}")]
    Task(String),
}

enum Command {
    StartBatch {
        mode: BatchMode,
        count: usize,
        on_complete: Option<BatchCallback>,
        reply: oneshot::Sender<BatchId>,
    },
    Stats {
        print: bool,
        reply: oneshot::Sender<SessionStats>,
    },
    Shutdown,
}

/// Resolves when its batch drains.
#[derive(Debug)]
pub struct BatchTicket {
    id: BatchId,
    done: oneshot::Receiver<BatchReport>,
}

impl BatchTicket {
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Wait for the batch to drain.
    ///
    /// Fails with [`ControllerError::BatchAbandoned`] if a newer batch
    /// superseded this one or the controller stopped first.
    pub async fn wait(self) -> Result<BatchReport, ControllerError> {
        self.done.await.map_err(|_| ControllerError::BatchAbandoned)
    }
}

pub struct ControllerHandle {
    command_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Spawn the controller event loop against `host`.
///
/// `inbound` is the channel the host posts its messages on.
pub fn spawn_controller(
    host: Arc<dyn ScriptHost>,
    inbound: mpsc::Receiver<InboundBody>,
    config: ControllerConfig,
) -> ControllerHandle {
    let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let (tick_tx, tick_rx) = mpsc::unbounded_channel();

    let event_loop = EventLoop {
        session: Session::new(),
        prober: LivenessProber::new(config.probe_interval, tick_tx),
        channel: SubmissionChannel::new(host, ack_tx),
        probe_mode: config.probe_mode,
    };

    tracing::info!(
        probe_interval = ?config.probe_interval,
        probe_mode = %config.probe_mode,
        "Starting controller"
    );
    let task = tokio::spawn(event_loop.run(command_rx, ack_rx, inbound, tick_rx));

    ControllerHandle { command_tx, task }
}

impl ControllerHandle {
    /// Start a batch; the returned ticket resolves when it drains.
    pub async fn start_batch(
        &self,
        mode: BatchMode,
        count: usize,
    ) -> Result<BatchTicket, ControllerError> {
        let (done_tx, done_rx) = oneshot::channel();
        let on_complete: BatchCallback = Box::new(move |report| {
            let _ = done_tx.send(report);
        });
        let id = self.start_batch_with(mode, count, Some(on_complete)).await?;
        Ok(BatchTicket { id, done: done_rx })
    }

    /// Start a batch with an arbitrary completion callback.
    ///
    /// The callback runs on the controller loop and must not block.
    pub async fn start_batch_with(
        &self,
        mode: BatchMode,
        count: usize,
        on_complete: Option<BatchCallback>,
    ) -> Result<BatchId, ControllerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::StartBatch {
                mode,
                count,
                on_complete,
                reply,
            })
            .await
            .map_err(|_| ControllerError::Stopped)?;
        reply_rx.await.map_err(|_| ControllerError::Stopped)
    }

    pub async fn start_unqueued_batch(&self, count: usize) -> Result<BatchTicket, ControllerError> {
        self.start_batch(BatchMode::Unqueued, count).await
    }

    pub async fn start_queued_batch(&self, count: usize) -> Result<BatchTicket, ControllerError> {
        self.start_batch(BatchMode::Queued, count).await
    }

    pub async fn start_interleaved_batch(
        &self,
        count: usize,
        fanout: usize,
    ) -> Result<BatchTicket, ControllerError> {
        self.start_batch(BatchMode::Interleaved { fanout }, count)
            .await
    }

    pub async fn stats(&self) -> Result<SessionStats, ControllerError> {
        self.request_stats(false).await
    }

    /// Like [`stats`](Self::stats), but the controller also logs them.
    pub async fn print_stats(&self) -> Result<SessionStats, ControllerError> {
        self.request_stats(true).await
    }

    async fn request_stats(&self, print: bool) -> Result<SessionStats, ControllerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Stats { print, reply })
            .await
            .map_err(|_| ControllerError::Stopped)?;
        reply_rx.await.map_err(|_| ControllerError::Stopped)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit. Pending batches are abandoned.
    pub async fn shutdown(self) -> Result<(), ControllerError> {
        // A closed channel means the loop already exited; joining still reports how.
        let _ = self.command_tx.send(Command::Shutdown).await;
        self.task
            .await
            .map_err(|e| ControllerError::Task(e.to_string()))
    }
}

struct EventLoop {
    session: Session,
    prober: LivenessProber,
    channel: SubmissionChannel,
    probe_mode: ProbeMode,
}

impl EventLoop {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut ack_rx: mpsc::UnboundedReceiver<DispatchAck>,
        mut inbound_rx: mpsc::Receiver<InboundBody>,
        mut tick_rx: mpsc::UnboundedReceiver<ProbeTick>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = command_rx.recv() => {
                    match command {
                        Some(Command::StartBatch { mode, count, on_complete, reply }) => {
                            let id = self.start_batch(mode, count, on_complete);
                            if reply.send(id).is_err() {
                                tracing::debug!(batch_id = %id, "Batch starter went away");
                            }
                        }
                        Some(Command::Stats { print, reply }) => {
                            let stats = self.stats();
                            if print {
                                stats.print();
                            }
                            let _ = reply.send(stats);
                        }
                        Some(Command::Shutdown) => {
                            tracing::info!("Controller shutdown requested");
                            break;
                        }
                        None => {
                            tracing::debug!("All controller handles dropped");
                            break;
                        }
                    }
                }

                Some(ack) = ack_rx.recv() => {
                    let fanned_out = self.session.on_dispatch_ack(&ack.call, &ack.result);
                    if !fanned_out.is_empty() {
                        self.channel.submit_all(fanned_out);
                        if !self.prober.is_active() && self.probe_mode == ProbeMode::UntilDrained {
                            self.prober.start(self.probe_mode);
                        }
                    }
                    self.session.finish_if_drained();
                }

                body = inbound_rx.recv() => {
                    match body {
                        Some(body) => {
                            let calls = router::route(&mut self.session, &body);
                            self.channel.submit_all(calls);
                        }
                        None => {
                            tracing::warn!("Host inbound channel closed");
                            break;
                        }
                    }
                }

                Some(tick) = tick_rx.recv() => {
                    let counters = self.session.counters();
                    if let Some(ping) = self.prober.on_tick(tick, &counters) {
                        self.channel.submit(ping);
                    }
                }
            }
        }

        self.prober.cancel();
        tracing::info!(stats = %self.session.counters(), "Controller stopped");
    }

    fn start_batch(
        &mut self,
        mode: BatchMode,
        count: usize,
        on_complete: Option<BatchCallback>,
    ) -> BatchId {
        let (id, calls) = self.session.start_batch(mode, count, on_complete);
        self.channel.submit_all(calls);

        if self.session.is_drained() {
            self.prober.cancel();
        } else {
            self.prober.start(self.probe_mode);
        }
        id
    }

    fn stats(&self) -> SessionStats {
        self.session
            .stats()
            .with_probe(self.prober.pings_sent(), self.prober.is_active())
    }
}
