//! Host behind a framed pipe (typically a child process's stdin/stdout).
//!
//! Evaluate acknowledgements are correlated to callers by `seq`; script
//! messages are forwarded to the inbound channel untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::{DispatchError, InboundBody, ScriptHost};
use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{HostRequest, HostResponse};

type AckSender = oneshot::Sender<Result<serde_json::Value, DispatchError>>;
type PipeWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, JsonCodec<HostRequest>>;

#[derive(Default)]
struct PendingAcks {
    waiters: StdMutex<HashMap<u64, AckSender>>,
    closed: AtomicBool,
}

impl PendingAcks {
    fn with<R>(&self, f: impl FnOnce(&mut HashMap<u64, AckSender>) -> R) -> R {
        match self.waiters.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => {
                tracing::error!("Pipe host pending table poisoned");
                f(&mut poisoned.into_inner())
            }
        }
    }

    /// Mark the pipe closed and fail everything still waiting.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<AckSender> = self.with(|w| w.drain().map(|(_, tx)| tx).collect());
        if !drained.is_empty() {
            tracing::warn!(pending = drained.len(), "Failing evaluations pending on closed pipe");
        }
        for tx in drained {
            let _ = tx.send(Err(DispatchError::HostGone));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct PipeHost {
    writer: tokio::sync::Mutex<PipeWriter>,
    pending: Arc<PendingAcks>,
    next_seq: AtomicU64,
}

/// Wrap a reader/writer pair speaking the host frame protocol.
///
/// Spawns the reader task; must be called within a tokio runtime.
pub fn connect_pipe_host<R, W>(
    reader: R,
    writer: W,
    inbound_buffer: usize,
) -> (Arc<PipeHost>, mpsc::Receiver<InboundBody>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::channel(inbound_buffer.max(1));
    let pending = Arc::new(PendingAcks::default());

    let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
    let host = Arc::new(PipeHost {
        writer: tokio::sync::Mutex::new(FramedWrite::new(writer, JsonCodec::new())),
        pending: Arc::clone(&pending),
        next_seq: AtomicU64::new(1),
    });

    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, JsonCodec::<HostResponse>::new());
        loop {
            match frames.next().await {
                Some(Ok(HostResponse::EvaluateResult { seq, result, error })) => {
                    let Some(tx) = pending.with(|w| w.remove(&seq)) else {
                        tracing::warn!(seq, "Evaluate result with no pending call");
                        continue;
                    };
                    let outcome = match error {
                        Some(e) => Err(DispatchError::Evaluation(e)),
                        None => Ok(result.unwrap_or(serde_json::Value::Null)),
                    };
                    if tx.send(outcome).is_err() {
                        tracing::debug!(seq, "Evaluate caller went away before acknowledgement");
                    }
                }
                Some(Ok(HostResponse::Message { body })) => {
                    if inbound_tx.send(body).await.is_err() {
                        // Keep reading: acknowledgements still have waiters.
                        tracing::debug!("Inbound receiver dropped; discarding host message");
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Host pipe read error");
                    break;
                }
                None => {
                    tracing::warn!("Host pipe closed (host exited?)");
                    break;
                }
            }
        }
        pending.close();
        tracing::debug!("Host pipe reader exiting");
    });

    (host, inbound_rx)
}

impl PipeHost {
    /// Ask the host side to stop serving.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(HostRequest::Shutdown)
            .await
            .map_err(|e| DispatchError::Transport(format!("failed to send shutdown: {}", e)))
    }

    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }
}

#[async_trait]
impl ScriptHost for PipeHost {
    async fn evaluate(&self, script: String) -> Result<serde_json::Value, DispatchError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.with(|w| w.insert(seq, tx));

        // The reader may have closed between our insert and now.
        if self.pending.is_closed() {
            self.pending.with(|w| w.remove(&seq));
            return Err(DispatchError::HostGone);
        }

        let sent = {
            let mut writer = self.writer.lock().await;
            writer.send(HostRequest::Evaluate { seq, script }).await
        };
        if let Err(e) = sent {
            self.pending.with(|w| w.remove(&seq));
            return Err(DispatchError::Transport(e.to_string()));
        }

        rx.await.unwrap_or(Err(DispatchError::HostGone))
    }
}
