//! Host worker - the child side of the host pipe.
//!
//! The parent side (correlating acknowledgements) is in pipe.rs.
//!
//! Runs every `Evaluate` request against a local [`ScriptHost`] on its own
//! task, so a slow evaluation never holds up the next request, and forwards
//! everything the host posts as `Message` frames.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::{DispatchError, InboundBody, ScriptHost};
use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{HostRequest, HostResponse};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Serve `host` over the given pipe until shutdown or EOF.
pub async fn serve_host_worker<R, W>(
    reader: R,
    writer: W,
    host: Arc<dyn ScriptHost>,
    mut inbound: mpsc::Receiver<InboundBody>,
) -> io::Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut requests = FramedRead::new(reader, JsonCodec::<HostRequest>::new());
    let mut responses = FramedWrite::new(writer, JsonCodec::<HostResponse>::new());

    let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<HostResponse>();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = resp_rx.recv().await {
            if let Err(e) = responses.send(frame).await {
                tracing::error!(error = %e, "Failed to write host frame");
                break;
            }
        }
    });

    let forwarder = {
        let tx = resp_tx.clone();
        tokio::spawn(async move {
            while let Some(body) = inbound.recv().await {
                if tx.send(HostResponse::Message { body }).is_err() {
                    break;
                }
            }
        })
    };

    tracing::info!("Host worker serving");

    let result = loop {
        match requests.next().await {
            Some(Ok(HostRequest::Evaluate { seq, script })) => {
                tracing::trace!(seq, %script, "Evaluate request");
                let host = Arc::clone(&host);
                let tx = resp_tx.clone();
                tokio::spawn(async move {
                    let frame = match host.evaluate(script).await {
                        Ok(result) => HostResponse::EvaluateResult {
                            seq,
                            result: Some(result),
                            error: None,
                        },
                        Err(e) => HostResponse::EvaluateResult {
                            seq,
                            result: None,
                            error: Some(match e {
                                DispatchError::Evaluation(message) => message,
                                other => other.to_string(),
                            }),
                        },
                    };
                    let _ = tx.send(frame);
                });
            }
            Some(Ok(HostRequest::Shutdown)) => {
                tracing::info!("Host worker shutting down");
                break Ok(());
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Host worker read error");
                break Err(e);
            }
            None => {
                tracing::info!("Host worker input closed");
                break Ok(());
            }
        }
    };

    forwarder.abort();
    drop(resp_tx);
    if tokio::time::timeout(FLUSH_TIMEOUT, writer_task).await.is_err() {
        tracing::warn!("Host worker writer did not drain before exit");
    }

    result
}
