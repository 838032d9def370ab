//! Batch driver and host worker entry points.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};

use evalq::host::{
    PipeHost, SimulatedHostConfig, connect_pipe_host, serve_host_worker, simulated_host,
};
use evalq::{BatchReport, ControllerConfig, ControllerHandle, SessionStats, VersionInfo};

use crate::args::{Options, Transport};
use crate::error::{HammerError, Result};

const INBOUND_BUFFER: usize = 256;
const WORKER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct Summary {
    pub version: VersionInfo,
    pub report: BatchReport,
    pub stats: SessionStats,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.version)?;
        writeln!(
            f,
            "batch {} drained in {:.3}s",
            self.report.batch_id, self.report.elapsed_secs
        )?;
        write!(f, "{}", self.stats)
    }
}

/// Controller settings: environment first, command line on top.
pub fn controller_config(options: &Options) -> Result<ControllerConfig> {
    let mut config = ControllerConfig::from_env()?;
    if let Some(interval) = options.probe_interval {
        config = config.with_probe_interval(interval);
    }
    if let Some(mode) = options.probe_mode {
        config = config.with_probe_mode(mode);
    }
    Ok(config)
}

fn host_config(options: &Options) -> SimulatedHostConfig {
    SimulatedHostConfig::new()
        .with_step_delay(options.step_delay)
        .with_inbound_buffer(INBOUND_BUFFER)
}

/// Run one batch to completion and summarize it.
pub async fn run_batch(options: &Options) -> Result<Summary> {
    let config = controller_config(options)?;

    match options.transport {
        Transport::Inline => {
            let (host, inbound) = simulated_host(host_config(options));
            let controller = evalq::spawn_controller(host, inbound, config);
            let version = VersionInfo::new().with_host("simulated");
            let outcome = drive(&controller, options, version).await;
            controller.shutdown().await?;
            outcome
        }
        Transport::Pipe => {
            let (mut child, pipe, inbound) = spawn_host_worker(options).await?;
            let controller = evalq::spawn_controller(pipe.clone(), inbound, config);
            let version = VersionInfo::new().with_host("simulated (pipe)");
            let outcome = drive(&controller, options, version).await;
            controller.shutdown().await?;
            stop_host_worker(&mut child, &pipe).await;
            outcome
        }
    }
}

async fn drive(
    controller: &ControllerHandle,
    options: &Options,
    version: VersionInfo,
) -> Result<Summary> {
    let ticket = controller.start_batch(options.mode, options.count).await?;
    tracing::info!(batch_id = %ticket.id(), mode = %options.mode, count = options.count, "Batch submitted");

    let report = match tokio::time::timeout(options.timeout, ticket.wait()).await {
        Ok(report) => report?,
        Err(_) => {
            controller.print_stats().await?;
            return Err(HammerError::Timeout(options.timeout));
        }
    };
    let stats = controller.print_stats().await?;

    Ok(Summary {
        version,
        report,
        stats,
    })
}

/// Re-run this binary as a host worker and connect to it.
async fn spawn_host_worker(
    options: &Options,
) -> Result<(
    Child,
    Arc<PipeHost>,
    tokio::sync::mpsc::Receiver<evalq::InboundBody>,
)> {
    let exe = std::env::current_exe()
        .map_err(|e| HammerError::Spawn(format!("cannot locate executable: {e}")))?;

    let mut child = Command::new(exe)
        .arg("--host-worker")
        .arg("--step-delay-ms")
        .arg(options.step_delay.as_millis().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HammerError::Spawn(e.to_string()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| HammerError::Spawn("worker stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HammerError::Spawn("worker stdout not captured".to_string()))?;

    tracing::debug!(pid = ?child.id(), "Host worker spawned");
    let (pipe, inbound) = connect_pipe_host(stdout, stdin, INBOUND_BUFFER);
    Ok((child, pipe, inbound))
}

async fn stop_host_worker(child: &mut Child, pipe: &PipeHost) {
    if let Err(e) = pipe.shutdown().await {
        tracing::warn!(error = %e, "Failed to ask host worker to stop");
    }
    match tokio::time::timeout(WORKER_EXIT_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(%status, "Host worker exited"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for host worker"),
        Err(_) => {
            tracing::warn!("Host worker did not exit; killing it");
            if let Err(e) = child.kill().await {
                tracing::error!(error = %e, "Failed to kill host worker");
            }
        }
    }
}

/// Serve a simulated host over stdin/stdout until told to stop.
pub async fn serve_worker(options: &Options) -> Result<()> {
    let (host, inbound) = simulated_host(host_config(options));
    serve_host_worker(tokio::io::stdin(), tokio::io::stdout(), host, inbound).await?;
    Ok(())
}
