//! Script host abstraction.
//!
//! A host evaluates script text and, independently, posts messages back on an
//! inbound channel. The two are deliberately unrelated: `evaluate` resolving
//! only means the host accepted the call, and the unit of work it started
//! reports completion later as an inbound message.
//!
//! Implementations:
//! - [`SimulatedHost`]: in-process host modelling long-running scripts
//! - [`PipeHost`]: host living behind a framed stdin/stdout pipe
//! - [`serve_host_worker`]: the child side of that pipe

mod pipe;
mod simulated;
mod worker;

use async_trait::async_trait;

pub use pipe::{PipeHost, connect_pipe_host};
pub use simulated::{SimulatedHost, SimulatedHostConfig, simulated_host};
pub use worker::serve_host_worker;

/// Raw inbound message body as posted by the script.
pub type InboundBody = serde_json::Value;

/// Failure of the dispatch call itself, as opposed to the work it starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The host evaluated the script and reported an error.
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    /// The host went away before acknowledging.
    #[error("host is gone")]
    HostGone,
    #[error("transport error: {0}")]
    Transport(String),
}

/// The seam a real embedding (web view, JS runtime, ...) implements.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Evaluate `script`, resolving once the host has run the call itself.
    async fn evaluate(&self, script: String) -> Result<serde_json::Value, DispatchError>;
}
