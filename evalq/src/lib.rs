//! evalq: serialized task queue over an embedded script host.
//!
//! Work is submitted to the host as script text, acknowledged when the host
//! has evaluated it, and completed later when the host posts a message back.
//! The [`controller`] owns all of that state on a single event loop.

mod version;

pub mod bridge;
pub mod channel;
pub mod config;
pub mod controller;
pub mod host;
pub mod prober;
pub mod queue;
pub mod registry;
pub mod router;
pub mod session;
pub mod stats;

pub use bridge::protocol::{BatchId, HostCall, InboundMessage, OperationId, PingId};
pub use channel::{DispatchAck, SubmissionChannel, SubmissionId};
pub use config::{ConfigError, ControllerConfig};
pub use controller::{BatchTicket, ControllerError, ControllerHandle, spawn_controller};
pub use host::{DispatchError, InboundBody, ScriptHost};
pub use prober::{LivenessProber, ProbeMode};
pub use queue::{TaskDescriptor, TaskQueue};
pub use registry::{Admission, Completion, CorrelationRegistry, OperationCounters};
pub use session::{BatchCallback, BatchMode, BatchReport, Session};
pub use stats::SessionStats;
pub use version::{EVALQ_VERSION, VersionInfo};
