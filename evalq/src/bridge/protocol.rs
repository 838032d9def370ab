//! Wire protocol types for core-host communication.
//!
//! Two directions:
//! - **Outbound** (core → host): script text built from a fixed set of [`HostCall`] shapes
//! - **Inbound** (host → core): mapping bodies decoded into [`InboundMessage`]
//!
//! When the host lives in another process, both directions are wrapped in
//! [`HostRequest`]/[`HostResponse`] frames.

use serde::{Deserialize, Serialize};

/// Correlation id for one unit of work across submit → acknowledge → complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a liveness ping; echoed back by the host as `pongId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PingId(u64);

impl PingId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a batch.
///
/// UUID v4 so that log lines from superseded batches never look like the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(uuid::Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const START_PROCESS: &str = "someLongRunningProcess";
const CONTINUE_PROCESS: &str = "continueLongRunningProcess";
const FINISH_PROCESS: &str = "finishLongRunningProcess";
const PING: &str = "ping";

/// The call shapes the core ever asks the host to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCall {
    StartProcess { id: OperationId, queued: bool },
    ContinueProcess { id: OperationId, queued: bool },
    FinishProcess { id: OperationId },
    Ping { id: PingId },
}

impl HostCall {
    /// Render as script text for the host.
    pub fn to_script(&self) -> String {
        match self {
            Self::StartProcess { id, queued } => format!("{START_PROCESS}({id}, {queued});"),
            Self::ContinueProcess { id, queued } => format!("{CONTINUE_PROCESS}({id}, {queued});"),
            Self::FinishProcess { id } => format!("{FINISH_PROCESS}({id});"),
            Self::Ping { id } => format!("{PING}({id});"),
        }
    }

    /// Recognize one of the fixed call shapes. Anything else is `None`.
    pub fn parse(script: &str) -> Option<Self> {
        let call = script.trim().trim_end_matches(';').trim_end();
        let (name, rest) = call.split_once('(')?;
        let args = rest.strip_suffix(')')?;
        let args: Vec<&str> = args.split(',').map(str::trim).collect();

        match (name.trim(), args.as_slice()) {
            (START_PROCESS, [id, queued]) => Some(Self::StartProcess {
                id: OperationId(id.parse().ok()?),
                queued: queued.parse().ok()?,
            }),
            (CONTINUE_PROCESS, [id, queued]) => Some(Self::ContinueProcess {
                id: OperationId(id.parse().ok()?),
                queued: queued.parse().ok()?,
            }),
            (FINISH_PROCESS, [id]) => Some(Self::FinishProcess {
                id: OperationId(id.parse().ok()?),
            }),
            (PING, [id]) => Some(Self::Ping {
                id: PingId(id.parse().ok()?),
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartProcess { .. } => "start",
            Self::ContinueProcess { .. } => "continue",
            Self::FinishProcess { .. } => "finish",
            Self::Ping { .. } => "ping",
        }
    }

    /// The operation this call belongs to, if it is not a ping.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            Self::StartProcess { id, .. }
            | Self::ContinueProcess { id, .. }
            | Self::FinishProcess { id } => Some(*id),
            Self::Ping { .. } => None,
        }
    }
}

impl std::fmt::Display for HostCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_script())
    }
}

/// Message posted by the host. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_request_process_id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_request_process_id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_process_id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pong_id: Option<PingId>,
}

impl InboundMessage {
    /// Decode a raw message body.
    ///
    /// Bodies that are not objects, or whose recognized keys carry the wrong
    /// type, yield `None`.
    pub fn from_body(body: &serde_json::Value) -> Option<Self> {
        if !body.is_object() {
            return None;
        }
        match Self::deserialize(body) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(error = %e, "Inbound body has malformed recognized keys");
                None
            }
        }
    }

    pub fn data_request(id: OperationId, queued: bool) -> Self {
        Self {
            data_request_process_id: Some(id),
            queued: Some(queued),
            ..Self::default()
        }
    }

    pub fn network_request(id: OperationId) -> Self {
        Self {
            network_request_process_id: Some(id),
            ..Self::default()
        }
    }

    pub fn completed(id: OperationId, queued: bool) -> Self {
        Self {
            completed_process_id: Some(id),
            queued: Some(queued),
            ..Self::default()
        }
    }

    pub fn pong(id: PingId) -> Self {
        Self {
            pong_id: Some(id),
            ..Self::default()
        }
    }

    /// True when none of the routable keys is present. A lone `queued` flag routes nowhere.
    pub fn is_unrecognized(&self) -> bool {
        self.data_request_process_id.is_none()
            && self.network_request_process_id.is_none()
            && self.completed_process_id.is_none()
            && self.pong_id.is_none()
    }

    pub fn to_body(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Frames from the core to an out-of-process host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    Evaluate { seq: u64, script: String },
    Shutdown,
}

/// Frames from an out-of-process host to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostResponse {
    /// Dispatch acknowledgement for the `Evaluate` with the same `seq`.
    EvaluateResult {
        seq: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Asynchronous message posted by the script.
    Message { body: serde_json::Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(raw: u64) -> OperationId {
        OperationId::new(raw)
    }

    #[test]
    fn host_call_scripts() {
        assert_eq!(
            HostCall::StartProcess { id: op(3), queued: true }.to_script(),
            "someLongRunningProcess(3, true);"
        );
        assert_eq!(
            HostCall::ContinueProcess { id: op(3), queued: false }.to_script(),
            "continueLongRunningProcess(3, false);"
        );
        assert_eq!(
            HostCall::FinishProcess { id: op(7) }.to_script(),
            "finishLongRunningProcess(7);"
        );
        assert_eq!(
            HostCall::Ping { id: PingId::new(2) }.to_script(),
            "ping(2);"
        );
    }

    #[test]
    fn host_call_parses_its_own_scripts() {
        let calls = [
            HostCall::StartProcess { id: op(1), queued: false },
            HostCall::ContinueProcess { id: op(12), queued: true },
            HostCall::FinishProcess { id: op(40) },
            HostCall::Ping { id: PingId::new(9) },
        ];
        for call in calls {
            assert_eq!(HostCall::parse(&call.to_script()), Some(call));
        }
    }

    #[test]
    fn host_call_parse_tolerates_whitespace() {
        assert_eq!(
            HostCall::parse("  someLongRunningProcess( 5 ,true ) ;\n"),
            Some(HostCall::StartProcess { id: op(5), queued: true })
        );
    }

    #[test]
    fn host_call_parse_rejects_unknown_shapes() {
        assert_eq!(HostCall::parse("alert('hi');"), None);
        assert_eq!(HostCall::parse("ping();"), None);
        assert_eq!(HostCall::parse("ping(1, 2);"), None);
        assert_eq!(HostCall::parse("someLongRunningProcess(1, maybe);"), None);
        assert_eq!(HostCall::parse("finishLongRunningProcess(-1);"), None);
        assert_eq!(HostCall::parse("ping(1"), None);
    }

    #[test]
    fn inbound_completed_with_queued() {
        let msg = InboundMessage::from_body(&json!({"completedProcessId": 4, "queued": true}))
            .unwrap();
        assert_eq!(msg, InboundMessage::completed(op(4), true));
        assert!(!msg.is_unrecognized());
    }

    #[test]
    fn inbound_ignores_unknown_keys() {
        let msg = InboundMessage::from_body(&json!({"pongId": 3, "pid": 11, "extra": {"a": 1}}))
            .unwrap();
        assert_eq!(msg, InboundMessage::pong(PingId::new(3)));
    }

    #[test]
    fn inbound_without_known_keys_is_unrecognized() {
        let msg = InboundMessage::from_body(&json!({"pid": 11})).unwrap();
        assert!(msg.is_unrecognized());

        let lone_flag = InboundMessage::from_body(&json!({"queued": true})).unwrap();
        assert!(lone_flag.is_unrecognized());
    }

    #[test]
    fn inbound_rejects_non_objects_and_bad_types() {
        assert!(InboundMessage::from_body(&json!("completed")).is_none());
        assert!(InboundMessage::from_body(&json!([1, 2])).is_none());
        assert!(InboundMessage::from_body(&json!({"pongId": "seven"})).is_none());
    }

    #[test]
    fn inbound_may_carry_several_keys() {
        let msg = InboundMessage::from_body(&json!({
            "dataRequestProcessId": 1,
            "completedProcessId": 2,
            "queued": false
        }))
        .unwrap();
        assert_eq!(msg.data_request_process_id, Some(op(1)));
        assert_eq!(msg.completed_process_id, Some(op(2)));
        assert_eq!(msg.queued, Some(false));
    }

    #[test]
    fn inbound_serializes_camel_case() {
        insta::assert_json_snapshot!(InboundMessage::completed(op(8), false), @r#"
        {
          "completedProcessId": 8,
          "queued": false
        }
        "#);
    }

    #[test]
    fn host_request_evaluate_serializes() {
        let req = HostRequest::Evaluate {
            seq: 1,
            script: "ping(1);".to_string(),
        };
        insta::assert_json_snapshot!(req, @r#"
        {
          "type": "evaluate",
          "seq": 1,
          "script": "ping(1);"
        }
        "#);
    }

    #[test]
    fn host_request_shutdown_serializes() {
        insta::assert_json_snapshot!(HostRequest::Shutdown, @r#"
        {
          "type": "shutdown"
        }
        "#);
    }

    #[test]
    fn host_response_error_serializes() {
        let resp = HostResponse::EvaluateResult {
            seq: 4,
            result: None,
            error: Some("ReferenceError".to_string()),
        };
        insta::assert_json_snapshot!(resp, @r#"
        {
          "type": "evaluate_result",
          "seq": 4,
          "error": "ReferenceError"
        }
        "#);
    }

    #[test]
    fn batch_id_parse_roundtrip() {
        let id = BatchId::new();
        assert_eq!(BatchId::parse(&id.to_string()).unwrap(), id);
        assert!(BatchId::parse("not-a-uuid").is_err());
    }
}
