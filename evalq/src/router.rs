//! Inbound message routing.
//!
//! Every recognized key in a message is acted on; keys are not assumed to be
//! exclusive. Bodies with no recognized key are dropped.

use crate::bridge::protocol::{HostCall, InboundMessage};
use crate::host::InboundBody;
use crate::session::Session;

/// Decode and route a raw inbound body. Returns the calls to submit.
pub fn route(session: &mut Session, body: &InboundBody) -> Vec<HostCall> {
    match InboundMessage::from_body(body) {
        Some(message) => route_message(session, &message),
        None => {
            tracing::trace!(%body, "Dropping inbound body that is not a message");
            Vec::new()
        }
    }
}

pub fn route_message(session: &mut Session, message: &InboundMessage) -> Vec<HostCall> {
    if message.is_unrecognized() {
        tracing::trace!(?message, "Dropping unrecognized inbound message");
        return Vec::new();
    }

    let mut calls = Vec::new();

    if let Some(id) = message.data_request_process_id {
        let queued = message
            .queued
            .unwrap_or_else(|| session.admission(id).is_some_and(|a| a.is_queued()));
        tracing::debug!(operation_id = %id, queued, "Host requested data");
        calls.push(HostCall::ContinueProcess { id, queued });
    }

    if let Some(id) = message.network_request_process_id {
        tracing::debug!(operation_id = %id, "Host requested network resolution");
        calls.push(HostCall::FinishProcess { id });
    }

    if let Some(id) = message.completed_process_id {
        calls.extend(session.complete(id, message.queued));
        session.finish_if_drained();
    }

    if let Some(id) = message.pong_id {
        tracing::debug!(ping_id = %id, counters = %session.counters(), "Pong received");
    }

    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::OperationId;
    use crate::registry::OperationCounters;
    use crate::session::{BatchCallback, BatchReport};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn op(raw: u64) -> OperationId {
        OperationId::new(raw)
    }

    fn recorder() -> (BatchCallback, Arc<Mutex<Vec<BatchReport>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        (
            Box::new(move |report| sink.lock().unwrap().push(report)),
            reports,
        )
    }

    fn completed(id: u64, queued: bool) -> InboundBody {
        json!({ "completedProcessId": id, "queued": queued })
    }

    #[test]
    fn data_request_continues_with_queued_flag() {
        let mut session = Session::new();
        session.start_queued_batch(1, None);

        let calls = route(
            &mut session,
            &json!({ "dataRequestProcessId": 1, "queued": true }),
        );
        assert_eq!(
            calls,
            vec![HostCall::ContinueProcess {
                id: op(1),
                queued: true
            }]
        );
    }

    #[test]
    fn data_request_without_flag_uses_admission() {
        let mut session = Session::new();
        session.start_unqueued_batch(1, None);

        let calls = route(&mut session, &json!({ "dataRequestProcessId": 1 }));
        assert_eq!(
            calls,
            vec![HostCall::ContinueProcess {
                id: op(1),
                queued: false
            }]
        );
    }

    #[test]
    fn network_request_finishes_process() {
        let mut session = Session::new();
        let calls = route(&mut session, &json!({ "networkRequestProcessId": 7 }));
        assert_eq!(calls, vec![HostCall::FinishProcess { id: op(7) }]);
    }

    #[test]
    fn queued_batch_of_three_runs_serially() {
        let (callback, reports) = recorder();
        let mut session = Session::new();
        let (_, mut submitted) = session.start_queued_batch(3, Some(callback));

        for id in 1..=3 {
            // Exactly one start is pending when each completion arrives.
            assert_eq!(
                submitted,
                vec![HostCall::StartProcess {
                    id: op(id),
                    queued: true
                }]
            );
            assert_eq!(session.counters().started, id);
            submitted = route(&mut session, &completed(id, true));
        }

        assert!(submitted.is_empty());
        assert_eq!(
            session.counters(),
            OperationCounters {
                queued: 3,
                started: 3,
                completed: 3
            }
        );
        assert_eq!(reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn unqueued_completions_in_any_order() {
        let (callback, reports) = recorder();
        let mut session = Session::new();
        session.start_unqueued_batch(10, Some(callback));

        let order = [3, 1, 2, 5, 4, 6, 9, 7, 10, 8];
        for (seen, id) in order.into_iter().enumerate() {
            assert!(route(&mut session, &completed(id, false)).is_empty());
            assert!(session.counters().holds_invariant());
            let fired = reports.lock().unwrap().len();
            assert_eq!(fired, usize::from(seen == order.len() - 1));
        }

        let counters = session.counters();
        assert_eq!((counters.started, counters.completed), (10, 10));

        // Late duplicates never fire the callback again.
        route(&mut session, &completed(3, false));
        route(&mut session, &completed(99, false));
        assert_eq!(reports.lock().unwrap().len(), 1);
        assert_eq!(session.counters().completed, 10);
    }

    #[test]
    fn stray_completion_is_tolerated() {
        let mut session = Session::new();
        session.start_queued_batch(2, None);

        assert!(route(&mut session, &completed(99, false)).is_empty());
        let stats = session.stats();
        assert_eq!(stats.counters.completed, 1);
        assert_eq!(stats.stray_completions, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn stray_queued_completion_advances_queue() {
        let mut session = Session::new();
        session.start_queued_batch(2, None);

        let calls = route(&mut session, &completed(99, true));
        assert_eq!(
            calls,
            vec![HostCall::StartProcess {
                id: op(2),
                queued: true
            }]
        );
    }

    #[test]
    fn multiple_keys_are_all_routed() {
        let mut session = Session::new();
        session.start_unqueued_batch(2, None);

        let calls = route(
            &mut session,
            &json!({
                "networkRequestProcessId": 2,
                "completedProcessId": 1,
                "queued": false,
                "pongId": 4
            }),
        );
        assert_eq!(calls, vec![HostCall::FinishProcess { id: op(2) }]);
        assert_eq!(session.counters().completed, 1);
    }

    #[test]
    fn unrecognized_bodies_are_dropped() {
        let mut session = Session::new();
        session.start_queued_batch(1, None);
        let before = session.counters();

        for body in [
            json!({ "somethingElse": 1 }),
            json!({ "queued": true }),
            json!("completedProcessId"),
            json!({ "completedProcessId": "one" }),
            json!(null),
        ] {
            assert!(route(&mut session, &body).is_empty());
        }
        assert_eq!(session.counters(), before);
    }

    #[test]
    fn pong_changes_nothing() {
        let mut session = Session::new();
        session.start_unqueued_batch(1, None);
        let before = session.stats();

        assert!(route(&mut session, &json!({ "pongId": 1 })).is_empty());
        let after = session.stats();
        assert_eq!(after.counters, before.counters);
        assert_eq!(after.stray_completions, 0);
    }
}
