//! Control-message dispatcher.
//!
//! One typed `match` over [`ControlMessage`] replaces the dynamic handler
//! table of older designs: every message kind has exactly one arm, and a
//! new kind is a compile error until it is handled. The dispatcher is
//! fully synchronous; everything it touches (table, packer, session,
//! events) completes without suspension, which is what lets the receive
//! loop process frames in arrival order.
//!
//! Resolution policy for ids with no matching pending entry is an
//! idempotent no-op, logged for telemetry. On the long-poll fallback the
//! server may deliver results at-least-once, so duplicates are expected
//! there and must stay harmless.

use std::collections::HashSet;
use std::sync::Mutex;

use bytes::Bytes;
use tern_proto::{
    gzip_unpack,
    payloads::{BadMsgPolicy, ControlMessage, MsgsStateInfo, RpcError, RpcResult},
    Envelope, MessageKind, ProtocolError,
};

use crate::{
    env::Environment,
    error::CallError,
    packer::MessagePacker,
    pending::{Call, OutgoingKind, PendingCalls, RecentAcks},
    schema::Schema,
    sender::SenderEvent,
    session::SessionState,
};

/// Everything a dispatch step may touch, borrowed from the sender.
pub(crate) struct DispatchCtx<'a, S: Schema, E: Environment> {
    pub session: &'a Mutex<SessionState>,
    pub pending: &'a PendingCalls,
    pub packer: &'a MessagePacker,
    pub recent_acks: &'a RecentAcks,
    pub pending_ack: &'a Mutex<HashSet<i64>>,
    pub schema: &'a S,
    pub env: &'a E,
    pub events: &'a (dyn Fn(SenderEvent) + Send + Sync),
}

impl<S: Schema, E: Environment> DispatchCtx<'_, S, E> {
    fn session(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.session.lock().expect("session state poisoned")
    }

    fn queue_ack(&self, msg_id: i64) {
        self.pending_ack.lock().expect("pending-ack set poisoned").insert(msg_id);
    }

    /// Pop every call affected by a correction referencing `msg_id`:
    /// a direct hit, a whole container's members, or a recently sent ack.
    fn pop_states(&self, msg_id: i64) -> Vec<Call> {
        if let Some(call) = self.pending.pop(msg_id) {
            return vec![call];
        }
        let members = self.pending.pop_by_container(msg_id);
        if !members.is_empty() {
            return members;
        }
        match self.recent_acks.take(msg_id) {
            Some(ack) => vec![ack],
            None => Vec::new(),
        }
    }
}

/// Dispatch one decrypted envelope.
///
/// # Errors
///
/// Returns [`ProtocolError`] when a control payload is malformed. The
/// receive loop logs and skips such frames; they are not fatal to the
/// connection.
pub(crate) fn process_message<S: Schema, E: Environment>(
    ctx: &DispatchCtx<'_, S, E>,
    envelope: Envelope,
) -> Result<(), ProtocolError> {
    let control = ControlMessage::decode(&envelope.body)?;

    // Bare acks resolve nothing and are never acknowledged back.
    if matches!(control, ControlMessage::MsgsAck(_)) {
        tracing::trace!(msg_id = envelope.msg_id, "received bare acknowledgment");
        return Ok(());
    }

    ctx.queue_ack(envelope.msg_id);

    match control {
        ControlMessage::RpcResult(result) => handle_rpc_result(ctx, &result),

        ControlMessage::Container(container) => {
            tracing::debug!(
                msg_id = envelope.msg_id,
                count = container.messages.len(),
                "dispatching container"
            );
            for inner in container.messages {
                if let Err(error) = process_message(ctx, inner) {
                    tracing::warn!(%error, "skipping malformed container member");
                }
            }
        }

        ControlMessage::GzipPacked(inner) => {
            // Same envelope identity, unwrapped body.
            return process_message(
                ctx,
                Envelope::new(envelope.msg_id, envelope.seq_no, inner),
            );
        }

        ControlMessage::Pong(pong) => {
            let offset = ctx.session().update_time_offset(envelope.msg_id, ctx.env);
            (ctx.events)(SenderEvent::TimeOffsetChanged(offset));

            tracing::debug!(msg_id = pong.msg_id, ping_id = pong.ping_id, "pong");
            if !ctx.pending.resolve(pong.msg_id, envelope.body.clone()) {
                tracing::debug!(msg_id = pong.msg_id, "pong without pending ping");
            }
        }

        ControlMessage::BadServerSalt(correction) => {
            ctx.session().set_salt(correction.new_server_salt);
            let states = ctx.pop_states(correction.bad_msg_id);
            tracing::debug!(
                bad_msg_id = correction.bad_msg_id,
                resend = states.len(),
                "server salt corrected"
            );
            ctx.packer.extend(states);
        }

        ControlMessage::BadMsgNotification(notification) => {
            let states = ctx.pop_states(notification.bad_msg_id);
            match notification.policy() {
                BadMsgPolicy::ClockSkew => {
                    let offset = ctx.session().update_time_offset(envelope.msg_id, ctx.env);
                    (ctx.events)(SenderEvent::TimeOffsetChanged(offset));
                    tracing::info!(offset, "local clock is skewed, corrected from server id");
                }
                BadMsgPolicy::SeqNoTooLow => ctx.session().adjust_sequence(64),
                BadMsgPolicy::SeqNoTooHigh => ctx.session().adjust_sequence(-16),
                BadMsgPolicy::Terminal => {
                    tracing::warn!(
                        code = notification.error_code,
                        rejected = states.len(),
                        "terminal bad-message code"
                    );
                    for call in states {
                        call.reject(CallError::BadMessage { code: notification.error_code });
                    }
                    return Ok(());
                }
            }
            tracing::debug!(resend = states.len(), "retransmitting after correction");
            ctx.packer.extend(states);
        }

        ControlMessage::MsgDetailedInfo(info) => ctx.queue_ack(info.answer_msg_id),
        ControlMessage::MsgNewDetailedInfo(info) => ctx.queue_ack(info.answer_msg_id),

        ControlMessage::NewSessionCreated(notice) => {
            tracing::debug!("new session created by server");
            ctx.session().set_salt(notice.server_salt);
        }

        ControlMessage::FutureSalts(salts) => {
            if !ctx.pending.resolve(salts.req_msg_id, envelope.body.clone()) {
                tracing::debug!(req_msg_id = salts.req_msg_id, "future salts without request");
            }
        }

        ControlMessage::MsgsStateReq(request) | ControlMessage::MsgResendReq(request) => {
            // The server forgot about these ids; report "received" for
            // each. The reply is fire-and-forget.
            let reply = MsgsStateInfo {
                req_msg_id: envelope.msg_id,
                info: Bytes::from(vec![1u8; request.msg_ids.len()]),
            };
            ctx.packer.push(Call::service(OutgoingKind::StateInfo, reply.to_body()));
        }

        ControlMessage::MsgsAllInfo(_) => {
            tracing::debug!("message state summary (no action)");
        }

        // Handled before the match.
        ControlMessage::MsgsAck(_) => unreachable!("bare acks return early"),

        ControlMessage::Other { constructor, body } => {
            if ctx.schema.is_update(&body) {
                (ctx.events)(SenderEvent::Update(body));
            } else {
                tracing::warn!(constructor, "not an update, dropping");
            }
        }
    }

    Ok(())
}

fn handle_rpc_result<S: Schema, E: Environment>(ctx: &DispatchCtx<'_, S, E>, result: &RpcResult) {
    let Some(call) = ctx.pending.pop(result.req_msg_id) else {
        // Expected on the fallback transport, where delivery is
        // at-least-once; kept visible for telemetry either way.
        tracing::warn!(req_msg_id = result.req_msg_id, "result without matching pending call");
        return;
    };

    match RpcError::from_body(&result.body) {
        Ok(Some(error)) => {
            // The request is still acknowledged even though it failed.
            ctx.queue_ack(call.msg_id());
            tracing::debug!(code = error.code, message = %error.message, "call failed server-side");
            call.reject(ctx.schema.map_rpc_error(error.code, &error.message));
            return;
        }
        Ok(None) => {}
        Err(error) => {
            call.reject(CallError::Schema(crate::schema::SchemaError::ResultMismatch(
                error.to_string(),
            )));
            return;
        }
    }

    // A large result may arrive compressed; unwrap before decoding.
    let body = match MessageKind::of_body(&result.body) {
        Ok(MessageKind::GzipPacked) => match gzip_unpack(&mut &result.body[4..]) {
            Ok(inner) => inner,
            Err(error) => {
                call.reject(CallError::Schema(crate::schema::SchemaError::ResultMismatch(
                    error.to_string(),
                )));
                return;
            }
        },
        _ => result.body.clone(),
    };

    match ctx.schema.decode_result(call.body(), &body) {
        Ok(decoded) => call.resolve(decoded),
        Err(error) => call.reject(CallError::Schema(error)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::BufMut;
    use tern_proto::{constructors, payloads::MsgsAck};
    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        pending::CallResult,
        testutil::{TestEnv, TestSchema, UPDATE_CONSTRUCTOR},
    };

    struct Fixture {
        session: Mutex<SessionState>,
        pending: PendingCalls,
        packer: MessagePacker,
        recent_acks: RecentAcks,
        pending_ack: Mutex<HashSet<i64>>,
        schema: TestSchema,
        env: TestEnv,
        events: Arc<Mutex<Vec<SenderEvent>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let env = TestEnv::new(1_700_000_000);
            Self {
                session: Mutex::new(SessionState::new(&env)),
                pending: PendingCalls::new(),
                packer: MessagePacker::new(),
                recent_acks: RecentAcks::new(),
                pending_ack: Mutex::new(HashSet::new()),
                schema: TestSchema,
                env,
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn dispatch(&self, envelope: Envelope) -> Result<(), ProtocolError> {
            let events = self.events.clone();
            let sink = move |event: SenderEvent| {
                events.lock().expect("events").push(event);
            };
            let ctx = DispatchCtx {
                session: &self.session,
                pending: &self.pending,
                packer: &self.packer,
                recent_acks: &self.recent_acks,
                pending_ack: &self.pending_ack,
                schema: &self.schema,
                env: &self.env,
                events: &sink,
            };
            process_message(&ctx, envelope)
        }

        fn register_call(&self, msg_id: i64, container: Option<i64>) -> oneshot::Receiver<CallResult> {
            let (mut call, rx) = Call::request(Bytes::from_static(b"req"), None);
            call.assign(msg_id, container);
            self.pending.register(call).expect("register");
            rx
        }

        fn acked(&self, msg_id: i64) -> bool {
            self.pending_ack.lock().expect("acks").contains(&msg_id)
        }
    }

    fn rpc_result_envelope(server_msg_id: i64, req_msg_id: i64, payload: &[u8]) -> Envelope {
        let mut body = Vec::new();
        body.put_u32_le(constructors::RPC_RESULT);
        body.put_i64_le(req_msg_id);
        body.put_slice(payload);
        Envelope::new(server_msg_id, 1, body)
    }

    #[test]
    fn rpc_result_resolves_call() {
        let fixture = Fixture::new();
        let mut rx = fixture.register_call(64, None);

        fixture
            .dispatch(rpc_result_envelope(1001, 64, &[0xaa, 0xbb, 0xcc, 0xdd]))
            .expect("dispatch");

        assert_eq!(rx.try_recv().expect("resolved"), Ok(Bytes::from_static(&[0xaa, 0xbb, 0xcc, 0xdd])));
        assert!(fixture.acked(1001), "result envelope gets acknowledged");
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn rpc_error_rejects_with_typed_error() {
        let fixture = Fixture::new();
        let mut rx = fixture.register_call(64, None);

        let mut error_body = Vec::new();
        error_body.put_u32_le(constructors::RPC_ERROR);
        error_body.put_i32_le(420);
        tern_proto::write_bytes(&mut error_body, b"FLOOD_WAIT_7");

        fixture.dispatch(rpc_result_envelope(1001, 64, &error_body)).expect("dispatch");

        assert_eq!(
            rx.try_recv().expect("rejected"),
            Err(CallError::Rpc { code: 420, message: "FLOOD_WAIT_7".into() })
        );
        // Both the result envelope and the failed request are acknowledged.
        assert!(fixture.acked(1001));
        assert!(fixture.acked(64));
    }

    #[test]
    fn unknown_result_id_is_noop() {
        let fixture = Fixture::new();
        fixture.dispatch(rpc_result_envelope(1001, 9999, &[1, 2, 3, 4])).expect("dispatch");
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn duplicate_result_second_copy_noop() {
        let fixture = Fixture::new();
        let mut rx = fixture.register_call(64, None);

        fixture.dispatch(rpc_result_envelope(1001, 64, &[1, 1, 1, 1])).expect("dispatch");
        fixture.dispatch(rpc_result_envelope(1002, 64, &[2, 2, 2, 2])).expect("dispatch");

        // Exactly one value reached the awaiter, from the first copy.
        assert_eq!(rx.try_recv().expect("resolved"), Ok(Bytes::from_static(&[1, 1, 1, 1])));
    }

    #[test]
    fn bad_salt_replaces_salt_and_requeues() {
        let fixture = Fixture::new();
        let _rx = fixture.register_call(64, None);

        let mut body = Vec::new();
        body.put_u32_le(constructors::BAD_SERVER_SALT);
        body.put_i64_le(64); // bad_msg_id
        body.put_i32_le(1);
        body.put_i32_le(48);
        body.put_i64_le(0x000d_5a17); // new salt

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");

        assert_eq!(fixture.session.lock().unwrap().salt(), 0x000d_5a17);
        assert!(fixture.pending.is_empty(), "call left the table");
        assert_eq!(fixture.packer.len(), 1, "call requeued for retransmission");
    }

    #[test]
    fn bad_salt_on_container_requeues_members() {
        let fixture = Fixture::new();
        let _rx_a = fixture.register_call(64, Some(1000));
        let _rx_b = fixture.register_call(68, Some(1000));

        let mut body = Vec::new();
        body.put_u32_le(constructors::BAD_SERVER_SALT);
        body.put_i64_le(1000); // container id
        body.put_i32_le(0);
        body.put_i32_le(48);
        body.put_i64_le(7);

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");
        assert_eq!(fixture.packer.len(), 2, "both members requeued");
    }

    #[test]
    fn clock_skew_code_updates_offset_and_requeues() {
        let fixture = Fixture::new();
        let _rx = fixture.register_call(64, None);

        let mut body = Vec::new();
        body.put_u32_le(constructors::BAD_MSG_NOTIFICATION);
        body.put_i64_le(64);
        body.put_i32_le(1);
        body.put_i32_le(16); // id too low: clock skew

        // Server envelope id claims t+40s.
        let server_id = (1_700_000_040i64) << 32;
        fixture.dispatch(Envelope::new(server_id, 0, body)).expect("dispatch");

        assert_eq!(fixture.session.lock().unwrap().time_offset(), 40);
        assert_eq!(fixture.packer.len(), 1);
        let events = fixture.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, SenderEvent::TimeOffsetChanged(40))));
    }

    #[test]
    fn sequence_codes_nudge_sequence() {
        let fixture = Fixture::new();
        let _rx = fixture.register_call(64, None);

        let mut body = Vec::new();
        body.put_u32_le(constructors::BAD_MSG_NOTIFICATION);
        body.put_i64_le(64);
        body.put_i32_le(1);
        body.put_i32_le(32); // seq too low

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");

        // sequence 0 + 64 -> next content seq = 64*2+1
        assert_eq!(fixture.session.lock().unwrap().next_seq_no(true), 129);
        assert_eq!(fixture.packer.len(), 1);
    }

    #[test]
    fn terminal_code_rejects_calls() {
        let fixture = Fixture::new();
        let mut rx = fixture.register_call(64, None);

        let mut body = Vec::new();
        body.put_u32_le(constructors::BAD_MSG_NOTIFICATION);
        body.put_i64_le(64);
        body.put_i32_le(1);
        body.put_i32_le(48); // not in the recoverable set, terminal here

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");

        assert_eq!(rx.try_recv().expect("rejected"), Err(CallError::BadMessage { code: 48 }));
        assert_eq!(fixture.packer.len(), 0, "terminal codes do not retransmit");
    }

    #[test]
    fn detailed_info_queues_answer_ack() {
        let fixture = Fixture::new();

        let mut body = Vec::new();
        body.put_u32_le(constructors::MSG_DETAILED_INFO);
        body.put_i64_le(64); // our msg
        body.put_i64_le(7777); // answer to acknowledge
        body.put_i32_le(128);
        body.put_i32_le(0);

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");
        assert!(fixture.acked(7777));
    }

    #[test]
    fn new_session_adopts_salt() {
        let fixture = Fixture::new();

        let mut body = Vec::new();
        body.put_u32_le(constructors::NEW_SESSION_CREATED);
        body.put_i64_le(1);
        body.put_i64_le(2);
        body.put_i64_le(0xbeef);

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");
        assert_eq!(fixture.session.lock().unwrap().salt(), 0xbeef);
    }

    #[test]
    fn state_req_enqueues_synthetic_reply() {
        let fixture = Fixture::new();

        let mut body = Vec::new();
        body.put_u32_le(constructors::MSGS_STATE_REQ);
        tern_proto::write_i64_vector(&mut body, &[10, 20, 30]);

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");
        assert_eq!(fixture.packer.len(), 1, "state-info reply queued");
    }

    #[test]
    fn container_members_dispatched_individually() {
        let fixture = Fixture::new();
        let mut rx = fixture.register_call(64, None);

        let inner = rpc_result_envelope(2001, 64, &[5, 5, 5, 5]);
        let mut container_body = Vec::new();
        container_body.put_u32_le(constructors::CONTAINER);
        container_body.put_i32_le(1);
        inner.encode(&mut container_body);

        fixture.dispatch(Envelope::new(1001, 0, container_body)).expect("dispatch");

        assert_eq!(rx.try_recv().expect("resolved"), Ok(Bytes::from_static(&[5, 5, 5, 5])));
        // Container and member both acknowledged.
        assert!(fixture.acked(1001));
        assert!(fixture.acked(2001));
    }

    #[test]
    fn bare_ack_is_noop_and_not_acked() {
        let fixture = Fixture::new();
        let body = MsgsAck { msg_ids: vec![64] }.to_body();

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");
        assert!(!fixture.acked(1001));
    }

    #[test]
    fn update_forwarded_to_callback() {
        let fixture = Fixture::new();

        let mut body = Vec::new();
        body.put_u32_le(UPDATE_CONSTRUCTOR);
        body.put_slice(&[9u8; 8]);
        let body = Bytes::from(body);

        fixture.dispatch(Envelope::new(1001, 0, body.clone())).expect("dispatch");

        let events = fixture.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, SenderEvent::Update(b) if *b == body)));
    }

    #[test]
    fn non_update_unknown_body_dropped() {
        let fixture = Fixture::new();

        let mut body = Vec::new();
        body.put_u32_le(0x0bad_0001);
        body.put_slice(&[0u8; 8]);

        fixture.dispatch(Envelope::new(1001, 0, body)).expect("dispatch");
        let events = fixture.events.lock().unwrap();
        assert!(events.iter().all(|e| !matches!(e, SenderEvent::Update(_))));
    }

    #[test]
    fn pong_resolves_ping_and_updates_offset() {
        let fixture = Fixture::new();
        let mut rx = fixture.register_call(64, None);

        let mut body = Vec::new();
        body.put_u32_le(constructors::PONG);
        body.put_i64_le(64); // our ping's msg id
        body.put_i64_le(0x1234); // ping id

        let server_id = (1_700_000_010i64) << 32;
        fixture.dispatch(Envelope::new(server_id, 0, body)).expect("dispatch");

        assert!(rx.try_recv().expect("resolved").is_ok());
        assert_eq!(fixture.session.lock().unwrap().time_offset(), 10);
    }
}
