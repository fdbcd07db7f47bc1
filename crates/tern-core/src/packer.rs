//! Outgoing message packer: one queue, batch framing, byte budget.
//!
//! The packer drains ready entries in submission order into the largest
//! frame the budget allows. One entry goes out as a bare envelope; several
//! become a container whose members share a container id for bulk
//! correction bookkeeping. The container itself is never retried as a
//! unit; on failure its *members* are individually requeued.
//!
//! Packing never fails on its own: an empty queue yields `None` and the
//! send loop goes back to waiting. The only per-entry failure is a lone
//! body that cannot fit any frame, which rejects that call and moves on.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use bytes::BufMut;
use tokio::sync::Notify;
use tern_proto::{
    constructors, gzip_if_smaller, invoke_after, payloads::Container, Envelope, ENVELOPE_OVERHEAD,
};

use crate::{
    env::Environment,
    error::{CallError, SenderError},
    pending::{Call, PendingCalls, RecentAcks},
    session::SessionState,
};

/// One frame's worth of packed messages, ready for encryption.
#[derive(Debug)]
pub struct Packed {
    /// Encoded envelope (bare message or container), the cipher's input
    pub message: Vec<u8>,
    /// Number of member messages inside
    pub count: usize,
    /// Container id shared by the members, when a container was built
    pub container_id: Option<i64>,
}

/// FIFO queue of outgoing entries plus readiness signalling.
///
/// Cloning shares the queue; the send loop, submitters, the dispatcher
/// (retransmissions), and cancellation all work against one instance.
#[derive(Clone, Default)]
pub struct MessagePacker {
    inner: Arc<PackerInner>,
}

#[derive(Default)]
struct PackerInner {
    queue: Mutex<VecDeque<Call>>,
    ready: Notify,
}

impl MessagePacker {
    /// Create an empty packer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Call>> {
        self.inner.queue.lock().expect("packer queue poisoned")
    }

    /// Append an entry to the back of the queue.
    pub fn push(&self, call: Call) {
        self.lock().push_back(call);
        self.inner.ready.notify_waiters();
    }

    /// Append several entries, preserving their order.
    pub fn extend(&self, calls: Vec<Call>) {
        if calls.is_empty() {
            return;
        }
        let mut queue = self.lock();
        for call in calls {
            queue.push_back(call);
        }
        drop(queue);
        self.inner.ready.notify_waiters();
    }

    /// Put entries at the *front* of the queue, preserving their order.
    /// Used to requeue in-flight calls ahead of new submissions after a
    /// reconnect or correction.
    pub fn prepend(&self, calls: Vec<Call>) {
        if calls.is_empty() {
            return;
        }
        let mut queue = self.lock();
        for call in calls.into_iter().rev() {
            queue.push_front(call);
        }
        drop(queue);
        self.inner.ready.notify_waiters();
    }

    /// Suspend until at least one entry is queued.
    ///
    /// The waiter is registered *before* the emptiness check, so a push
    /// landing in between still wakes us. Notification is broadcast:
    /// superseded loop generations wake, observe staleness, and exit
    /// without stealing the wakeup from the live loop.
    pub async fn wait_ready(&self) {
        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Remove a queued entry by its stable key (cancellation path).
    pub fn remove_by_key(&self, key: u64) -> Option<Call> {
        let mut queue = self.lock();
        let index = queue.iter().position(|call| call.key() == key)?;
        queue.remove(index)
    }

    /// Remove and return every queued entry (session teardown).
    pub fn drain(&self) -> Vec<Call> {
        self.lock().drain(..).collect()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drain ready entries into one frame.
    ///
    /// Cancelled entries are rejected and skipped. Draining stops at the
    /// container byte budget or member cap; the remainder stays queued for
    /// the next frame. Entries of a registered kind enter the pending
    /// table under their new message id as part of packing, so a send
    /// failure after this point loses nothing.
    ///
    /// # Errors
    ///
    /// Only [`SenderError::Internal`] from a duplicate message id, which
    /// indicates broken id generation rather than any network condition.
    pub fn pack<E: Environment>(
        &self,
        session: &mut SessionState,
        pending: &PendingCalls,
        recent_acks: &RecentAcks,
        env: &E,
    ) -> Result<Option<Packed>, SenderError> {
        // Message ids are assigned inline while draining so that an entry
        // ordered after a predecessor in the same batch sees its id.
        let mut members = Vec::new();
        let mut packed: Vec<(i64, Call)> = Vec::new();

        let mut queue = self.lock();
        while let Some(call) = queue.pop_front() {
            if call.is_cancelled() {
                call.reject(CallError::Cancelled);
                continue;
            }

            let body = match call.after_id() {
                Some(after_id) => invoke_after(after_id, call.body()),
                None => call.body().clone(),
            };
            let body = gzip_if_smaller(call.kind().content_related(), body);
            let entry_len = body.len() + ENVELOPE_OVERHEAD;

            if members.len() + entry_len > Container::MAX_PAYLOAD {
                if packed.is_empty() {
                    tracing::warn!(
                        size = body.len(),
                        max = Container::MAX_PAYLOAD,
                        "request body too large for any frame"
                    );
                    call.reject(CallError::PayloadTooBig {
                        size: body.len(),
                        max: Container::MAX_PAYLOAD,
                    });
                    continue;
                }
                queue.push_front(call);
                break;
            }

            if packed.len() == Container::MAX_MESSAGES {
                queue.push_front(call);
                break;
            }

            let msg_id = session.next_msg_id(env);
            let seq_no = session.next_seq_no(call.kind().content_related());
            // Publish the id before encoding so same-batch dependents see it.
            let mut call = call;
            call.assign(msg_id, None);
            Envelope::new(msg_id, seq_no, body).encode(&mut members);
            packed.push((msg_id, call));
        }
        drop(queue);

        if packed.is_empty() {
            return Ok(None);
        }

        let count = packed.len();
        let (message, container_id) = if count == 1 {
            (members, None)
        } else {
            let mut container_body = Vec::with_capacity(8 + members.len());
            container_body.put_u32_le(constructors::CONTAINER);
            container_body.put_i32_le(count as i32);
            container_body.put_slice(&members);

            let container_msg_id = session.next_msg_id(env);
            let seq_no = session.next_seq_no(false);
            let mut outer = Vec::with_capacity(ENVELOPE_OVERHEAD + container_body.len());
            Envelope::new(container_msg_id, seq_no, container_body).encode(&mut outer);
            (outer, Some(container_msg_id))
        };

        for (msg_id, mut call) in packed {
            call.assign(msg_id, container_id);
            tracing::debug!(msg_id, kind = ?call.kind(), "assigned message id");
            if call.kind().registered() {
                pending.register(call)?;
            } else if call.kind() == crate::pending::OutgoingKind::Ack {
                recent_acks.push(call);
            }
        }

        Ok(Some(Packed { message, count, container_id }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{pending::OutgoingKind, testutil::TestEnv};

    fn fixture() -> (MessagePacker, SessionState, PendingCalls, RecentAcks, TestEnv) {
        let env = TestEnv::new(1_700_000_000);
        let session = SessionState::new(&env);
        (MessagePacker::new(), session, PendingCalls::new(), RecentAcks::new(), env)
    }

    fn request(len: usize) -> (Call, tokio::sync::oneshot::Receiver<crate::pending::CallResult>) {
        Call::request(Bytes::from(vec![7u8; len]), None)
    }

    #[test]
    fn empty_queue_packs_nothing() {
        let (packer, mut session, pending, acks, env) = fixture();
        let packed = packer.pack(&mut session, &pending, &acks, &env).expect("no failure");
        assert!(packed.is_none());
    }

    #[test]
    fn single_entry_is_bare_message() {
        let (packer, mut session, pending, acks, env) = fixture();
        let (call, _rx) = request(16);
        packer.push(call);

        let packed =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("one frame");
        assert_eq!(packed.count, 1);
        assert_eq!(packed.container_id, None);

        let envelope = Envelope::decode(&mut packed.message.as_slice()).expect("bare envelope");
        assert!(envelope.is_content_related());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn several_entries_become_container() {
        let (packer, mut session, pending, acks, env) = fixture();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (call, rx) = request(16);
            packer.push(call);
            receivers.push(rx);
        }

        let packed =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("one frame");
        assert_eq!(packed.count, 3);
        let container_id = packed.container_id.expect("container id");

        let envelope = Envelope::decode(&mut packed.message.as_slice()).expect("outer envelope");
        assert_eq!(envelope.msg_id, container_id);
        assert!(!envelope.is_content_related(), "container is content-unrelated");

        let mut body = &envelope.body[4..];
        let container = Container::decode(&mut body).expect("container body");
        assert_eq!(container.messages.len(), 3);

        // Members share the container id for bulk corrections.
        assert_eq!(pending.pop_by_container(container_id).len(), 3);
    }

    #[test]
    fn byte_budget_splits_batches() {
        let (packer, mut session, pending, acks, env) = fixture();
        // Two bodies that cannot share one container under the budget.
        // Random-ish content, so compression cannot shrink them back in.
        let big = (Container::MAX_PAYLOAD / 2) + 1024;
        let mut receivers = Vec::new();
        for seed in [1u32, 2u32] {
            let body: Vec<u8> = (0..big as u32)
                .map(|i| {
                    let mut x = i.wrapping_mul(seed).wrapping_mul(2_654_435_761);
                    x ^= x >> 15;
                    x = x.wrapping_mul(2_246_822_519);
                    x ^= x >> 13;
                    (x & 0xff) as u8
                })
                .collect();
            let (call, rx) = Call::request(Bytes::from(body), None);
            packer.push(call);
            receivers.push(rx);
        }

        let first =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("frame 1");
        assert_eq!(first.count, 1);
        assert!(first.message.len() <= Container::MAX_PAYLOAD + ENVELOPE_OVERHEAD);

        let second =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("frame 2");
        assert_eq!(second.count, 1);
        assert!(packer.is_empty());
    }

    #[test]
    fn member_cap_splits_batches() {
        let (packer, mut session, pending, acks, env) = fixture();
        let mut receivers = Vec::new();
        for _ in 0..Container::MAX_MESSAGES + 5 {
            let (call, rx) = request(4);
            packer.push(call);
            receivers.push(rx);
        }

        let first =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("frame 1");
        assert_eq!(first.count, Container::MAX_MESSAGES);
        assert_eq!(packer.len(), 5);
    }

    #[test]
    fn oversized_lone_entry_rejected() {
        let (packer, mut session, pending, acks, env) = fixture();
        let body: Vec<u8> = (0..(Container::MAX_PAYLOAD as u32 + 64))
            .map(|i| {
                let mut x = i.wrapping_mul(2_654_435_761);
                x ^= x >> 15;
                x = x.wrapping_mul(2_246_822_519);
                x ^= x >> 13;
                (x & 0xff) as u8
            })
            .collect();
        let (call, mut rx) = Call::request(Bytes::from(body), None);
        packer.push(call);

        let packed = packer.pack(&mut session, &pending, &acks, &env).expect("no failure");
        assert!(packed.is_none());
        assert!(matches!(rx.try_recv(), Ok(Err(CallError::PayloadTooBig { .. }))));
        assert!(pending.is_empty());
    }

    #[test]
    fn cancelled_entry_rejected_and_skipped() {
        let (packer, mut session, pending, acks, env) = fixture();
        let token = CancellationToken::new();
        let (cancelled, mut rx) = Call::request(Bytes::from_static(b"dead"), Some(token.clone()));
        let (live, _rx2) = request(8);
        packer.push(cancelled);
        packer.push(live);
        token.cancel();

        let packed =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("one frame");
        assert_eq!(packed.count, 1);
        assert!(matches!(rx.try_recv(), Ok(Err(CallError::Cancelled))));
    }

    #[test]
    fn acks_land_in_recent_ring() {
        let (packer, mut session, pending, acks, env) = fixture();
        let ack_body = tern_proto::payloads::MsgsAck { msg_ids: vec![4, 8] }.to_body();
        packer.push(Call::service(OutgoingKind::Ack, ack_body));
        let (call, _rx) = request(8);
        packer.push(call);

        let packed =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("one frame");
        let container_id = packed.container_id.expect("container");

        // Only the request is in the table; the ack is in the ring.
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.pop_by_container(container_id).len(), 1);
    }

    #[test]
    fn dependency_wrapped_at_pack_time() {
        let (packer, mut session, pending, acks, env) = fixture();
        let (first, _rx1) = request(8);
        let (second, _rx2) = request(8);
        let second = second.after(&first);
        packer.push(first);
        packer.push(second);

        let packed =
            packer.pack(&mut session, &pending, &acks, &env).expect("no failure").expect("one frame");
        assert_eq!(packed.count, 2);

        let envelope = Envelope::decode(&mut packed.message.as_slice()).expect("outer");
        let mut body = &envelope.body[4..];
        let container = Container::decode(&mut body).expect("container");

        let first_id = container.messages[0].msg_id;
        let mut dependent = &container.messages[1].body[..];
        use bytes::Buf;
        assert_eq!(dependent.get_u32_le(), constructors::INVOKE_AFTER);
        assert_eq!(dependent.get_i64_le(), first_id);
    }

    #[tokio::test]
    async fn wait_ready_wakes_on_push() {
        let packer = MessagePacker::new();
        let waiter = {
            let packer = packer.clone();
            tokio::spawn(async move { packer.wait_ready().await })
        };
        tokio::task::yield_now().await;

        let (call, _rx) = request(8);
        packer.push(call);
        waiter.await.expect("waiter completes");
    }
}
