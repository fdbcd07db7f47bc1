//! Outgoing call bookkeeping: the pending-call table and the recent-ack
//! ring.
//!
//! A [`Call`] is the unit that travels through the whole pipeline: queued
//! in the packer, registered here once a message id is assigned, and
//! finally consumed by resolution, rejection, or retransmission. The table
//! uses remove-and-return semantics everywhere: an entry leaves the map
//! *before* its slot is completed, so no control message can act on it
//! twice and bulk corrections never fight iterator invalidation.
//!
//! # Invariant
//!
//! A message id is present from the moment packing registers it until
//! exactly one of resolve / reject / pop-for-retransmission happens.
//! The result slot is a oneshot channel, so at-most-once delivery to the
//! awaiter holds by construction even if a caller misuses the table.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{CallError, SenderError};

/// Result delivered to a call's awaiter.
pub type CallResult = Result<Bytes, CallError>;

/// How many recently sent bare-ack batches are retained for corrections.
const RECENT_ACKS_CAPACITY: usize = 10;

static NEXT_CALL_KEY: AtomicU64 = AtomicU64::new(1);

/// What an outgoing entry is, which controls sequencing, registration, and
/// retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingKind {
    /// An application call: content-related, registered in the table,
    /// resolved by a later control message
    Call,
    /// A bare acknowledgment batch: content-unrelated, kept only in the
    /// recent-ack ring
    Ack,
    /// A synthetic state-info reply: content-unrelated, fire-and-forget
    StateInfo,
    /// A long-poll control call: content-related on the wire but never
    /// awaited and never registered
    LongPoll,
}

impl OutgoingKind {
    /// Whether messages of this kind advance the content sequence.
    #[must_use]
    pub const fn content_related(self) -> bool {
        matches!(self, Self::Call | Self::LongPoll)
    }

    /// Whether packed messages of this kind enter the pending table.
    #[must_use]
    pub const fn registered(self) -> bool {
        matches!(self, Self::Call)
    }
}

/// One outgoing message with everything needed to resolve it later.
#[derive(Debug)]
pub struct Call {
    key: u64,
    kind: OutgoingKind,
    body: Bytes,
    msg_id: Arc<AtomicI64>,
    container_id: Option<i64>,
    after: Option<Arc<AtomicI64>>,
    cancel: Option<CancellationToken>,
    slot: Option<oneshot::Sender<CallResult>>,
}

impl Call {
    /// Create an awaitable application call. Returns the call and the
    /// receiver its awaiter consumes.
    pub fn request(
        body: Bytes,
        cancel: Option<CancellationToken>,
    ) -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            key: NEXT_CALL_KEY.fetch_add(1, Ordering::Relaxed),
            kind: OutgoingKind::Call,
            body,
            msg_id: Arc::new(AtomicI64::new(0)),
            container_id: None,
            after: None,
            cancel,
            slot: Some(tx),
        };
        (call, rx)
    }

    /// Create a fire-and-forget service message (ack, state info,
    /// long-poll).
    #[must_use]
    pub fn service(kind: OutgoingKind, body: Bytes) -> Self {
        Self {
            key: NEXT_CALL_KEY.fetch_add(1, Ordering::Relaxed),
            kind,
            body,
            msg_id: Arc::new(AtomicI64::new(0)),
            container_id: None,
            after: None,
            cancel: None,
            slot: None,
        }
    }

    /// Order this call after another one: the packer wraps the body so the
    /// server executes it only once the predecessor completed.
    #[must_use]
    pub fn after(mut self, predecessor: &Self) -> Self {
        self.after = Some(predecessor.msg_id.clone());
        self
    }

    /// Same as [`Self::after`], via the shared id cell of an already
    /// submitted call.
    pub(crate) fn set_after_cell(&mut self, cell: Arc<AtomicI64>) {
        self.after = Some(cell);
    }

    /// Stable local identity, independent of message-id reassignment on
    /// retransmission.
    #[must_use]
    pub fn key(&self) -> u64 {
        self.key
    }

    /// The entry's kind.
    #[must_use]
    pub fn kind(&self) -> OutgoingKind {
        self.kind
    }

    /// The request body as submitted (before wrapping or compression).
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Currently assigned message id; 0 before first packing.
    #[must_use]
    pub fn msg_id(&self) -> i64 {
        self.msg_id.load(Ordering::Acquire)
    }

    /// Shared cell holding the assigned message id, for dependents.
    #[must_use]
    pub fn msg_id_cell(&self) -> Arc<AtomicI64> {
        self.msg_id.clone()
    }

    /// Message id of the predecessor this call is ordered after, if any
    /// and if already assigned.
    #[must_use]
    pub fn after_id(&self) -> Option<i64> {
        self.after.as_ref().map(|cell| cell.load(Ordering::Acquire)).filter(|id| *id != 0)
    }

    /// Container the call was last sent in, if any.
    #[must_use]
    pub fn container_id(&self) -> Option<i64> {
        self.container_id
    }

    /// Record the ids assigned during packing.
    pub fn assign(&mut self, msg_id: i64, container_id: Option<i64>) {
        self.msg_id.store(msg_id, Ordering::Release);
        self.container_id = container_id;
    }

    /// Whether the caller has cancelled this call.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Complete the call with a successful result. A dropped awaiter is
    /// fine; the value is discarded.
    pub fn resolve(mut self, value: Bytes) {
        if let Some(slot) = self.slot.take() {
            let _ = slot.send(Ok(value));
        }
    }

    /// Complete the call with an error.
    pub fn reject(mut self, error: CallError) {
        if let Some(slot) = self.slot.take() {
            let _ = slot.send(Err(error));
        }
    }
}

/// Concurrent map of in-flight calls keyed by message id.
///
/// Cloning shares the underlying table, so loops, the dispatcher, and
/// cancellation paths all see one view. Every operation is atomic with
/// respect to the others; no caller ever observes a half-updated entry.
#[derive(Clone, Default)]
pub struct PendingCalls {
    inner: Arc<Mutex<HashMap<i64, Call>>>,
}

impl PendingCalls {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Call>> {
        self.inner.lock().expect("pending-call table poisoned")
    }

    /// Insert a packed call under its assigned message id.
    ///
    /// # Errors
    ///
    /// A duplicate id means id generation is broken; that is an internal
    /// consistency failure, never a network condition.
    pub fn register(&self, call: Call) -> Result<(), SenderError> {
        let msg_id = call.msg_id();
        debug_assert_ne!(msg_id, 0, "register before assigning a message id");

        let mut table = self.lock();
        if table.contains_key(&msg_id) {
            return Err(SenderError::Internal("duplicate outgoing message id"));
        }
        table.insert(msg_id, call);
        Ok(())
    }

    /// Remove and return the call for `msg_id`, if present.
    pub fn pop(&self, msg_id: i64) -> Option<Call> {
        self.lock().remove(&msg_id)
    }

    /// Remove and return every call sent inside the given container.
    pub fn pop_by_container(&self, container_id: i64) -> Vec<Call> {
        let mut table = self.lock();
        let ids: Vec<i64> = table
            .iter()
            .filter(|(_, call)| call.container_id() == Some(container_id))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter_map(|id| table.remove(&id)).collect()
    }

    /// Remove and return everything, for requeueing on reconnect.
    pub fn pop_all(&self) -> Vec<Call> {
        self.lock().drain().map(|(_, call)| call).collect()
    }

    /// Remove a call by its stable key (cancellation path).
    pub fn remove_by_key(&self, key: u64) -> Option<Call> {
        let mut table = self.lock();
        let msg_id = table.iter().find(|(_, call)| call.key() == key).map(|(id, _)| *id)?;
        table.remove(&msg_id)
    }

    /// Resolve the call for `msg_id`. Absent ids are a no-op, which is
    /// what makes duplicate notifications harmless.
    pub fn resolve(&self, msg_id: i64, value: Bytes) -> bool {
        match self.pop(msg_id) {
            Some(call) => {
                call.resolve(value);
                true
            }
            None => false,
        }
    }

    /// Reject the call for `msg_id`. Absent ids are a no-op.
    pub fn reject(&self, msg_id: i64, error: CallError) -> bool {
        match self.pop(msg_id) {
            Some(call) => {
                call.reject(error);
                true
            }
            None => false,
        }
    }

    /// Number of in-flight calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Bounded ring of recently sent bare-ack batches.
///
/// Acks are never acknowledged themselves, so they leave no pending-table
/// trace; the server may still reference their ids in a salt correction.
/// The ring keeps just enough history to retransmit them.
#[derive(Clone, Default)]
pub struct RecentAcks {
    inner: Arc<Mutex<VecDeque<Call>>>,
}

impl RecentAcks {
    /// Create an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sent ack batch, evicting the oldest past capacity.
    pub fn push(&self, call: Call) {
        let mut ring = self.inner.lock().expect("recent-ack ring poisoned");
        if ring.len() >= RECENT_ACKS_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(call);
    }

    /// Remove and return the ack batch sent under `msg_id`, if retained.
    pub fn take(&self, msg_id: i64) -> Option<Call> {
        let mut ring = self.inner.lock().expect("recent-ack ring poisoned");
        let index = ring.iter().position(|call| call.msg_id() == msg_id)?;
        ring.remove(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(table: &PendingCalls, msg_id: i64, container: Option<i64>) -> oneshot::Receiver<CallResult> {
        let (mut call, rx) = Call::request(Bytes::from_static(b"body"), None);
        call.assign(msg_id, container);
        table.register(call).expect("register");
        rx
    }

    #[test]
    fn resolve_consumes_entry() {
        let table = PendingCalls::new();
        let mut rx = registered(&table, 4, None);

        assert!(table.resolve(4, Bytes::from_static(b"ok")));
        assert!(table.is_empty());
        assert_eq!(rx.try_recv().expect("delivered"), Ok(Bytes::from_static(b"ok")));

        // Second notification for the same id is a no-op.
        assert!(!table.resolve(4, Bytes::from_static(b"again")));
    }

    #[test]
    fn duplicate_registration_is_internal_error() {
        let table = PendingCalls::new();
        let _rx = registered(&table, 8, None);

        let (mut call, _rx2) = Call::request(Bytes::from_static(b"dup"), None);
        call.assign(8, None);
        assert!(matches!(table.register(call), Err(SenderError::Internal(_))));
    }

    #[test]
    fn pop_by_container_returns_only_members() {
        let table = PendingCalls::new();
        let _a = registered(&table, 4, Some(100));
        let _b = registered(&table, 8, Some(100));
        let _c = registered(&table, 12, Some(200));

        let members = table.pop_by_container(100);
        assert_eq!(members.len(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn pop_all_drains() {
        let table = PendingCalls::new();
        let _a = registered(&table, 4, None);
        let _b = registered(&table, 8, None);

        assert_eq!(table.pop_all().len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_by_key_finds_call() {
        let table = PendingCalls::new();
        let (mut call, _rx) = Call::request(Bytes::from_static(b"x"), None);
        call.assign(16, None);
        let key = call.key();
        table.register(call).expect("register");

        assert!(table.remove_by_key(key).is_some());
        assert!(table.remove_by_key(key).is_none());
    }

    #[test]
    fn cancelled_token_observed() {
        let token = CancellationToken::new();
        let (call, _rx) = Call::request(Bytes::from_static(b"x"), Some(token.clone()));
        assert!(!call.is_cancelled());
        token.cancel();
        assert!(call.is_cancelled());
    }

    #[test]
    fn dependency_reads_predecessor_id() {
        let (mut first, _rx1) = Call::request(Bytes::from_static(b"a"), None);
        let (second, _rx2) = Call::request(Bytes::from_static(b"b"), None);
        let second = second.after(&first);

        // Not assigned yet: no dependency id on the wire.
        assert_eq!(second.after_id(), None);

        first.assign(40, None);
        assert_eq!(second.after_id(), Some(40));
    }

    #[test]
    fn recent_acks_evict_oldest() {
        let ring = RecentAcks::new();
        for i in 0..12i64 {
            let mut ack = Call::service(OutgoingKind::Ack, Bytes::from_static(b"ack"));
            ack.assign(i * 4 + 4, None);
            ring.push(ack);
        }

        // Oldest two fell off the ring.
        assert!(ring.take(4).is_none());
        assert!(ring.take(8).is_none());
        assert!(ring.take(48).is_some());
    }
}
