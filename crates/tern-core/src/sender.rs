//! The sender: public API, duty-cycle loops, and the reconnection
//! supervisor.
//!
//! A [`Sender`] owns one logical session over a primary transport and an
//! optional long-poll fallback. Three cooperating loops run per session:
//!
//! - **send loop**: drain packer → encrypt → write
//! - **receive loop**: read → decrypt → dispatch
//! - **long-poll loop** (fallback only): keep one wait call outstanding so
//!   the server always has a channel to push on
//!
//! The loops never run the same step concurrently for one session; the
//! pending-call table and the session state are the only shared mutable
//! state, and both are synchronization points of their own. Loop identity
//! is a generation counter: every (re)start bumps it, and a loop observing
//! a stale generation exits silently instead of fighting its replacement.
//!
//! # Failure handling
//!
//! A write or read failure marks the session broken and hands off to the
//! reconnection supervisor; in-flight calls stay in the table and are
//! requeued ahead of new work once the session is back. The one exception
//! is an unrecognized authorization key, which no amount of reconnecting
//! can fix: it surfaces as [`SenderEvent::AuthKeyBroken`] and stops the
//! session.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tern_proto::payloads::{HttpWait, MsgsAck, Ping};

use crate::{
    config::{LongPollParams, SenderConfig},
    crypto::{CipherError, FrameCipher},
    dispatch::{process_message, DispatchCtx},
    env::Environment,
    error::{CallError, SenderError},
    packer::MessagePacker,
    pending::{Call, CallResult, OutgoingKind, PendingCalls, RecentAcks},
    schema::Schema,
    session::{FrameError, SessionState},
    transport::Transport,
};

/// Lifecycle and update notifications delivered to the registered
/// callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    /// A transport is connected and the loops are running
    Connected,
    /// The session lost its transport (it may be reconnecting)
    Disconnected,
    /// The server no longer recognizes the authorization key; the owner
    /// must re-authenticate, reconnecting will not help
    AuthKeyBroken,
    /// The local-to-server clock offset changed
    TimeOffsetChanged(i64),
    /// A server-initiated update that is not a call response
    Update(Bytes),
}

/// Callback invoked for every [`SenderEvent`]. Kept synchronous and cheap;
/// anything heavy belongs on the application's side of the channel.
pub type EventCallback = Arc<dyn Fn(SenderEvent) + Send + Sync>;

#[derive(Default)]
struct LoopState {
    user_connected: bool,
    user_disconnected: bool,
    connecting: bool,
    reconnecting: bool,
    probing_primary: bool,
    on_fallback: bool,
    generation: u64,
}

struct Inner<T, C, S, E> {
    primary: T,
    fallback: Option<T>,
    cipher: C,
    schema: S,
    env: E,
    config: SenderConfig,
    long_poll: LongPollParams,
    session: Mutex<SessionState>,
    pending: PendingCalls,
    packer: MessagePacker,
    recent_acks: RecentAcks,
    pending_ack: Mutex<HashSet<i64>>,
    state: Mutex<LoopState>,
    events: EventCallback,
    /// Wakes loops parked on queue readiness when the session stops.
    shutdown: Notify,
    /// Re-arms the long-poll loop after the receive loop processed data.
    long_poll_gate: Notify,
}

impl<T, C, S, E> Inner<T, C, S, E>
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().expect("sender state poisoned")
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().expect("session state poisoned")
    }

    fn on_fallback(&self) -> bool {
        self.state().on_fallback && self.fallback.is_some()
    }

    fn active(&self) -> &T {
        if self.on_fallback() {
            self.fallback.as_ref().expect("fallback checked above")
        } else {
            &self.primary
        }
    }

    /// Whether a loop of the given generation should keep running.
    fn running(&self, generation: u64) -> bool {
        let st = self.state();
        st.user_connected && !st.reconnecting && st.generation == generation
    }

    /// Move queued acknowledgment ids into a bare-ack entry so they
    /// piggyback on the next outgoing frame.
    fn append_acks(&self) {
        let ids: Vec<i64> = {
            let mut set = self.pending_ack.lock().expect("pending-ack set poisoned");
            set.drain().collect()
        };
        if !ids.is_empty() {
            let body = MsgsAck { msg_ids: ids }.to_body();
            self.packer.push(Call::service(OutgoingKind::Ack, body));
        }
    }

    fn dispatch_envelope(&self, envelope: tern_proto::Envelope) {
        let events = self.events.clone();
        let sink = move |event: SenderEvent| events(event);
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
        if let Err(error) = process_message(&ctx, envelope) {
            // Forward-incompatible or corrupt message body: skip it, the
            // connection itself is fine.
            tracing::info!(%error, "skipping undecodable message");
        }
    }
}

/// Handle for one submitted call. Await [`CallHandle::result`] for the
/// typed outcome; the round trip may suspend indefinitely until resolved,
/// rejected, or cancelled.
pub struct CallHandle {
    rx: oneshot::Receiver<CallResult>,
    cancel: Option<CancellationToken>,
    key: u64,
    pub(crate) msg_cell: Arc<std::sync::atomic::AtomicI64>,
    pending: PendingCalls,
    packer: MessagePacker,
}

impl CallHandle {
    /// Cancel the call. Local only: if the frame already left, the server
    /// side effect (if any) is not undone, but the awaiter observes a
    /// cancellation error and the call will not be retransmitted.
    pub fn cancel(&self) {
        if let Some(token) = &self.cancel {
            token.cancel();
        }
    }

    /// Await the call's outcome. Observed exactly once.
    ///
    /// Cancellation is checked against the result with the result winning
    /// ties, so cancelling an already-resolved call is a no-op.
    pub async fn result(mut self) -> CallResult {
        let Some(token) = self.cancel.clone() else {
            return self.rx.await.unwrap_or(Err(CallError::Dropped));
        };

        tokio::select! {
            biased;
            outcome = &mut self.rx => outcome.unwrap_or(Err(CallError::Dropped)),
            () = token.cancelled() => {
                // Pull the call out of wherever it currently lives so a
                // late result is a no-op and it is never retransmitted.
                let removed = self
                    .packer
                    .remove_by_key(self.key)
                    .or_else(|| self.pending.remove_by_key(self.key));
                if let Some(call) = removed {
                    call.reject(CallError::Cancelled);
                }
                match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CallError::Cancelled),
                }
            }
        }
    }
}

/// A persistent, encrypted, multiplexed request/response session.
pub struct Sender<T, C, S, E> {
    inner: Arc<Inner<T, C, S, E>>,
}

impl<T, C, S, E> Clone for Sender<T, C, S, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, C, S, E> Sender<T, C, S, E>
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    /// Create a sender over the given transport pair and capabilities.
    /// Nothing connects until [`Sender::connect`] is called.
    pub fn new(
        primary: T,
        fallback: Option<T>,
        cipher: C,
        schema: S,
        env: E,
        config: SenderConfig,
        events: EventCallback,
    ) -> Self {
        let session = Mutex::new(SessionState::new(&env));
        Self {
            inner: Arc::new(Inner {
                primary,
                fallback,
                cipher,
                schema,
                env,
                config,
                long_poll: LongPollParams::default(),
                session,
                pending: PendingCalls::new(),
                packer: MessagePacker::new(),
                recent_acks: RecentAcks::new(),
                pending_ack: Mutex::new(HashSet::new()),
                state: Mutex::new(LoopState::default()),
                events,
                shutdown: Notify::new(),
                long_poll_gate: Notify::new(),
            }),
        }
    }

    /// Connect and start the session loops.
    ///
    /// Retries per the configured policy, switching to the fallback
    /// transport after `retries_to_fallback` failed attempts on the
    /// primary. When the session ends up on the fallback (and the fallback
    /// was not forced), a background task keeps probing the primary and
    /// cuts over as soon as it is reachable.
    ///
    /// # Errors
    ///
    /// [`SenderError::ConnectFailed`] once the bounded retry budget (if
    /// any) is exhausted.
    pub async fn connect(&self) -> Result<(), SenderError> {
        {
            let mut st = self.inner.state();
            if st.user_connected {
                tracing::info!("already connected");
                return Ok(());
            }
            st.user_disconnected = false;
            st.connecting = true;
        }

        let result = connect_with_retries(&self.inner).await;
        self.inner.state().connecting = false;

        if result.is_ok() && self.inner.on_fallback() && !self.inner.config.force_fallback {
            spawn_primary_probe(self.inner.clone());
        }
        result
    }

    /// Cleanly disconnect: stop the loops, drop the transports, and
    /// cancel every outstanding call with [`CallError::Dropped`].
    ///
    /// Involuntary disconnects never take this path; they preserve
    /// pending calls for retransmission.
    pub async fn disconnect(&self) {
        {
            let mut st = self.inner.state();
            if st.user_disconnected {
                return;
            }
            st.user_disconnected = true;
            st.user_connected = false;
            st.generation += 1;
        }
        tracing::info!("disconnecting");
        self.inner.shutdown.notify_waiters();

        self.inner.primary.disconnect().await;
        if let Some(fallback) = &self.inner.fallback {
            fallback.disconnect().await;
        }

        for call in self.inner.packer.drain() {
            call.reject(CallError::Dropped);
        }
        for call in self.inner.pending.pop_all() {
            call.reject(CallError::Dropped);
        }
        (self.inner.events)(SenderEvent::Disconnected);
    }

    /// Enqueue a call. The returned handle resolves when the response
    /// arrives, however many retransmissions or reconnects that takes.
    pub fn submit(&self, request: Bytes) -> CallHandle {
        self.submit_with_cancel(request, None)
    }

    /// [`Sender::submit`] with a caller-supplied cancellation signal.
    pub fn submit_with_cancel(
        &self,
        request: Bytes,
        cancel: Option<CancellationToken>,
    ) -> CallHandle {
        let (call, rx) = Call::request(request, cancel.clone());
        let handle = CallHandle {
            rx,
            cancel,
            key: call.key(),
            msg_cell: call.msg_id_cell(),
            pending: self.inner.pending.clone(),
            packer: self.inner.packer.clone(),
        };
        self.inner.packer.push(call);
        handle
    }

    /// Submit a call the server must execute only after the call behind
    /// `after` has completed.
    pub fn submit_after(&self, request: Bytes, after: &CallHandle) -> CallHandle {
        let (mut call, rx) = Call::request(request, None);
        call.set_after_cell(after.msg_cell.clone());
        let handle = CallHandle {
            rx,
            cancel: None,
            key: call.key(),
            msg_cell: call.msg_id_cell(),
            pending: self.inner.pending.clone(),
            packer: self.inner.packer.clone(),
        };
        self.inner.packer.push(call);
        handle
    }

    /// Submit and await in one step.
    pub async fn invoke(&self, request: Bytes) -> CallResult {
        self.submit(request).result().await
    }

    /// Send a keepalive ping; the handle resolves on the matching reply.
    pub fn ping(&self) -> CallHandle {
        let ping = Ping { ping_id: self.inner.env.random_i64() };
        let mut body = Vec::with_capacity(12);
        ping.encode(&mut body);
        self.submit(Bytes::from(body))
    }

    /// Whether the session currently considers itself connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state().user_connected
    }

    /// Whether the session is currently using the fallback transport.
    #[must_use]
    pub fn is_on_fallback(&self) -> bool {
        self.inner.on_fallback()
    }

    /// Current local-to-server clock offset in seconds.
    #[must_use]
    pub fn time_offset(&self) -> i64 {
        self.inner.session().time_offset()
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }
}

/// Connect attempt loop shared by first connect and reconnect.
async fn connect_with_retries<T, C, S, E>(
    inner: &Arc<Inner<T, C, S, E>>,
) -> Result<(), SenderError>
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    let config = &inner.config;
    let mut attempt: u32 = 0;

    loop {
        let use_fallback = inner.fallback.is_some()
            && config.allow_fallback
            && (config.force_fallback || attempt >= config.retries_to_fallback);
        inner.state().on_fallback = use_fallback;

        if use_fallback {
            tracing::warn!(attempt, "trying fallback transport");
        } else {
            tracing::debug!(attempt, "trying primary transport");
        }

        match inner.active().connect().await {
            Ok(()) => {
                start_loops(inner);
                (inner.events)(SenderEvent::Connected);
                tracing::info!(fallback = use_fallback, "connected");
                return Ok(());
            }
            Err(error) => {
                if attempt == 0 {
                    (inner.events)(SenderEvent::Disconnected);
                }
                tracing::warn!(attempt, %error, "connection attempt failed");
                attempt += 1;

                if let Some(limit) = config.connect_retries {
                    if attempt >= limit.saturating_add(config.retries_to_fallback) {
                        return Err(SenderError::ConnectFailed { attempts: attempt, last: error });
                    }
                }
                if inner.state().user_disconnected {
                    return Err(SenderError::NotConnected);
                }
                inner.env.sleep(config.connect_retry_delay).await;
            }
        }
    }
}

/// Mark the session live and start a fresh generation of loops.
///
/// Everything still in the pending table is requeued *ahead* of new
/// submissions, so nothing outstanding is lost across a reconnect.
fn start_loops<T, C, S, E>(inner: &Arc<Inner<T, C, S, E>>)
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    let generation = {
        let mut st = inner.state();
        st.user_connected = true;
        st.reconnecting = false;
        st.generation += 1;
        st.generation
    };

    inner.packer.prepend(inner.pending.pop_all());

    tracing::debug!(generation, "starting session loops");
    tokio::spawn(send_loop(inner.clone(), generation));
    tokio::spawn(recv_loop(inner.clone(), generation));
    if inner.on_fallback() && inner.active().is_long_poll() {
        tokio::spawn(long_poll_loop(inner.clone(), generation));
    }
}

async fn send_loop<T, C, S, E>(inner: Arc<Inner<T, C, S, E>>, generation: u64)
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    loop {
        // Register for shutdown before the liveness check so a stop
        // signal arriving in between still wakes the select below.
        let shutdown = inner.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        if !inner.running(generation) {
            break;
        }
        inner.append_acks();

        tokio::select! {
            () = inner.packer.wait_ready() => {}
            () = &mut shutdown => continue,
        }
        if !inner.running(generation) {
            break;
        }

        // On a request/response-shaped transport every write doubles as a
        // poll opportunity; a zero-wait entry tells the server to answer
        // promptly instead of holding the request.
        if inner.on_fallback() {
            let flush = HttpWait { max_delay: 0, wait_after: 0, max_wait: 0 };
            inner.packer.push(Call::service(OutgoingKind::LongPoll, flush.to_body()));
        }
        inner.append_acks();

        let packed = {
            let mut session = inner.session();
            inner.packer.pack(&mut session, &inner.pending, &inner.recent_acks, &inner.env)
        };
        let packed = match packed {
            Ok(Some(packed)) => packed,
            Ok(None) => continue,
            Err(error) => {
                tracing::error!(%error, "packing failed; stopping session");
                break;
            }
        };

        if !inner.running(generation) {
            // The batch is safe: registered entries are requeued by the
            // next generation's start.
            break;
        }

        let frame = {
            let session = inner.session();
            session.encrypt_frame(&inner.cipher, &packed.message)
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!(%error, "frame encryption failed");
                trigger_reconnect(&inner, generation);
                break;
            }
        };

        tracing::debug!(count = packed.count, bytes = frame.len(), "sending frame");
        if let Err(error) = inner.active().send(&frame).await {
            tracing::info!(%error, "connection closed while sending");
            trigger_reconnect(&inner, generation);
            break;
        }
    }
    tracing::debug!(generation, "send loop ended");
}

async fn recv_loop<T, C, S, E>(inner: Arc<Inner<T, C, S, E>>, generation: u64)
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    loop {
        if !inner.running(generation) {
            break;
        }

        let raw = match inner.active().recv().await {
            Ok(raw) => raw,
            Err(error) => {
                if inner.running(generation) && !inner.state().user_disconnected {
                    tracing::warn!(%error, "connection closed while receiving");
                    trigger_reconnect(&inner, generation);
                }
                break;
            }
        };

        let envelope = {
            let mut session = inner.session();
            session.decrypt_frame(&inner.cipher, &raw)
        };
        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(FrameError::Cipher(CipherError::AuthKeyUnknown)) => {
                // Reconnecting cannot fix an unknown key; surface it and
                // stop. Recovery is re-authentication, owned upstream.
                tracing::warn!("authorization key not recognized by server");
                inner.state().user_connected = false;
                inner.shutdown.notify_waiters();
                (inner.events)(SenderEvent::AuthKeyBroken);
                break;
            }
            Err(
                error @ (FrameError::Security(_)
                | FrameError::Envelope(_)
                | FrameError::Cipher(CipherError::IntegrityFailure)),
            ) => {
                // One bad frame does not condemn the connection.
                tracing::warn!(%error, "dropping unusable frame");
                continue;
            }
            Err(error) => {
                // Structural corruption of the stream itself.
                tracing::warn!(%error, "corrupt frame stream");
                trigger_reconnect(&inner, generation);
                break;
            }
        };

        inner.dispatch_envelope(envelope);
        inner.long_poll_gate.notify_one();
    }
    tracing::debug!(generation, "receive loop ended");
}

async fn long_poll_loop<T, C, S, E>(inner: Arc<Inner<T, C, S, E>>, generation: u64)
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    loop {
        let shutdown = inner.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        if !inner.running(generation) || !inner.on_fallback() {
            break;
        }

        let wait = HttpWait {
            max_delay: inner.long_poll.max_delay,
            wait_after: inner.long_poll.wait_after,
            max_wait: inner.long_poll.max_wait,
        };
        let frame = {
            let mut session = inner.session();
            let mut message = Vec::new();
            session.write_message(&mut message, wait.to_body(), true, None, &inner.env);
            session.encrypt_frame(&inner.cipher, &message)
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!(%error, "long-poll encryption failed");
                trigger_reconnect(&inner, generation);
                break;
            }
        };

        tracing::trace!("issuing long poll");
        if let Err(error) = inner.active().send(&frame).await {
            tracing::info!(%error, "connection closed during long poll");
            trigger_reconnect(&inner, generation);
            break;
        }

        // Re-arm once the receive loop made progress (the poll returned)
        // or the session is shutting down.
        tokio::select! {
            () = inner.long_poll_gate.notified() => {}
            () = &mut shutdown => {}
        }
    }
    tracing::debug!(generation, "long-poll loop ended");
}

/// Hand off to the reconnection supervisor, once per failure.
fn trigger_reconnect<T, C, S, E>(inner: &Arc<Inner<T, C, S, E>>, generation: u64)
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    {
        let mut st = inner.state();
        let stale = st.generation != generation;
        if stale || st.user_disconnected || st.reconnecting || !st.user_connected {
            return;
        }
        st.reconnecting = true;
    }
    inner.shutdown.notify_waiters();
    (inner.events)(SenderEvent::Disconnected);

    let inner = inner.clone();
    tokio::spawn(async move {
        reconnect_task(inner).await;
    });
}

/// Supervisor path: short pause, teardown, fresh session state, then the
/// shared connect loop. On success the loops restart and everything still
/// pending is retransmitted; on a bounded-retry exhaustion the session
/// gives up and fails outstanding calls.
async fn reconnect_task<T, C, S, E>(inner: Arc<Inner<T, C, S, E>>)
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    tracing::info!("reconnecting");
    inner.env.sleep(inner.config.reconnect_delay).await;

    inner.primary.disconnect().await;
    if let Some(fallback) = &inner.fallback {
        fallback.disconnect().await;
    }
    inner.session().reset();

    match connect_with_retries(&inner).await {
        Ok(()) => {
            if inner.on_fallback() && !inner.config.force_fallback {
                spawn_primary_probe(inner.clone());
            }
        }
        Err(error) => {
            tracing::error!(%error, "reconnection gave up");
            {
                let mut st = inner.state();
                st.user_connected = false;
                st.reconnecting = false;
            }
            for call in inner.packer.drain() {
                call.reject(CallError::Dropped);
            }
            for call in inner.pending.pop_all() {
                call.reject(CallError::Dropped);
            }
            (inner.events)(SenderEvent::Disconnected);
        }
    }
}

/// Background cutover: while the session runs on the fallback transport,
/// periodically try the primary and migrate back the moment it connects.
/// The fallback works through restrictive networks but pays a polling
/// tax, so the session always drifts back to the primary when it can.
fn spawn_primary_probe<T, C, S, E>(inner: Arc<Inner<T, C, S, E>>)
where
    T: Transport,
    C: FrameCipher,
    S: Schema,
    E: Environment,
{
    {
        let mut st = inner.state();
        if st.probing_primary {
            return;
        }
        st.probing_primary = true;
    }

    tokio::spawn(async move {
        loop {
            inner.env.sleep(inner.config.retry_main_delay).await;
            {
                let st = inner.state();
                if !st.user_connected
                    || !st.on_fallback
                    || st.connecting
                    || st.reconnecting
                    || st.user_disconnected
                {
                    break;
                }
            }

            tracing::debug!("probing primary transport");
            match inner.primary.connect().await {
                Ok(()) => {
                    tracing::info!("primary transport reachable, cutting over");
                    inner.state().reconnecting = true;
                    inner.shutdown.notify_waiters();

                    if let Some(fallback) = &inner.fallback {
                        fallback.disconnect().await;
                    }
                    inner.state().on_fallback = false;

                    start_loops(&inner);
                    (inner.events)(SenderEvent::Connected);
                    break;
                }
                Err(error) => {
                    tracing::debug!(%error, "primary still unreachable");
                }
            }
        }
        inner.state().probing_primary = false;
    });
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::testutil::{TestEnv, TestSchema};

    /// Transport that refuses to connect; enough for API-level tests.
    #[derive(Default)]
    struct DeadTransport {
        connected: AtomicBool,
    }

    #[async_trait]
    impl Transport for DeadTransport {
        async fn connect(&self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "dead"))
        }

        async fn send(&self, _frame: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "dead"))
        }

        async fn recv(&self) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "dead"))
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    struct IdentityCipher;

    impl FrameCipher for IdentityCipher {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
            Ok(plaintext.to_vec())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
            Ok(ciphertext.to_vec())
        }
    }

    fn sender() -> Sender<DeadTransport, IdentityCipher, TestSchema, TestEnv> {
        Sender::new(
            DeadTransport::default(),
            None,
            IdentityCipher,
            TestSchema,
            TestEnv::new(1_700_000_000),
            SenderConfig { connect_retries: Some(1), ..SenderConfig::default() },
            Arc::new(|_| {}),
        )
    }

    #[tokio::test]
    async fn submit_queues_until_connected() {
        let sender = sender();
        let _handle = sender.submit(Bytes::from_static(b"call"));
        assert_eq!(sender.inner.packer.len(), 1);
        assert_eq!(sender.in_flight(), 0, "nothing in flight before packing");
    }

    #[tokio::test]
    async fn cancellation_rejects_queued_call() {
        let sender = sender();
        let token = CancellationToken::new();
        let handle = sender.submit_with_cancel(Bytes::from_static(b"call"), Some(token.clone()));

        token.cancel();
        assert_eq!(handle.result().await, Err(CallError::Cancelled));
        assert!(sender.inner.packer.is_empty(), "cancelled call removed from queue");
    }

    #[tokio::test]
    async fn cancel_after_resolution_is_noop() {
        let sender = sender();
        let token = CancellationToken::new();
        let handle = sender.submit_with_cancel(Bytes::from_static(b"call"), Some(token.clone()));

        // Simulate the dispatcher resolving the call.
        let mut call = sender.inner.packer.drain().pop().expect("queued call");
        call.assign(64, None);
        call.resolve(Bytes::from_static(b"done"));

        token.cancel();
        assert_eq!(handle.result().await, Ok(Bytes::from_static(b"done")));
    }

    #[tokio::test]
    async fn disconnect_rejects_outstanding_calls() {
        let sender = sender();
        let queued = sender.submit(Bytes::from_static(b"queued"));

        // One call already in flight.
        let (mut call, rx_flight) = Call::request(Bytes::from_static(b"flight"), None);
        call.assign(64, None);
        sender.inner.pending.register(call).expect("register");

        sender.disconnect().await;

        assert_eq!(queued.result().await, Err(CallError::Dropped));
        assert_eq!(rx_flight.await.expect("delivered"), Err(CallError::Dropped));
        assert!(!sender.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retries_give_up() {
        let sender = sender();
        let result = sender.connect().await;
        assert!(matches!(result, Err(SenderError::ConnectFailed { .. })));
        assert!(!sender.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn events_reported_on_failed_connect() {
        let events: Arc<Mutex<Vec<SenderEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sender = Sender::new(
            DeadTransport::default(),
            None,
            IdentityCipher,
            TestSchema,
            TestEnv::new(1_700_000_000),
            SenderConfig { connect_retries: Some(1), ..SenderConfig::default() },
            Arc::new(move |event| sink.lock().unwrap().push(event)),
        );

        let _ = sender.connect().await;
        let seen = events.lock().unwrap();
        assert!(seen.contains(&SenderEvent::Disconnected));
        assert!(!seen.contains(&SenderEvent::Connected));
    }
}
