//! Scriptable in-process peer.
//!
//! `ServerSim` sits on the test side of a mock link, opens client frames
//! with the shared [`PlainCipher`], and crafts protocol-correct replies:
//! results, corrections, acks, updates. It learns the client's session id
//! from the first frame it sees, like the real peer does.

use std::sync::atomic::{AtomicI64, Ordering};

use bytes::{Buf, BufMut, Bytes};
use tern_core::FrameCipher;
use tern_proto::{constructors, payloads::Container, Envelope, MessageKind};

use crate::{cipher::PlainCipher, mock::ServerHandle};

/// One decrypted client frame.
pub struct ClientFrame {
    /// Salt the client stamped on the frame
    pub salt: i64,
    /// Client's session id
    pub session_id: i64,
    /// The outer envelope (possibly a container)
    pub envelope: Envelope,
}

/// Application calls extracted from an outer envelope: containers are
/// flattened, compression and dependency wrappers are peeled, service
/// messages (acks, long polls, state replies, pings) are skipped.
pub fn extract_calls(envelope: &Envelope) -> Vec<(i64, Bytes)> {
    fn peel(msg_id: i64, body: &Bytes, out: &mut Vec<(i64, Bytes)>) {
        let Ok(kind) = MessageKind::of_body(body) else { return };
        match kind {
            MessageKind::Container => {
                let mut buf = &body[4..];
                if let Ok(container) = Container::decode(&mut buf) {
                    for member in container.messages {
                        peel(member.msg_id, &member.body, out);
                    }
                }
            }
            MessageKind::GzipPacked => {
                let mut buf = &body[4..];
                if let Ok(inner) = tern_proto::gzip_unpack(&mut buf) {
                    peel(msg_id, &inner, out);
                }
            }
            MessageKind::Other(constructors::INVOKE_AFTER) => {
                // constructor (4) + after id (8), then the real query
                out.push((msg_id, body.slice(12..)));
            }
            MessageKind::Other(constructors::PING | constructors::HTTP_WAIT | constructors::MSGS_STATE_INFO) => {}
            MessageKind::MsgsAck => {}
            MessageKind::Other(_) => out.push((msg_id, body.clone())),
            _ => {}
        }
    }

    let mut out = Vec::new();
    peel(envelope.msg_id, &envelope.body, &mut out);
    out
}

/// Scripted peer bound to one [`ServerHandle`].
pub struct ServerSim {
    handle: ServerHandle,
    cipher: PlainCipher,
    session_id: AtomicI64,
    salt: AtomicI64,
    next_msg_id: AtomicI64,
}

impl ServerSim {
    /// Wrap a mock server handle; replies are sealed with `cipher`.
    pub fn new(handle: ServerHandle, cipher: PlainCipher) -> Self {
        Self {
            handle,
            cipher,
            session_id: AtomicI64::new(0),
            salt: AtomicI64::new(0),
            // Server-originated ids: epoch-shaped, odd remainder class.
            next_msg_id: AtomicI64::new((1_700_000_100_i64 << 32) | 1),
        }
    }

    /// Access to the underlying link for fault injection.
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// Receive and open the next client frame.
    pub async fn next_frame(&self) -> ClientFrame {
        let raw = self.handle.recv_frame().await;
        let plaintext = self.cipher.decrypt(&raw).expect("client frame must decrypt");

        let mut buf = plaintext.as_slice();
        let salt = buf.get_i64_le();
        let session_id = buf.get_i64_le();
        self.session_id.store(session_id, Ordering::SeqCst);

        let envelope = Envelope::decode(&mut buf).expect("client frame must parse");
        ClientFrame { salt, session_id, envelope }
    }

    /// Receive frames until one carries at least one application call.
    pub async fn next_calls(&self) -> Vec<(i64, Bytes)> {
        loop {
            let frame = self.next_frame().await;
            let calls = extract_calls(&frame.envelope);
            if !calls.is_empty() {
                return calls;
            }
        }
    }

    /// Seal `body` into a server envelope and push it to the client.
    pub fn send_body(&self, body: Bytes) {
        let msg_id = self.next_msg_id.fetch_add(4, Ordering::SeqCst);
        let envelope = Envelope::new(msg_id, 0, body);

        let mut plaintext = Vec::with_capacity(32 + envelope.encoded_len());
        plaintext.put_i64_le(self.salt.load(Ordering::SeqCst));
        plaintext.put_i64_le(self.session_id.load(Ordering::SeqCst));
        envelope.encode(&mut plaintext);

        let frame = self.cipher.encrypt(&plaintext).expect("server frame must seal");
        self.handle.push_frame(frame);
    }

    /// Answer a call with a successful result payload.
    pub fn send_rpc_result(&self, req_msg_id: i64, payload: &[u8]) {
        let mut body = Vec::with_capacity(12 + payload.len());
        body.put_u32_le(constructors::RPC_RESULT);
        body.put_i64_le(req_msg_id);
        body.put_slice(payload);
        self.send_body(Bytes::from(body));
    }

    /// Answer a call with an application-level error.
    pub fn send_rpc_error(&self, req_msg_id: i64, code: i32, message: &str) {
        let mut body = Vec::new();
        body.put_u32_le(constructors::RPC_RESULT);
        body.put_i64_le(req_msg_id);
        body.put_u32_le(constructors::RPC_ERROR);
        body.put_i32_le(code);
        tern_proto::write_bytes(&mut body, message.as_bytes());
        self.send_body(Bytes::from(body));
    }

    /// Reject a message as sent under a stale salt and supply a new one.
    pub fn send_bad_server_salt(&self, bad_msg_id: i64, new_salt: i64) {
        self.salt.store(new_salt, Ordering::SeqCst);
        let mut body = Vec::new();
        body.put_u32_le(constructors::BAD_SERVER_SALT);
        body.put_i64_le(bad_msg_id);
        body.put_i32_le(0);
        body.put_i32_le(48);
        body.put_i64_le(new_salt);
        self.send_body(Bytes::from(body));
    }

    /// Reject a message with a numeric bad-message code.
    pub fn send_bad_msg(&self, bad_msg_id: i64, error_code: i32) {
        let mut body = Vec::new();
        body.put_u32_le(constructors::BAD_MSG_NOTIFICATION);
        body.put_i64_le(bad_msg_id);
        body.put_i32_le(0);
        body.put_i32_le(error_code);
        self.send_body(Bytes::from(body));
    }

    /// Push a server-initiated update body.
    pub fn send_update(&self, payload: &[u8]) {
        let mut body = Vec::with_capacity(4 + payload.len());
        body.put_u32_le(crate::schema::UPDATE_MARKER);
        body.put_slice(payload);
        self.send_body(Bytes::from(body));
    }

    /// Push the short error frame that stands for "authorization key not
    /// recognized".
    pub fn send_auth_key_unknown(&self) {
        self.handle.push_frame(PlainCipher::error_frame(crate::cipher::AUTH_KEY_UNKNOWN_CODE));
    }
}
