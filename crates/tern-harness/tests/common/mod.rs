//! Shared scenario plumbing: one sender wired to scripted peers.
#![allow(dead_code)] // each test binary uses its own subset

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes};
use tern_core::{Sender, SenderConfig, SenderEvent};
use tern_harness::{pair, EchoSchema, MockTransport, PlainCipher, ServerSim, SimEnv};

pub type SimSender = Sender<MockTransport, PlainCipher, EchoSchema, SimEnv>;

pub struct Sim {
    pub sender: SimSender,
    pub primary: ServerSim,
    pub fallback: Option<ServerSim>,
    pub events: Arc<Mutex<Vec<SenderEvent>>>,
}

/// Install a subscriber once so `RUST_LOG=debug cargo test` shows the
/// session's tracing output.
fn trace_init() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn setup() -> Sim {
    setup_with(SenderConfig::default(), false)
}

pub fn setup_with(config: SenderConfig, with_fallback: bool) -> Sim {
    trace_init();
    let env = SimEnv::new();
    let cipher = PlainCipher::new(0x7e57_c0de);

    let (primary, primary_handle) = pair(false);
    let (fallback, fallback_handle) = if with_fallback {
        let (t, h) = pair(true);
        (Some(t), Some(h))
    } else {
        (None, None)
    };

    let events: Arc<Mutex<Vec<SenderEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let sender = Sender::new(
        primary,
        fallback,
        cipher.clone(),
        EchoSchema,
        env,
        config,
        Arc::new(move |event| sink.lock().unwrap().push(event)),
    );

    Sim {
        sender,
        primary: ServerSim::new(primary_handle, cipher.clone()),
        fallback: fallback_handle.map(|h| ServerSim::new(h, cipher)),
        events,
    }
}

/// An application call body: a non-control constructor plus filler,
/// 4-byte aligned as the wire requires.
pub fn call_body(tag: u8) -> Bytes {
    let mut body = Vec::with_capacity(16);
    body.put_u32_le(0x600d_0000 | u32::from(tag));
    body.put_slice(&[tag; 12]);
    Bytes::from(body)
}

/// Gather calls from as many frames as needed to see `n` of them.
pub async fn collect_calls(server: &ServerSim, n: usize) -> Vec<(i64, Bytes)> {
    let mut calls = Vec::new();
    while calls.len() < n {
        calls.extend(server.next_calls().await);
    }
    calls
}

/// Poll (under paused time) until an event matching `pred` was observed.
pub async fn wait_for_event(
    events: &Arc<Mutex<Vec<SenderEvent>>>,
    pred: impl Fn(&SenderEvent) -> bool,
) {
    for _ in 0..1000 {
        if events.lock().unwrap().iter().any(&pred) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event not observed: {:?}", events.lock().unwrap());
}

/// Poll until `cond` holds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
