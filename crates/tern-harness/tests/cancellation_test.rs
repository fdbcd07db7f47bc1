//! Cancellation semantics: local-only, idempotent, immune to late
//! results.

mod common;

use common::{call_body, collect_calls, setup, wait_until};
use tern_core::CallError;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn cancel_in_flight_call() {
    let sim = setup();
    sim.sender.connect().await.expect("connect");

    let token = CancellationToken::new();
    let handle = sim.sender.submit_with_cancel(call_body(1), Some(token.clone()));

    // The call reaches the wire first; cancellation is local after that.
    let calls = collect_calls(&sim.primary, 1).await;
    token.cancel();

    assert_eq!(handle.result().await, Err(CallError::Cancelled));
    wait_until(|| sim.sender.in_flight() == 0).await;

    // A late result for the cancelled id is a no-op.
    sim.primary.send_rpc_result(calls[0].0, b"too-late");

    // The session keeps working afterwards.
    let follow_up = sim.sender.submit(call_body(2));
    let calls = collect_calls(&sim.primary, 1).await;
    sim.primary.send_rpc_result(calls[0].0, b"fresh-ok");
    assert_eq!(follow_up.result().await.expect("resolved"), &b"fresh-ok"[..]);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_send_never_reaches_wire() {
    let sim = setup();

    let token = CancellationToken::new();
    let handle = sim.sender.submit_with_cancel(call_body(3), Some(token.clone()));
    token.cancel();
    assert_eq!(handle.result().await, Err(CallError::Cancelled));

    // Connect afterwards: only an uncancelled call shows up.
    let live = sim.sender.submit(call_body(4));
    sim.sender.connect().await.expect("connect");

    let calls = collect_calls(&sim.primary, 1).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, call_body(4), "cancelled call never sent");

    sim.primary.send_rpc_result(calls[0].0, b"only-one");
    assert_eq!(live.result().await.expect("resolved"), &b"only-one"[..]);
}

#[tokio::test(start_paused = true)]
async fn cancel_after_resolution_is_noop() {
    let sim = setup();
    sim.sender.connect().await.expect("connect");

    let token = CancellationToken::new();
    let handle = sim.sender.submit_with_cancel(call_body(5), Some(token.clone()));

    let calls = collect_calls(&sim.primary, 1).await;
    sim.primary.send_rpc_result(calls[0].0, b"resolved");
    wait_until(|| sim.sender.in_flight() == 0).await;

    token.cancel();
    assert_eq!(handle.result().await.expect("result wins over late cancel"), &b"resolved"[..]);
}
