//! Channel-backed transport pair with fault injection.
//!
//! [`pair`] returns the client-side [`MockTransport`] (handed to the
//! sender) and the test-side [`ServerHandle`] (driven by the scenario).
//! The link is frame-oriented and ordered, matching the transport
//! contract; faults are injected by dropping the link or refusing future
//! connects.

use std::io;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tern_core::Transport;

enum Action {
    Frame(Vec<u8>),
    /// Sentinel that fails the client's pending or next `recv`.
    Fail,
}

struct Shared {
    connected: AtomicBool,
    refuse_connects: AtomicBool,
    connects: AtomicU32,
    to_server: mpsc::UnboundedSender<Vec<u8>>,
    from_server: Mutex<mpsc::UnboundedReceiver<Action>>,
    /// Wakes a parked `recv` when the client side disconnects.
    closed: Notify,
}

/// Client half: implements [`Transport`] over in-process channels.
pub struct MockTransport {
    shared: Arc<Shared>,
    long_poll: bool,
}

/// Test half: observe client frames, push server frames, inject faults.
pub struct ServerHandle {
    shared: Arc<Shared>,
    from_client: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    to_client: mpsc::UnboundedSender<Action>,
}

/// Build a connected mock link. `long_poll` marks the client half as a
/// request/response-shaped fallback transport.
pub fn pair(long_poll: bool) -> (MockTransport, ServerHandle) {
    let (to_server, from_client) = mpsc::unbounded_channel();
    let (to_client, from_server) = mpsc::unbounded_channel();

    let shared = Arc::new(Shared {
        connected: AtomicBool::new(false),
        refuse_connects: AtomicBool::new(false),
        connects: AtomicU32::new(0),
        to_server,
        from_server: Mutex::new(from_server),
        closed: Notify::new(),
    });

    (
        MockTransport { shared: shared.clone(), long_poll },
        ServerHandle { shared, from_client: Mutex::new(from_client), to_client },
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> io::Result<()> {
        if self.shared.refuse_connects.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused by scenario"));
        }

        // Frames queued for a previous connection die with it.
        {
            let mut rx = self.shared.from_server.lock().await;
            while rx.try_recv().is_ok() {}
        }

        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link down"));
        }
        self.shared
            .to_server
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "server gone"))
    }

    async fn recv(&self) -> io::Result<Vec<u8>> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link down"));
        }

        let mut rx = self.shared.from_server.lock().await;
        tokio::select! {
            action = rx.recv() => match action {
                Some(Action::Frame(frame)) => Ok(frame),
                Some(Action::Fail) => {
                    self.shared.connected.store(false, Ordering::SeqCst);
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "link dropped"))
                }
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server gone")),
            },
            () = self.shared.closed.notified() => {
                Err(io::Error::new(io::ErrorKind::NotConnected, "disconnected"))
            }
        }
    }

    async fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.closed.notify_waiters();
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn is_long_poll(&self) -> bool {
        self.long_poll
    }
}

impl ServerHandle {
    /// Next frame the client wrote, in order.
    pub async fn recv_frame(&self) -> Vec<u8> {
        self.from_client
            .lock()
            .await
            .recv()
            .await
            .expect("client side of mock link dropped")
    }

    /// Push a frame for the client to receive.
    pub fn push_frame(&self, frame: Vec<u8>) {
        let _ = self.to_client.send(Action::Frame(frame));
    }

    /// Drop the link: the client's current or next `recv` fails and the
    /// transport reports disconnected until the next `connect`.
    pub fn break_link(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let _ = self.to_client.send(Action::Fail);
    }

    /// Refuse (or stop refusing) future connect attempts.
    pub fn refuse_connects(&self, refuse: bool) {
        self.shared.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// How many times the client connected.
    pub fn connect_count(&self) -> u32 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Whether the client currently holds the link open.
    pub fn client_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}
