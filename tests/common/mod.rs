//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use relink::client::{Agent, Session, TcpClient};
use relink::codec::FrameCodec;
use relink::config::{ClientConfig, FrameConfig};
use relink::echo::EchoServer;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Short reconnect interval so retry paths run quickly.
pub const FAST_INTERVAL: Duration = Duration::from_millis(25);

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Returns a loopback address with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    listener.local_addr().expect("Failed to read probe address")
}

/// Client configuration with the default frame layout and a fast interval.
pub fn fast_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new(addr.to_string(), FrameConfig::default())
        .with_connect_interval(FAST_INTERVAL)
}

/// A running echo server and the means to stop it.
pub struct EchoHandle {
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl EchoHandle {
    /// Stops the server and drops every connection it accepted.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = tokio::time::timeout(WAIT, self.task).await;
    }
}

/// Starts an echo server on `addr` (use port 0 for any free port).
pub async fn start_echo(addr: &str) -> EchoHandle {
    let server = EchoServer::bind(addr, FrameCodec::default())
        .await
        .expect("Failed to bind echo server");
    let addr = server.local_addr().expect("Failed to read echo address");
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(async move { server.run_with_shutdown(shutdown_rx).await });
    EchoHandle {
        addr,
        shutdown_tx,
        task,
    }
}

/// Polls `condition` every few milliseconds until it holds or `WAIT` elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Counts agent lifecycle events across every session of a client.
#[derive(Clone, Default)]
pub struct Counters {
    pub started: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    /// `on_close` calls that found their session still in the live set.
    pub registered_on_close: Arc<AtomicUsize>,
    client: Arc<OnceLock<Weak<TcpClient>>>,
}

impl Counters {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn registered_on_close(&self) -> usize {
        self.registered_on_close.load(Ordering::SeqCst)
    }

    /// Lets `on_close` look the session up in `client`'s live set.
    pub fn watch_live_set(&self, client: &Arc<TcpClient>) {
        let _ = self.client.set(Arc::downgrade(client));
    }

    /// Records one `on_close` call for `session`.
    fn record_close(&self, session: &Session) {
        assert!(session.is_closed(), "on_close runs after the session is closed");
        if let Some(client) = self.client.get().and_then(Weak::upgrade) {
            if client.sessions().iter().any(|s| s.id() == session.id()) {
                self.registered_on_close.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reads until the session ends, recording start and close.
pub struct CountingAgent {
    pub session: Session,
    pub counters: Counters,
}

#[async_trait]
impl Agent for CountingAgent {
    async fn run(&mut self) {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        while self.session.receive().await.is_ok() {}
    }

    fn on_close(&mut self) {
        self.counters.record_close(&self.session);
    }
}

/// Panics as soon as it runs.
pub struct PanickingAgent {
    pub session: Session,
    pub counters: Counters,
}

#[async_trait]
impl Agent for PanickingAgent {
    async fn run(&mut self) {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        panic!("agent failed on session {}", self.session.id());
    }

    fn on_close(&mut self) {
        self.counters.record_close(&self.session);
    }
}

/// Hands its session to the test and stays alive until the session closes.
pub struct HandoffAgent {
    pub session: Session,
    pub handoff: mpsc::UnboundedSender<Session>,
}

#[async_trait]
impl Agent for HandoffAgent {
    async fn run(&mut self) {
        let _ = self.handoff.send(self.session.clone());
        self.session.closed().await;
    }
}
