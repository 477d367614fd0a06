//! Connection manager: dial loops, the live set and coordinated shutdown.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::client::agent::{agent_factory, Agent, AgentFactory};
use crate::client::session::{signalled, Session, SessionId};
use crate::config::{ClientConfig, ConfigError, ValidatedConfig};

/// Errors returned by [`TcpClient::start`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The configuration could not be validated.
    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),

    /// `start` was called on a client that is running or already closed.
    #[error("client has already been started")]
    AlreadyStarted,
}

/// Lifecycle of the client as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientStatus {
    /// Created, not started.
    #[default]
    Idle,
    /// Dial loops are running.
    Running,
    /// `close` has been called.
    Closed,
}

/// Lifecycle of one connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Spawned, not yet dialing.
    Idle,
    /// Attempting to connect, or waiting between attempts.
    Dialing,
    /// A session is registered and its agent is running.
    Connected,
    /// The agent returned; the session is being torn down.
    Closing,
    /// The slot's task has exited.
    Terminated,
}

/// Live sessions and lifecycle state, always mutated together.
#[derive(Default)]
struct Registry {
    status: ClientStatus,
    live: HashMap<SessionId, Session>,
    slots: Vec<SlotState>,
}

struct Shared {
    registry: Mutex<Registry>,
    /// Lock-free view of "close requested"; only set while holding `registry`.
    closing: AtomicBool,
    /// Wakes dial loops out of connect attempts and retry sleeps.
    shutdown: watch::Sender<bool>,
    next_session_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn allocate_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set_slot(&self, slot: usize, state: SlotState) {
        if let Some(entry) = self.lock().slots.get_mut(slot) {
            *entry = state;
        }
    }
}

/// Reconnecting TCP client.
///
/// Maintains `conn_num` independent connections to one address. Each slot
/// runs its own dial loop: connect (retrying every `connect_interval`),
/// wrap the stream in a [`Session`], run an [`Agent`] built by the factory,
/// tear the session down when the agent returns, and dial again if
/// `auto_reconnect` is set.
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use relink::client::{Agent, Session, TcpClient};
/// use relink::config::{ClientConfig, FrameConfig};
///
/// struct Printer(Session);
///
/// #[async_trait]
/// impl Agent for Printer {
///     async fn run(&mut self) {
///         while let Ok(frame) = self.0.receive().await {
///             println!("{:?}", frame);
///         }
///     }
/// }
///
/// # async fn example() -> Result<(), relink::client::ClientError> {
/// let config = ClientConfig::new("127.0.0.1:3563", FrameConfig::new(2, 4096))
///     .with_conn_num(2)
///     .with_auto_reconnect(true);
/// let client = TcpClient::new(config, Printer);
/// client.start()?;
/// // ...
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct TcpClient {
    config: ClientConfig,
    factory: AgentFactory,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpClient {
    /// Creates a client. Nothing is dialed until [`start`](Self::start).
    ///
    /// # Arguments
    ///
    /// * `config` - Target address, slot count and frame layout.
    /// * `factory` - Called once per established connection.
    pub fn new<F, A>(config: ClientConfig, factory: F) -> Self
    where
        F: Fn(Session) -> A + Send + Sync + 'static,
        A: Agent,
    {
        Self::with_factory(config, agent_factory(factory))
    }

    /// Creates a client from an already boxed factory.
    pub fn with_factory(config: ClientConfig, factory: AgentFactory) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            factory,
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                closing: AtomicBool::new(false),
                shutdown,
                next_session_id: AtomicU64::new(1),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Validates the configuration and launches one dial loop per slot.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// * [`ClientError::Config`] if the configuration is invalid. No task is
    ///   spawned and the client stays idle.
    /// * [`ClientError::AlreadyStarted`] if the client is running or closed.
    pub fn start(&self) -> Result<(), ClientError> {
        let settings = Arc::new(self.config.validate()?);

        // Held across the spawns so a concurrent close() waits for every handle.
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut registry = self.shared.lock();
            if registry.status != ClientStatus::Idle {
                return Err(ClientError::AlreadyStarted);
            }
            registry.status = ClientStatus::Running;
            registry.slots = vec![SlotState::Idle; settings.conn_num];
        }

        info!(
            addr = %settings.address,
            conn_num = settings.conn_num,
            auto_reconnect = settings.auto_reconnect,
            "starting tcp client"
        );

        for slot in 0..settings.conn_num {
            let dial_loop = DialLoop {
                slot,
                settings: Arc::clone(&settings),
                factory: Arc::clone(&self.factory),
                shared: Arc::clone(&self.shared),
            };
            tasks.push(tokio::spawn(dial_loop.run()));
        }
        Ok(())
    }

    /// Closes every live session and waits for all dial loops to exit.
    ///
    /// Calling it again is a no-op that returns immediately.
    pub async fn close(&self) {
        let first = self.request_close();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "dial loop panicked");
                }
            }
        }

        if first {
            info!(addr = %self.config.address, "tcp client closed");
        }
    }

    /// Flags the client as closing and closes every live session.
    ///
    /// Returns whether this call performed the transition.
    fn request_close(&self) -> bool {
        let mut registry = self.shared.lock();
        if registry.status == ClientStatus::Closed {
            return false;
        }
        registry.status = ClientStatus::Closed;
        self.shared.closing.store(true, Ordering::Release);
        self.shared.shutdown.send_replace(true);

        let live = registry.live.len();
        for (_, session) in registry.live.drain() {
            session.close();
        }
        debug!(sessions = live, "close requested, live sessions closed");
        true
    }

    /// Configuration as supplied (before defaults are applied).
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current client lifecycle state.
    pub fn status(&self) -> ClientStatus {
        self.shared.lock().status
    }

    /// Number of sessions whose agent is currently running.
    pub fn live_sessions(&self) -> usize {
        self.shared.lock().live.len()
    }

    /// Snapshot of the live sessions, in no particular order.
    pub fn sessions(&self) -> Vec<Session> {
        self.shared.lock().live.values().cloned().collect()
    }

    /// Snapshot of every slot's state, indexed by slot.
    pub fn slot_states(&self) -> Vec<SlotState> {
        self.shared.lock().slots.clone()
    }
}

impl Drop for TcpClient {
    /// Signals the dial loops to stop if the client was never closed.
    fn drop(&mut self) {
        if self.request_close() {
            debug!("tcp client dropped without close, signalled dial loops");
        }
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.shared.lock();
        f.debug_struct("TcpClient")
            .field("address", &self.config.address)
            .field("status", &registry.status)
            .field("live_sessions", &registry.live.len())
            .finish()
    }
}

/// One connection slot: dial, serve, clean up, maybe dial again.
struct DialLoop {
    slot: usize,
    settings: Arc<ValidatedConfig>,
    factory: AgentFactory,
    shared: Arc<Shared>,
}

impl DialLoop {
    async fn run(self) {
        loop {
            self.shared.set_slot(self.slot, SlotState::Dialing);
            let Some(stream) = self.dial().await else {
                break;
            };

            let session = match Session::new(
                self.shared.allocate_session_id(),
                stream,
                self.settings.codec,
                self.settings.pending_write_num,
            ) {
                Ok(session) => session,
                Err(e) => {
                    warn!(slot = self.slot, addr = %self.settings.address, error = %e, "connection lost during setup");
                    if self.pause().await {
                        continue;
                    }
                    break;
                }
            };

            if !self.register(&session) {
                session.close();
                break;
            }

            info!(
                slot = self.slot,
                session = session.id(),
                addr = %self.settings.address,
                local = %session.local_addr(),
                "connected"
            );

            let built = panic::catch_unwind(AssertUnwindSafe(|| (self.factory)(session.clone())));
            let mut agent = match built {
                Ok(agent) => Some(agent),
                Err(_) => {
                    error!(slot = self.slot, session = session.id(), "agent factory panicked");
                    None
                }
            };
            if let Some(agent) = agent.as_mut() {
                if AssertUnwindSafe(agent.run()).catch_unwind().await.is_err() {
                    error!(slot = self.slot, session = session.id(), "agent panicked");
                }
            }

            self.shared.set_slot(self.slot, SlotState::Closing);
            session.close();
            self.shared.lock().live.remove(&session.id());
            if let Some(agent) = agent.as_mut() {
                agent.on_close();
            }
            debug!(slot = self.slot, session = session.id(), "session finished");

            if !self.settings.auto_reconnect || !self.pause().await {
                break;
            }
        }

        self.shared.set_slot(self.slot, SlotState::Terminated);
        debug!(slot = self.slot, "dial loop exited");
    }

    /// Connects, retrying every interval. `None` means close was requested.
    async fn dial(&self) -> Option<TcpStream> {
        let mut shutdown = self.shared.shutdown.subscribe();
        loop {
            if self.shared.is_closing() {
                return None;
            }

            let attempt = tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => return None,
                attempt = TcpStream::connect(self.settings.address.as_str()) => attempt,
            };

            match attempt {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    if self.shared.is_closing() {
                        return None;
                    }
                    error!(slot = self.slot, addr = %self.settings.address, error = %e, "connect failed");
                    if !self.pause().await {
                        return None;
                    }
                }
            }
        }
    }

    /// Adds the session to the live set unless close won the race.
    fn register(&self, session: &Session) -> bool {
        let mut registry = self.shared.lock();
        if self.shared.is_closing() {
            return false;
        }
        registry.live.insert(session.id(), session.clone());
        if let Some(entry) = registry.slots.get_mut(self.slot) {
            *entry = SlotState::Connected;
        }
        true
    }

    /// Sleeps one reconnect interval. Returns `false` if close interrupted it.
    async fn pause(&self) -> bool {
        let mut shutdown = self.shared.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = signalled(&mut shutdown) => false,
            _ = sleep(self.settings.connect_interval) => true,
        }
    }
}
