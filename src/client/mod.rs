//! Reconnecting TCP client.
//!
//! The client keeps a fixed number of outbound connections to one address
//! and hands each of them to an application [`Agent`]:
//!
//! ```text
//!            ┌──────────── TcpClient ────────────┐
//!            │  live set + status (one mutex)    │
//!            │                                   │
//!   slot 0 ──┤ Dialing → Connected → Closing ─┐  │
//!   slot 1 ──┤    ▲                           │  │
//!     ...    │    └──── auto_reconnect ───────┘  │
//!            └───────────────────────────────────┘
//!                         │
//!                      Session ── writer task ──► socket
//!                         │
//!                       Agent (run / on_close)
//! ```
//!
//! # Module Overview
//!
//! - [`agent`]: the [`Agent`] trait and factory type
//! - [`session`]: [`Session`], framed I/O over one socket
//! - [`tcp_client`]: [`TcpClient`], the dial loops and live set
//!
//! # Failure handling
//!
//! - Dial failures are logged and retried every `connect_interval` until
//!   the client is closed.
//! - Framing violations and socket errors close only the affected session;
//!   its agent sees the error from [`Session::receive`] and returns.
//! - [`Session::send`] blocks while the outbound queue is full and fails
//!   only once the session is closed.

pub mod agent;
pub mod session;
pub mod tcp_client;

pub use agent::{agent_factory, Agent, AgentFactory};
pub use session::{Session, SessionError, SessionId};
pub use tcp_client::{ClientError, ClientStatus, SlotState, TcpClient};
