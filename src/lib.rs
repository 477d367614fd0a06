//! relink: a reconnecting TCP client transport.
//!
//! This crate keeps a configurable number of outbound TCP connections to one
//! remote address, frames the byte stream into length-prefixed messages, and
//! hands each live connection to an application-supplied [`Agent`] until the
//! connection or the client goes away.
//!
//! # Layers
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Agent (application protocol)      │
//! ├─────────────────────────────────────────┤
//! │   Session: bounded send queue, receive   │
//! ├─────────────────────────────────────────┤
//! │   FrameCodec: [length][payload] framing  │
//! ├─────────────────────────────────────────┤
//! │   TcpClient: dial loops, live set, close │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`codec`]: length-prefixed [`FrameCodec`]
//! - [`client`]: [`TcpClient`], [`Session`] and the [`Agent`] trait
//! - [`config`]: [`ClientConfig`] schema, validation and TOML loading
//! - [`echo`]: framed echo peer used by the CLI and tests
//! - [`logging`]: tracing subscriber setup for the binary

/// Reconnecting client, sessions and agents.
pub mod client;

/// Length-prefixed frame codec.
pub mod codec;

/// Client configuration.
pub mod config;

/// Framed TCP echo peer.
pub mod echo;

/// Tracing subscriber initialization.
pub mod logging;

pub use client::{Agent, ClientError, ClientStatus, Session, SessionError, SlotState, TcpClient};
pub use codec::{ByteOrder, FrameCodec, FrameError, LengthWidth};
pub use config::{ClientConfig, ConfigError, FrameConfig};
