//! Framed TCP echo peer.
//!
//! Speaks the same length-prefixed format as the client and sends every
//! frame it receives straight back. `relink echo` runs it for manual checks
//! against a client, and the integration tests use it as the remote end.
//!
//! # Example
//!
//! ```no_run
//! use relink::codec::FrameCodec;
//! use relink::echo::EchoServer;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = EchoServer::bind("127.0.0.1:3563", FrameCodec::default()).await?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!     // In another task: shutdown_tx.send(()).unwrap();
//!     # drop(shutdown_tx);
//!     server.run_with_shutdown(shutdown_rx).await
//! }
//! ```

use std::io;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;

use crate::codec::{FrameCodec, FrameError};

/// Echo server bound to a TCP address.
pub struct EchoServer {
    listener: TcpListener,
    codec: FrameCodec,
}

impl EchoServer {
    /// Binds the listener. Use port 0 to let the OS pick a port.
    pub async fn bind(addr: &str, codec: FrameCodec) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "echo server listening");
        Ok(Self { listener, codec })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves peers until a shutdown signal arrives.
    ///
    /// On shutdown every open peer connection is dropped, so connected
    /// clients observe EOF.
    pub async fn run_with_shutdown(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        let mut peers = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!(peer = %addr, "accepted echo peer");
                            let codec = self.codec;
                            peers.spawn(async move {
                                if let Err(e) = echo_peer(stream, codec).await {
                                    tracing::warn!(peer = %addr, error = %e, "echo peer error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept error");
                        }
                    }
                }
                Some(_) = peers.join_next(), if !peers.is_empty() => {}
                _ = shutdown_rx.recv() => {
                    tracing::info!(open_peers = peers.len(), "shutdown signal received, stopping echo server");
                    break;
                }
            }
        }

        peers.shutdown().await;
        Ok(())
    }
}

/// Echoes frames until the peer disconnects or violates the framing.
async fn echo_peer(stream: TcpStream, codec: FrameCodec) -> Result<(), FrameError> {
    let mut framed = Framed::new(stream, codec);
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        framed.send(frame.freeze()).await?;
    }
    tracing::debug!("echo peer disconnected");
    Ok(())
}
