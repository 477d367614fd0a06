//! A live connection wrapped in framed send/receive.
//!
//! A [`Session`] owns one `TcpStream`, split into halves:
//!
//! - the read half sits behind a [`FramedRead`] and is polled by
//!   [`Session::receive`];
//! - the write half belongs to a dedicated writer task that drains a bounded
//!   queue of encoded frames in FIFO order.
//!
//! [`Session::send`] waits for queue space when the writer falls behind and
//! only fails once the session is closed. [`Session::close`] can be called
//! from anywhere, any number of times; it wakes every pending `send` and
//! `receive`, lets the writer flush frames that were already queued and then
//! releases both socket halves.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::codec::{FrameCodec, FrameError};

/// Upper bound on flushing queued frames after close.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifier of a session, unique among the sessions of one client.
pub type SessionId = u64;

type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;

/// Errors returned by [`Session`] operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session was closed, locally or after a fatal error.
    #[error("session closed")]
    Closed,

    /// The peer closed the connection between frames.
    #[error("connection closed by peer")]
    Eof,

    /// Framing violation or socket error.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Cloneable handle to one live connection.
///
/// All clones share the same socket, queue and closed state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    codec: FrameCodec,
    outbound: mpsc::Sender<Bytes>,
    reader: Arc<Mutex<Option<FrameReader>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl Session {
    /// Wraps a connected stream and spawns its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier assigned by the owner; the client allocates these
    ///   from its own counter.
    /// * `stream` - A connected TCP stream.
    /// * `codec` - Frame layout used in both directions.
    /// * `pending_write_num` - Outbound queue depth; 0 is treated as 1.
    ///
    /// # Errors
    ///
    /// Fails if the socket addresses cannot be read, which happens when the
    /// connection was reset right after it was established.
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        codec: FrameCodec,
        pending_write_num: usize,
    ) -> std::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::channel(pending_write_num.max(1));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let reader = Arc::new(Mutex::new(Some(FramedRead::new(read_half, codec))));

        tokio::spawn(write_loop(
            id,
            write_half,
            queue,
            Arc::clone(&closed),
            Arc::clone(&reader),
        ));

        debug!(session = id, peer = %peer_addr, "session opened");

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                local_addr,
                codec,
                outbound,
                reader,
                closed,
            }),
        })
    }

    /// Session id assigned at construction.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Codec used for this session.
    pub fn codec(&self) -> &FrameCodec {
        &self.inner.codec
    }

    /// Encodes `payload` and queues it for the writer task.
    ///
    /// Waits while the outbound queue is full. There is no timeout; wrap the
    /// call in `tokio::time::timeout` if one is needed.
    ///
    /// # Errors
    ///
    /// * [`SessionError::Frame`] if the payload length is outside the
    ///   codec's bounds. Nothing is queued and the session stays open.
    /// * [`SessionError::Closed`] if the session is or becomes closed before
    ///   the frame is queued.
    pub async fn send(&self, payload: impl AsRef<[u8]>) -> Result<(), SessionError> {
        let frame = self.inner.codec.encode_frame(payload.as_ref())?;
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        tokio::select! {
            biased;
            _ = self.closed() => Err(SessionError::Closed),
            queued = self.inner.outbound.send(frame) => {
                queued.map_err(|_| SessionError::Closed)
            }
        }
    }

    /// Waits for the next complete frame from the peer.
    ///
    /// Concurrent callers are served one at a time. Every error except a
    /// local close also closes the session, so an agent can treat any `Err`
    /// as the end of the connection.
    ///
    /// # Errors
    ///
    /// * [`SessionError::Eof`] when the peer closed the connection cleanly.
    /// * [`SessionError::Frame`] for a length outside the bounds, a frame
    ///   cut short by EOF, or a socket error.
    /// * [`SessionError::Closed`] when the session was closed locally.
    pub async fn receive(&self) -> Result<Bytes, SessionError> {
        let mut reader = self.inner.reader.lock().await;

        let next = match reader.as_mut() {
            None => return Err(SessionError::Closed),
            Some(framed) => {
                tokio::select! {
                    biased;
                    _ = self.closed() => None,
                    next = framed.next() => Some(next),
                }
            }
        };

        match next {
            Some(Some(Ok(frame))) => Ok(frame.freeze()),
            Some(Some(Err(e))) => {
                *reader = None;
                drop(reader);
                warn!(session = self.inner.id, peer = %self.inner.peer_addr, error = %e, "read failed, closing session");
                self.close();
                Err(e.into())
            }
            Some(None) => {
                *reader = None;
                drop(reader);
                debug!(session = self.inner.id, peer = %self.inner.peer_addr, "peer closed connection");
                self.close();
                Err(SessionError::Eof)
            }
            None => {
                *reader = None;
                Err(SessionError::Closed)
            }
        }
    }

    /// Closes the session. Idempotent and safe to call from any task.
    pub fn close(&self) {
        if mark_closed(&self.inner.closed) {
            debug!(session = self.inner.id, peer = %self.inner.peer_addr, "session closed");
        }
    }

    /// Whether [`close`](Self::close) has been called or a fatal error occurred.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        signalled(&mut rx).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Flips a watch flag to `true`, returning whether this call changed it.
fn mark_closed(flag: &watch::Sender<bool>) -> bool {
    flag.send_if_modified(|closed| {
        if *closed {
            false
        } else {
            *closed = true;
            true
        }
    })
}

/// Waits until a watch flag becomes `true` (or its sender is gone).
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}

/// Drains the outbound queue into the socket until the session closes.
async fn write_loop(
    id: SessionId,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Bytes>,
    closed: Arc<watch::Sender<bool>>,
    reader: Arc<Mutex<Option<FrameReader>>>,
) {
    let mut closed_rx = closed.subscribe();
    // false once a frame has been partially written or the socket failed
    let mut clean = true;

    loop {
        let frame = tokio::select! {
            biased;
            _ = signalled(&mut closed_rx) => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                // every Session handle is gone
                None => break,
            },
        };

        tokio::select! {
            biased;
            written = writer.write_all(&frame) => {
                if let Err(e) = written {
                    warn!(session = id, error = %e, "write failed, closing session");
                    clean = false;
                    break;
                }
            }
            _ = signalled(&mut closed_rx) => {
                clean = false;
                break;
            }
        }
    }

    mark_closed(&closed);
    queue.close();

    if clean {
        let drain = async {
            let mut flushed = 0usize;
            while let Ok(frame) = queue.try_recv() {
                writer.write_all(&frame).await?;
                flushed += 1;
            }
            writer.flush().await?;
            Ok::<usize, std::io::Error>(flushed)
        };
        match timeout(CLOSE_DRAIN_TIMEOUT, drain).await {
            Ok(Ok(0)) => {}
            Ok(Ok(flushed)) => debug!(session = id, flushed, "flushed queued frames on close"),
            Ok(Err(e)) => debug!(session = id, error = %e, "flush on close failed"),
            Err(_) => debug!(session = id, "flush on close timed out"),
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(session = id, error = %e, "socket shutdown failed");
    }
    drop(writer);
    // Dropping the read half as well releases the socket even while other
    // Session handles are still alive.
    reader.lock().await.take();
}
