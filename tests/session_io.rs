//! Integration tests for session I/O through a running client.

mod common;

use std::collections::HashMap;

use common::{fast_config, start_echo, HandoffAgent, WAIT};
use relink::client::{Session, SessionError, TcpClient};
use relink::codec::{ByteOrder, FrameError};
use relink::config::{ClientConfig, FrameConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Starts a single-slot client that hands its first session to the test.
async fn handoff_client(config: ClientConfig) -> (TcpClient, Session) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = TcpClient::new(config, move |session| HandoffAgent {
        session,
        handoff: tx.clone(),
    });
    client.start().expect("Failed to start client");
    let session = timeout(WAIT, rx.recv())
        .await
        .expect("agent should start")
        .expect("handoff channel open");
    (client, session)
}

#[tokio::test]
async fn test_concurrent_senders_lose_nothing_and_keep_order() {
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 200;

    let echo = start_echo("127.0.0.1:0").await;
    let (client, session) =
        handoff_client(fast_config(echo.addr).with_pending_write_num(8)).await;

    let mut senders = Vec::new();
    for sender in 0..SENDERS {
        let session = session.clone();
        senders.push(tokio::spawn(async move {
            for seq in 0..PER_SENDER {
                session
                    .send(format!("{}:{}", sender, seq))
                    .await
                    .expect("send on a live session");
            }
        }));
    }

    let mut next_seq: HashMap<usize, usize> = HashMap::new();
    for _ in 0..SENDERS * PER_SENDER {
        let frame = timeout(WAIT, session.receive())
            .await
            .expect("echo arrives")
            .expect("receive on a live session");
        let text = std::str::from_utf8(&frame).expect("utf8 payload");
        let (sender, seq) = text.split_once(':').expect("sender:seq payload");
        let sender: usize = sender.parse().expect("sender id");
        let seq: usize = seq.parse().expect("sequence number");

        let expected = next_seq.entry(sender).or_insert(0);
        assert_eq!(seq, *expected, "frames from sender {} reordered", sender);
        *expected += 1;
    }

    for handle in senders {
        handle.await.expect("sender task");
    }
    assert_eq!(next_seq.len(), SENDERS);
    assert!(next_seq.values().all(|&n| n == PER_SENDER));

    client.close().await;
    assert!(session.is_closed());
    echo.stop().await;
}

#[tokio::test]
async fn test_configured_frame_layout_is_used_on_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to read address");

    let frame = FrameConfig::new(4, 1024).with_byte_order(ByteOrder::Little);
    let config = ClientConfig::new(addr.to_string(), frame);
    let accept = tokio::spawn(async move { listener.accept().await });
    let (client, session) = handoff_client(config).await;
    let (mut peer, _) = timeout(WAIT, accept)
        .await
        .expect("client connects")
        .expect("accept task")
        .expect("accept");

    session.send(b"ping").await.expect("send");
    let mut wire = [0u8; 8];
    timeout(WAIT, peer.read_exact(&mut wire))
        .await
        .expect("frame arrives")
        .expect("read");
    assert_eq!(wire, [0x04, 0x00, 0x00, 0x00, b'p', b'i', b'n', b'g']);

    peer.write_all(&[0x04, 0x00, 0x00, 0x00, b'p', b'o', b'n', b'g'])
        .await
        .expect("write");
    let reply = timeout(WAIT, session.receive())
        .await
        .expect("reply arrives")
        .expect("receive");
    assert_eq!(&reply[..], b"pong");

    client.close().await;
}

#[tokio::test]
async fn test_oversized_send_leaves_session_usable() {
    let echo = start_echo("127.0.0.1:0").await;
    let (client, session) = handoff_client(fast_config(echo.addr)).await;

    let oversized = vec![0u8; 4097];
    match session.send(&oversized).await {
        Err(SessionError::Frame(FrameError::TooLarge { len, max })) => {
            assert_eq!(len, 4097);
            assert_eq!(max, 4096);
        }
        other => panic!("expected TooLarge, got {:?}", other),
    }
    assert!(!session.is_closed());

    session.send(b"still here").await.expect("send");
    let reply = timeout(WAIT, session.receive())
        .await
        .expect("echo arrives")
        .expect("receive");
    assert_eq!(&reply[..], b"still here");

    client.close().await;
    echo.stop().await;
}

#[tokio::test]
async fn test_remote_disconnect_ends_receive_and_rejects_send() {
    let echo = start_echo("127.0.0.1:0").await;
    let (client, session) = handoff_client(fast_config(echo.addr)).await;

    echo.stop().await;
    let err = timeout(WAIT, session.receive())
        .await
        .expect("receive observes the disconnect")
        .expect_err("no frame after the remote closed");
    assert!(
        matches!(err, SessionError::Eof | SessionError::Closed),
        "got {:?}",
        err
    );
    assert!(session.is_closed());
    assert!(matches!(
        session.send(b"late").await,
        Err(SessionError::Closed)
    ));

    client.close().await;
}
