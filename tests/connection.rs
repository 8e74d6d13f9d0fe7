use bytes::Bytes;
use peerlink::peer::{
    ConnectionConfig, ConnectionState, Handshake, Message, PeerConfig, PeerConnection, PeerError,
    PeerMessage, SendMode,
};
use peerlink::EventLog;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn peer(id: u32, port: u16) -> Arc<PeerConfig> {
    Arc::new(PeerConfig::new(id, "127.0.0.1", port, false))
}

struct Pair {
    active: PeerConnection,
    active_rx: mpsc::Receiver<PeerMessage>,
    passive: PeerConnection,
    passive_rx: mpsc::Receiver<PeerMessage>,
}

/// Starts an active connection from 1001 to a passive 1002 over loopback.
async fn connect_pair(active_config: ConnectionConfig, passive_config: ConnectionConfig) -> Pair {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let active_peer = peer(1001, 0);
    let passive_peer = peer(1002, port);

    let (active_tx, active_rx) = mpsc::channel(1024);
    let (passive_tx, passive_rx) = mpsc::channel(1024);

    let mut active = PeerConnection::active(
        active_peer.clone(),
        passive_peer.clone(),
        active_tx,
        active_config,
    );

    let passive_side = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut passive =
            PeerConnection::passive(passive_peer, active_peer, stream, passive_tx, passive_config);
        let result = passive.start().await;
        (passive, result)
    };

    let (active_result, (passive, passive_result)) = tokio::join!(active.start(), passive_side);
    active_result.unwrap();
    passive_result.unwrap();

    Pair {
        active,
        active_rx,
        passive,
        passive_rx,
    }
}

async fn recv(rx: &mut mpsc::Receiver<PeerMessage>) -> PeerMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("sink closed")
}

async fn wait_until_not_reading(conn: &PeerConnection) {
    timeout(WAIT, async {
        while conn.is_reading() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reader did not stop");
}

#[tokio::test]
async fn test_have_reaches_passive_sink() {
    let mut pair = connect_pair(ConnectionConfig::default(), ConnectionConfig::default()).await;
    assert_eq!(pair.active.state(), ConnectionState::Open);
    assert_eq!(pair.passive.state(), ConnectionState::Open);
    assert!(pair.active.peer_addr().is_some());

    pair.active.send(Message::Have { piece: 3 }).await.unwrap();

    let received = recv(&mut pair.passive_rx).await;
    assert_eq!(received.message, Message::Have { piece: 3 });
    assert_eq!(received.peer.id, 1001);

    // Content matches what was sent regardless of the attached peer.
    let sent = PeerMessage::new(pair.active.remote().clone(), Message::Have { piece: 3 });
    assert_eq!(sent.message, received.message);
    assert_ne!(sent, received);

    pair.passive.stop().await.unwrap();
    pair.active.stop().await.unwrap();
}

#[tokio::test]
async fn test_messages_flow_both_ways_in_order() {
    let sync = ConnectionConfig::default().with_send_mode(SendMode::Synchronous);
    let mut pair = connect_pair(sync.clone(), sync).await;

    let outbound = vec![
        Message::Bitfield(peerlink::Bitfield::full(20)),
        Message::Interested,
        Message::Request { piece: 4 },
        Message::Piece {
            index: 4,
            data: Bytes::from(vec![0xab; 64 * 1024]),
        },
        Message::NotInterested,
    ];
    for msg in &outbound {
        pair.active.send(msg.clone()).await.unwrap();
    }
    for msg in &outbound {
        assert_eq!(&recv(&mut pair.passive_rx).await.message, msg);
    }

    pair.passive.send(Message::Unchoke).await.unwrap();
    pair.passive.send(Message::Choke).await.unwrap();
    assert_eq!(recv(&mut pair.active_rx).await.message, Message::Unchoke);
    assert_eq!(recv(&mut pair.active_rx).await.message, Message::Choke);

    pair.active.stop().await.unwrap();
    pair.passive.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_senders_do_not_interleave() {
    let mut pair = connect_pair(ConnectionConfig::default(), ConnectionConfig::default()).await;

    const SENDERS: u32 = 8;
    const PER_SENDER: u32 = 50;

    let mut tasks = Vec::new();
    for s in 0..SENDERS {
        let sender = pair.active.sender().unwrap();
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_SENDER {
                let index = s * PER_SENDER + i;
                let data = Bytes::from(vec![s as u8; 1000 + i as usize]);
                sender.send(Message::Piece { index, data }).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut seen = vec![false; (SENDERS * PER_SENDER) as usize];
    for _ in 0..SENDERS * PER_SENDER {
        let msg = recv(&mut pair.passive_rx).await;
        let Message::Piece { index, data } = msg.message else {
            panic!("expected piece, got {}", msg.message);
        };
        let s = index / PER_SENDER;
        let i = index % PER_SENDER;
        assert_eq!(data.len(), 1000 + i as usize);
        assert!(data.iter().all(|&b| b == s as u8));
        assert!(!seen[index as usize]);
        seen[index as usize] = true;
    }
    assert!(seen.iter().all(|&s| s));

    pair.active.stop().await.unwrap();
    pair.passive.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_blocks_sends() {
    let mut pair = connect_pair(ConnectionConfig::default(), ConnectionConfig::default()).await;
    let sender = pair.active.sender().unwrap();

    pair.active.stop().await.unwrap();
    assert_eq!(pair.active.state(), ConnectionState::Closed);
    pair.active.stop().await.unwrap();

    assert!(matches!(
        pair.active.send(Message::Choke).await,
        Err(PeerError::NotConnected)
    ));
    assert!(sender.is_closed());
    assert!(matches!(
        sender.send(Message::Choke).await,
        Err(PeerError::NotConnected)
    ));

    // The passive reader sees EOF and stops, but the connection stays open
    // until stopped explicitly.
    wait_until_not_reading(&pair.passive).await;
    assert_eq!(pair.passive.state(), ConnectionState::Open);
    pair.passive.stop().await.unwrap();
}

#[tokio::test]
async fn test_queued_frames_are_flushed_on_stop() {
    let mut pair = connect_pair(ConnectionConfig::default(), ConnectionConfig::default()).await;

    for piece in 0..20 {
        pair.active.send(Message::Have { piece }).await.unwrap();
    }
    pair.active.stop().await.unwrap();

    for piece in 0..20 {
        assert_eq!(
            recv(&mut pair.passive_rx).await.message,
            Message::Have { piece }
        );
    }
    pair.passive.stop().await.unwrap();
}

/// Sends `Have` until a write fails, pausing so the peer's reset can land.
async fn send_until_failure(conn: &PeerConnection) -> Option<PeerError> {
    for piece in 0..200 {
        if let Err(e) = conn.send(Message::Have { piece }).await {
            return Some(e);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn test_sync_send_reports_write_failure() {
    let sync = ConnectionConfig::default().with_send_mode(SendMode::Synchronous);
    let mut pair = connect_pair(sync.clone(), sync).await;
    pair.passive.stop().await.unwrap();

    let err = send_until_failure(&pair.active)
        .await
        .expect("writes to a closed peer kept succeeding");
    assert!(matches!(err, PeerError::TransportWrite(_)), "{:?}", err);

    // A failed write does not tear the connection down.
    assert_eq!(pair.active.state(), ConnectionState::Open);
    assert!(!pair.active.sender().unwrap().is_closed());
    assert!(matches!(
        pair.active.send(Message::Choke).await,
        Err(PeerError::TransportWrite(_))
    ));

    let _ = pair.active.stop().await;
    assert_eq!(pair.active.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_fire_and_forget_hides_write_failure() {
    let mut pair = connect_pair(ConnectionConfig::default(), ConnectionConfig::default()).await;
    pair.passive.stop().await.unwrap();

    assert!(send_until_failure(&pair.active).await.is_none());
    assert_eq!(pair.active.state(), ConnectionState::Open);
    assert!(!pair.active.sender().unwrap().is_closed());

    let _ = pair.active.stop().await;
    assert_eq!(pair.active.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_oversized_send_is_refused() {
    let mut config = ConnectionConfig::default().with_send_mode(SendMode::Synchronous);
    config.max_frame_len = 1024;
    let mut pair = connect_pair(config.clone(), config).await;

    let big = Message::Piece {
        index: 0,
        data: Bytes::from(vec![7u8; 2000]),
    };
    assert!(matches!(
        pair.active.send(big).await,
        Err(PeerError::FrameTooLarge(2009))
    ));
    assert_eq!(pair.active.state(), ConnectionState::Open);

    pair.active.send(Message::Have { piece: 5 }).await.unwrap();
    assert_eq!(
        recv(&mut pair.passive_rx).await.message,
        Message::Have { piece: 5 }
    );

    pair.active.stop().await.unwrap();
    pair.passive.stop().await.unwrap();
}

#[tokio::test]
async fn test_handshake_id_mismatch_fails_active_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // The active side expects 1002, but the listener answers as 1003.
    let (tx, _rx) = mpsc::channel(8);
    let mut active = PeerConnection::active(
        peer(1001, 0),
        peer(1002, port),
        tx,
        ConnectionConfig::default(),
    );

    let impostor = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 32];
        stream.read_exact(&mut buf).await.unwrap();
        assert!(Handshake::is_valid(&buf, 1001));
        stream
            .write_all(&Handshake::new(1003).encode())
            .await
            .unwrap();
        stream
    });

    let result = active.start().await;
    assert!(matches!(
        result,
        Err(PeerError::HandshakeIdMismatch {
            expected: 1002,
            actual: 1003
        })
    ));
    assert_eq!(active.state(), ConnectionState::Closed);
    assert!(!active.is_reading());
    assert!(active.sender().is_none());
    drop(impostor.await.unwrap());

    assert!(matches!(
        active.start().await,
        Err(PeerError::AlreadyStarted)
    ));
    active.stop().await.unwrap();
}

#[tokio::test]
async fn test_passive_rejects_bad_header() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut bytes = Handshake::new(1001).encode().to_vec();
        bytes[0] = b'X';
        stream.write_all(&bytes).await.unwrap();

        // A rejected handshake is never answered.
        let mut buf = [0u8; 32];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    });

    let (stream, _) = listener.accept().await.unwrap();
    let (tx, _rx) = mpsc::channel(8);
    let mut passive = PeerConnection::passive(
        peer(1002, addr.port()),
        peer(1001, 0),
        stream,
        tx,
        ConnectionConfig::default(),
    );

    assert!(matches!(
        passive.start().await,
        Err(PeerError::HandshakeHeaderMismatch)
    ));
    assert_eq!(passive.state(), ConnectionState::Closed);
    passive.stop().await.unwrap();
    client.await.unwrap();
}

#[tokio::test]
async fn test_passive_truncated_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&Handshake::new(1001).encode()[..10])
            .await
            .unwrap();
    });

    let (stream, _) = listener.accept().await.unwrap();
    client.await.unwrap();

    let (tx, _rx) = mpsc::channel(8);
    let mut passive = PeerConnection::passive(
        peer(1002, addr.port()),
        peer(1001, 0),
        stream,
        tx,
        ConnectionConfig::default(),
    );

    assert!(matches!(
        passive.start().await,
        Err(PeerError::HandshakeTruncated(10))
    ));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (tx, _rx) = mpsc::channel(8);
    let mut active = PeerConnection::active(
        peer(1001, 0),
        peer(1002, port),
        tx,
        ConnectionConfig::default(),
    );

    assert!(matches!(
        active.start().await,
        Err(PeerError::Connect { .. })
    ));
    assert_eq!(active.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_unresolvable_host() {
    let (tx, _rx) = mpsc::channel(8);
    let remote = Arc::new(PeerConfig::new(1002, "no-such-peer.invalid", 6008, false));
    let mut active = PeerConnection::active(peer(1001, 0), remote, tx, ConnectionConfig::default());

    assert!(matches!(
        active.start().await,
        Err(PeerError::AddressResolution { .. })
    ));
    assert_eq!(active.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_malformed_frame_stops_reader_only() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&Handshake::new(1001).encode())
            .await
            .unwrap();
        let mut buf = [0u8; 32];
        stream.read_exact(&mut buf).await.unwrap();
        assert!(Handshake::is_valid(&buf, 1002));

        stream.write_all(&Message::Have { piece: 1 }.encode()).await.unwrap();
        // Unknown type code 9.
        stream.write_all(&[0, 0, 0, 5, 9]).await.unwrap();
        stream.write_all(&Message::Have { piece: 2 }.encode()).await.unwrap();

        // The connection can still carry our outbound frames.
        let mut frame = [0u8; 5];
        stream.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0, 0, 0, 5, 2]);
        stream
    });

    let (stream, _) = listener.accept().await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let mut passive = PeerConnection::passive(
        peer(1002, addr.port()),
        peer(1001, 0),
        stream,
        tx,
        ConnectionConfig::default().with_send_mode(SendMode::Synchronous),
    );
    passive.start().await.unwrap();

    assert_eq!(recv(&mut rx).await.message, Message::Have { piece: 1 });
    wait_until_not_reading(&passive).await;
    assert!(rx.try_recv().is_err());

    assert!(passive.is_open());
    passive.send(Message::Interested).await.unwrap();
    let _stream = client.await.unwrap();

    passive.stop().await.unwrap();
}

#[tokio::test]
async fn test_dropped_sink_stops_reader() {
    let mut pair = connect_pair(ConnectionConfig::default(), ConnectionConfig::default()).await;
    drop(pair.passive_rx);

    pair.active.send(Message::Choke).await.unwrap();
    wait_until_not_reading(&pair.passive).await;

    pair.active.stop().await.unwrap();
    pair.passive.stop().await.unwrap();
}

#[tokio::test]
async fn test_events_are_logged() {
    let temp = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let active_log = Arc::new(EventLog::open(temp.path(), 1001));
    let passive_log = Arc::new(EventLog::open(temp.path(), 1002));

    let (active_tx, _active_rx) = mpsc::channel(8);
    let (passive_tx, mut passive_rx) = mpsc::channel(8);

    let mut active = PeerConnection::active(
        peer(1001, 0),
        peer(1002, port),
        active_tx,
        ConnectionConfig::default(),
    )
    .with_event_log(active_log.clone());

    let passive_side = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut passive = PeerConnection::passive(
            peer(1002, port),
            peer(1001, 0),
            stream,
            passive_tx,
            ConnectionConfig::default(),
        )
        .with_event_log(passive_log.clone());
        passive.start().await.unwrap();
        passive
    };
    let (result, mut passive) = tokio::join!(active.start(), passive_side);
    result.unwrap();

    active.send(Message::Unchoke).await.unwrap();
    active.send(Message::Interested).await.unwrap();
    recv(&mut passive_rx).await;
    recv(&mut passive_rx).await;

    active.stop().await.unwrap();
    passive.stop().await.unwrap();

    let active_lines = std::fs::read_to_string(active_log.path()).unwrap();
    assert!(active_lines.contains("Peer 1001 makes a connection to Peer 1002."));

    let passive_lines = std::fs::read_to_string(passive_log.path()).unwrap();
    assert!(passive_lines.contains("Peer 1002 is unchoked by 1001."));
    assert!(passive_lines.contains("Peer 1002 received the 'interested' message from 1001."));
}
