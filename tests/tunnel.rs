//! End-to-end tunnel tests over loopback
//!
//! These tests run a real Initiator and Terminator against loopback
//! sockets. Loopback delivers datagrams in order without loss, which is
//! the transport assumption behind the round-trip properties.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;

use udp_tunnel::config::EndpointConfig;
use udp_tunnel::initiator::Initiator;
use udp_tunnel::terminator::Terminator;

const WAIT: Duration = Duration::from_secs(10);

/// A destination that echoes every byte back and counts connections
struct EchoServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl EchoServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self { addr, connections }
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// A full tunnel: initiator + terminator wired to a destination
struct Tunnel {
    entry: SocketAddr,
    initiator: Arc<Initiator>,
    terminator: Arc<Terminator>,
}

impl Tunnel {
    async fn start(destination: SocketAddr) -> Self {
        let terminator_config = EndpointConfig::new(
            "127.0.0.1",
            0,
            destination.ip().to_string(),
            destination.port(),
        );
        let terminator = Arc::new(Terminator::bind(&terminator_config).await.unwrap());
        let terminator_addr = terminator.local_addr();
        tokio::spawn(Arc::clone(&terminator).run());

        let initiator_config = EndpointConfig::new(
            "127.0.0.1",
            0,
            terminator_addr.ip().to_string(),
            terminator_addr.port(),
        );
        let initiator = Arc::new(Initiator::bind(&initiator_config).await.unwrap());
        let entry = initiator.local_addr();
        tokio::spawn(Arc::clone(&initiator).run());

        Self {
            entry,
            initiator,
            terminator,
        }
    }

    async fn connect(&self) -> TcpStream {
        timeout(WAIT, TcpStream::connect(self.entry))
            .await
            .unwrap()
            .unwrap()
    }

    fn stop(&self) {
        self.initiator.shutdown();
        self.terminator.shutdown();
    }
}

/// Poll a condition until it holds or the deadline passes
async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_round_trip_small_payload() {
    let server = EchoServer::start().await;
    let tunnel = Tunnel::start(server.addr).await;

    let mut client = tunnel.connect().await;
    client.write_all(b"hello tunnel").await.unwrap();

    let mut echoed = [0u8; 12];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hello tunnel");

    tunnel.stop();
}

#[tokio::test]
async fn test_round_trip_multi_fragment_payload() {
    let server = EchoServer::start().await;
    let tunnel = Tunnel::start(server.addr).await;

    // Spans several datagrams in each direction
    let payload: Vec<u8> = (0..8000u32).map(|i| (i % 241) as u8).collect();

    let mut client = tunnel.connect().await;
    client.write_all(&payload).await.unwrap();

    let mut echoed = vec![0u8; payload.len()];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, payload);

    tunnel.stop();
}

#[tokio::test]
async fn test_sequential_writes_preserve_order() {
    let server = EchoServer::start().await;
    let tunnel = Tunnel::start(server.addr).await;

    let mut client = tunnel.connect().await;
    for chunk in [&b"first "[..], b"second ", b"third"] {
        client.write_all(chunk).await.unwrap();
    }

    let mut echoed = [0u8; 18];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"first second third");

    tunnel.stop();
}

#[tokio::test]
async fn test_two_sessions_never_exchange_bytes() {
    let server = EchoServer::start().await;
    let tunnel = Tunnel::start(server.addr).await;

    let mut client_a = tunnel.connect().await;
    let mut client_b = tunnel.connect().await;

    // Two simultaneous sessions, two destination connections
    wait_until(|| server.connection_count() == 2, "two destination dials").await;

    let payload_a = vec![b'a'; 3000];
    let payload_b = vec![b'b'; 3000];
    let (sent_a, sent_b) = tokio::join!(
        client_a.write_all(&payload_a),
        client_b.write_all(&payload_b)
    );
    sent_a.unwrap();
    sent_b.unwrap();

    let mut echoed_a = vec![0u8; payload_a.len()];
    let mut echoed_b = vec![0u8; payload_b.len()];
    let (read_a, read_b) = tokio::join!(
        timeout(WAIT, client_a.read_exact(&mut echoed_a)),
        timeout(WAIT, client_b.read_exact(&mut echoed_b))
    );
    read_a.unwrap().unwrap();
    read_b.unwrap().unwrap();

    assert_eq!(echoed_a, payload_a);
    assert_eq!(echoed_b, payload_b);

    tunnel.stop();
}

#[tokio::test]
async fn test_lazy_creation_dials_once_per_session() {
    let server = EchoServer::start().await;
    let tunnel = Tunnel::start(server.addr).await;

    let mut client = tunnel.connect().await;
    wait_until(|| server.connection_count() == 1, "first destination dial").await;

    // Several writes on the same session reuse the one connection
    for _ in 0..5 {
        client.write_all(b"ping").await.unwrap();
        let mut pong = [0u8; 4];
        timeout(WAIT, client.read_exact(&mut pong))
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(server.connection_count(), 1);

    // A second connection is a new session with its own dial
    let _client2 = tunnel.connect().await;
    wait_until(|| server.connection_count() == 2, "second destination dial").await;

    tunnel.stop();
}

#[tokio::test]
async fn test_close_propagates_to_destination() {
    // Destination that reports when its connection reaches end-of-stream
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = listener.local_addr().unwrap();
    let (eof_tx, mut eof_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let eof_tx = eof_tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => {
                            let _ = eof_tx.send(());
                            break;
                        }
                        Ok(_) => {}
                    }
                }
            });
        }
    });

    let tunnel = Tunnel::start(dest_addr).await;

    let mut client = tunnel.connect().await;
    client.write_all(b"goodbye").await.unwrap();
    wait_until(|| tunnel.terminator.active_sessions() == 1, "session creation").await;

    // Closing the client triggers a close datagram, which closes the
    // destination connection and removes the table entry
    drop(client);

    timeout(WAIT, eof_rx.recv()).await.unwrap().unwrap();
    wait_until(
        || tunnel.terminator.active_sessions() == 0,
        "session table removal",
    )
    .await;

    let stats = tunnel.terminator.stats_snapshot();
    assert_eq!(stats.sessions_opened, 1);
    assert_eq!(stats.sessions_closed, 1);

    tunnel.stop();
}

#[tokio::test]
async fn test_close_for_unknown_address_is_harmless() {
    let server = EchoServer::start().await;
    let tunnel = Tunnel::start(server.addr).await;
    let terminator_addr = tunnel.terminator.local_addr();

    // A bare close from an address the terminator has never seen
    let stray = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    stray.send_to(b"#close#", terminator_addr).await.unwrap();

    wait_until(
        || tunnel.terminator.stats_snapshot().datagrams_received >= 1,
        "stray close processing",
    )
    .await;
    assert_eq!(tunnel.terminator.active_sessions(), 0);
    assert_eq!(server.connection_count(), 0);

    // The endpoint keeps serving normally afterwards
    let mut client = tunnel.connect().await;
    client.write_all(b"still alive").await.unwrap();
    let mut echoed = [0u8; 11];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"still alive");

    tunnel.stop();
}

#[tokio::test]
async fn test_reverse_path_carries_destination_bytes() {
    // Destination that speaks first, like a banner-sending server
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = stream.write_all(b"banner!").await;
                // Hold the connection open until the peer goes away
                let mut buf = [0u8; 1];
                let _ = stream.read(&mut buf).await;
            });
        }
    });

    let tunnel = Tunnel::start(dest_addr).await;

    // The start datagram alone must open the session and the return path
    let mut client = tunnel.connect().await;
    let mut banner = [0u8; 7];
    timeout(WAIT, client.read_exact(&mut banner))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&banner, b"banner!");

    tunnel.stop();
}

#[tokio::test]
async fn test_initiator_stats_track_sessions() {
    let server = EchoServer::start().await;
    let tunnel = Tunnel::start(server.addr).await;

    let mut client = tunnel.connect().await;
    client.write_all(b"count me").await.unwrap();
    let mut echoed = [0u8; 8];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    drop(client);

    wait_until(
        || tunnel.initiator.stats_snapshot().sessions_closed == 1,
        "initiator session close",
    )
    .await;

    let stats = tunnel.initiator.stats_snapshot();
    assert_eq!(stats.sessions_opened, 1);
    // At least the data datagram went out, and the echo came back
    assert!(stats.datagrams_sent >= 1);
    assert!(stats.bytes_sent >= 8);

    tunnel.stop();
}
