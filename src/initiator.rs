//! Initiator endpoint
//!
//! Accepts TCP connections on a local port and carries each one over its
//! own ephemeral UDP socket toward a remote Terminator.
//!
//! # Per-connection lifecycle
//!
//! ```text
//! accepted ──dial UDP──► active ──stream EOF / relay error──► closing
//!    │ (dial failed:                                             │
//!    │  connection dropped,                          send #close#,
//!    │  no session created)                          release handles
//!    ▼                                                           ▼
//!  dropped                                                    closed
//! ```
//!
//! Immediately after the UDP socket is opened a `#start#` datagram primes
//! the Terminator's session creation, so a return path exists through
//! address-translating middleboxes before any data flows. Accept errors
//! are logged and the accept loop continues; one bad accept must not kill
//! the endpoint.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::error::{InitiatorError, Result};
use crate::protocol::{CLOSE, START};
use crate::relay;
use crate::session::{Session, SessionKey, SessionState};
use crate::stats::{EndpointStats, EndpointStatsSnapshot};

/// The TCP-accepting tunnel endpoint
pub struct Initiator {
    /// TCP listener for local application connections
    listener: TcpListener,
    /// Actual listen address (after ephemeral port assignment)
    local_addr: SocketAddr,
    /// The Terminator's UDP address
    remote: SocketAddr,
    /// Endpoint statistics
    stats: Arc<EndpointStats>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl Initiator {
    /// Resolve the configuration and bind the TCP listener
    ///
    /// # Errors
    ///
    /// Returns a configuration error if validation or resolution fails,
    /// or a bind error if the listen address cannot be acquired. A bind
    /// failure is fatal to the endpoint.
    pub async fn bind(config: &EndpointConfig) -> Result<Self> {
        config.validate()?;
        let local = config.resolve_local().await?;
        let remote = config.resolve_remote().await?;

        let listener = TcpListener::bind(local)
            .await
            .map_err(|e| InitiatorError::bind(local.to_string(), e.to_string()))?;
        let local_addr = listener.local_addr().map_err(InitiatorError::from)?;

        info!(
            "Initiator listening on tcp {} forwarding to udp {}",
            local_addr, remote
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            local_addr,
            remote,
            stats: Arc::new(EndpointStats::new()),
            shutdown_tx,
        })
    }

    /// The actual TCP listen address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The Terminator's UDP address
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Snapshot of the endpoint statistics
    #[must_use]
    pub fn stats_snapshot(&self) -> EndpointStatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal the accept loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run the accept loop until shutdown
    ///
    /// Each accepted connection gets its own session task; accept errors
    /// are logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Currently only returns `Ok` after a shutdown signal; the result
    /// type leaves room for fatal listener errors.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Starting accept loop on {}", self.local_addr);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, client_addr)) => {
                        debug!(client = %client_addr, "accepted connection");
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            this.handle_connection(stream, client_addr).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept error");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Accept loop stopping");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Carry one accepted connection over the tunnel until it ends
    async fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        // Dial the datagram peer; on failure the connection is dropped
        // without creating a session.
        let socket = match self.dial_peer().await {
            Ok(socket) => socket,
            Err(e) => {
                self.stats.record_dial_failure();
                warn!(client = %client_addr, error = %e, "dropping connection: UDP dial failed");
                return;
            }
        };

        let session = Session::new(SessionKey::new(self.remote));
        self.stats.record_session_opened();

        // Prime the Terminator's session creation before any data flows
        if let Err(e) = socket.send_to(START, self.remote).await {
            warn!(client = %client_addr, error = %e, "failed to send start payload");
        }
        info!(client = %client_addr, peer = %self.remote, "session opened");

        let (mut reader, mut writer) = stream.into_split();

        // One pump per direction; whichever finishes first ends the
        // session and cancels the other.
        let result = tokio::select! {
            res = relay::pump_stream_to_datagrams(&mut reader, &socket, self.remote, &self.stats) => {
                res.map(|bytes| session.add_bytes_to_peer(bytes))
            }
            res = relay::pump_datagrams_to_stream(&socket, self.remote, &mut writer, &self.stats) => {
                res.map(|bytes| session.add_bytes_from_peer(bytes))
            }
        };

        session.transition(SessionState::Closing);
        if let Err(e) = &result {
            self.stats.record_relay_error();
            debug!(client = %client_addr, error = %e, "session relay ended with error");
        }

        // Tell the Terminator to tear down its side, then release both
        // handles. Teardown is idempotent: shutting down an already
        // closed stream is a no-op.
        if let Err(e) = socket.send_to(CLOSE, self.remote).await {
            debug!(client = %client_addr, error = %e, "failed to send close payload");
        }
        let _ = writer.shutdown().await;

        session.transition(SessionState::Closed);
        self.stats.record_session_closed();
        info!(
            client = %client_addr,
            bytes_up = session.bytes_to_peer(),
            bytes_down = session.bytes_from_peer(),
            "session closed"
        );
    }

    /// Open the per-session UDP socket toward the Terminator
    async fn dial_peer(&self) -> std::result::Result<UdpSocket, InitiatorError> {
        let bind_addr = if self.remote.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };

        UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| InitiatorError::dial(self.remote, e.to_string()))
    }
}

impl std::fmt::Debug for Initiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initiator")
            .field("local_addr", &self.local_addr)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_config() -> EndpointConfig {
        EndpointConfig::new("127.0.0.1", 0, "127.0.0.1", 7001)
    }

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let initiator = Initiator::bind(&test_config()).await.unwrap();
        assert_ne!(initiator.local_addr().port(), 0);
        assert_eq!(initiator.remote_addr(), "127.0.0.1:7001".parse().unwrap());

        let snapshot = initiator.stats_snapshot();
        assert_eq!(snapshot.sessions_opened, 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = EndpointConfig::new("", 0, "127.0.0.1", 7001);
        assert!(Initiator::bind(&config).await.is_err());

        let config = EndpointConfig::new("127.0.0.1", 0, "127.0.0.1", 0);
        assert!(Initiator::bind(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let initiator = Arc::new(Initiator::bind(&test_config()).await.unwrap());

        let handle = tokio::spawn(Arc::clone(&initiator).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        initiator.shutdown();

        let result = timeout(Duration::from_secs(5), handle).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_debug_impl() {
        let initiator = Initiator::bind(&test_config()).await.unwrap();
        let debug_str = format!("{initiator:?}");
        assert!(debug_str.contains("Initiator"));
        assert!(debug_str.contains("127.0.0.1"));
    }
}
