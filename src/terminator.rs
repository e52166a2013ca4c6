//! Terminator endpoint
//!
//! Owns the single UDP socket shared by all sessions and the session
//! table that demultiplexes inbound datagrams by source address.
//!
//! # Architecture
//!
//! ```text
//!                      ┌───────────────────────────┐
//!  datagrams ─────────►│ receive loop (one task)   │
//!                      │  - classify payload       │
//!                      │  - session table lookup   │
//!                      │  - lazy TCP dial          │──► dispatcher ──► one
//!                      │  - forward data verbatim  │    (mpsc)         relay
//!                      └───────────────────────────┘                   task
//!                                                                      per
//!  destination ◄── per-session TCP connection ◄────────────────────── session
//! ```
//!
//! New sessions are handed to a dispatcher task over a channel, so
//! discovering a new peer never blocks on starting its relay loop. The
//! receive loop itself performs the lazy destination dial: a dial failure
//! drops the datagram without creating a table entry, and the next
//! datagram from the same address retries.

use std::net::SocketAddr;

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, trace, warn};

use crate::config::EndpointConfig;
use crate::error::{Result, TerminatorError};
use crate::protocol::{self, Payload, MAX_PAYLOAD};
use crate::relay;
use crate::session::{Session, SessionKey, SessionState};
use crate::stats::{EndpointStats, EndpointStatsSnapshot};
use crate::table::SessionTable;

/// One Terminator-side session: the destination connection's write half
/// plus lifecycle state.
///
/// The read half lives in the session's relay task; the write half stays
/// here so the receive loop can forward datagram payloads. The reverse
/// mapping (stream → peer address) is the session key carried by the
/// relay task.
pub struct TerminatorSession {
    /// Session identity and lifecycle
    session: Session,
    /// Write half of the destination connection
    writer: Mutex<OwnedWriteHalf>,
    /// Per-session shutdown signal for the relay task
    shutdown_tx: broadcast::Sender<()>,
}

impl TerminatorSession {
    fn new(key: SessionKey, writer: OwnedWriteHalf) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            session: Session::new(key),
            writer: Mutex::new(writer),
            shutdown_tx,
        }
    }

    /// Session identity and counters
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Release the session's handles
    ///
    /// Cancels the relay task and shuts down the destination connection.
    /// Idempotent: repeating any step on an already torn down session is
    /// a no-op.
    async fn teardown(&self) {
        self.session.transition(SessionState::Closing);
        let _ = self.shutdown_tx.send(());
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        self.session.transition(SessionState::Closed);
    }
}

impl std::fmt::Debug for TerminatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminatorSession")
            .field("peer", &self.session.key())
            .field("state", &self.session.state())
            .finish_non_exhaustive()
    }
}

/// A newly created session on its way to the dispatcher
struct NewSession {
    key: SessionKey,
    reader: OwnedReadHalf,
    handle: Arc<TerminatorSession>,
}

/// The UDP-receiving tunnel endpoint
pub struct Terminator {
    /// The single UDP socket shared by all sessions
    socket: UdpSocket,
    /// Actual bind address (after ephemeral port assignment)
    local_addr: SocketAddr,
    /// The real TCP destination sessions are replayed onto
    destination: SocketAddr,
    /// Peer address → session
    table: SessionTable<TerminatorSession>,
    /// Endpoint statistics
    stats: Arc<EndpointStats>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl Terminator {
    /// Resolve the configuration and bind the shared UDP socket
    ///
    /// # Errors
    ///
    /// Returns a configuration error if validation or resolution fails,
    /// or a bind error if the UDP socket cannot be acquired. A bind
    /// failure is fatal to the endpoint.
    pub async fn bind(config: &EndpointConfig) -> Result<Self> {
        config.validate()?;
        let local = config.resolve_local().await?;
        let destination = config.resolve_remote().await?;

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TerminatorError::bind(local.to_string(), e.to_string()))?;
        let local_addr = socket.local_addr().map_err(TerminatorError::from)?;

        info!(
            "Terminator listening on udp {} replaying to tcp {}",
            local_addr, destination
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            socket,
            local_addr,
            destination,
            table: SessionTable::new(),
            stats: Arc::new(EndpointStats::new()),
            shutdown_tx,
        })
    }

    /// The actual UDP bind address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The TCP destination address
    #[must_use]
    pub const fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Number of live sessions
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.table.len()
    }

    /// Snapshot of the endpoint statistics
    #[must_use]
    pub fn stats_snapshot(&self) -> EndpointStatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal the receive loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run the datagram receive loop until shutdown
    ///
    /// Receive errors are logged and the loop continues; session
    /// teardown at shutdown is graceful.
    ///
    /// # Errors
    ///
    /// Currently only returns `Ok` after a shutdown signal; the result
    /// type leaves room for fatal socket errors.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Starting receive loop on {}", self.local_addr);

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(Arc::clone(&self).dispatch_loop(dispatch_rx));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut buf = vec![0u8; MAX_PAYLOAD];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, source)) => {
                        let payload = Bytes::copy_from_slice(&buf[..n]);
                        self.handle_datagram(payload, source, &dispatch_tx).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "datagram receive error");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Receive loop stopping");
                    break;
                }
            }
        }

        drop(dispatch_tx);
        let _ = dispatcher.await;
        self.teardown_all().await;

        Ok(())
    }

    /// Spawn one relay task per dispatched session
    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<NewSession>) {
        while let Some(new_session) = rx.recv().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_session_relay(new_session).await;
            });
        }
    }

    /// Demultiplex one received datagram
    async fn handle_datagram(
        &self,
        payload: Bytes,
        source: SocketAddr,
        dispatch_tx: &mpsc::UnboundedSender<NewSession>,
    ) {
        self.stats.record_datagram_received(payload.len());
        let key = SessionKey::new(source);

        match protocol::classify(&payload) {
            Payload::Close => {
                if let Some(handle) = self.table.remove(&key) {
                    info!(peer = %key, "close received, tearing down session");
                    handle.teardown().await;
                    self.stats.record_session_closed();
                } else {
                    // Idempotent: close for an unknown address is a no-op
                    debug!(peer = %key, "close for unknown session ignored");
                }
            }
            classified @ (Payload::Start | Payload::Data(_)) => {
                let handle = match self.table.get(&key) {
                    Some(handle) => handle,
                    None => match self.open_session(key, dispatch_tx).await {
                        Some(handle) => handle,
                        None => return,
                    },
                };

                // A start payload only primes session creation; it
                // carries no data to forward.
                if let Payload::Data(data) = classified {
                    self.forward(key, &handle, data).await;
                }
            }
        }
    }

    /// Dial the destination and insert a new session
    ///
    /// On dial failure no table entry is created; the dropped datagram's
    /// successor retries.
    async fn open_session(
        &self,
        key: SessionKey,
        dispatch_tx: &mpsc::UnboundedSender<NewSession>,
    ) -> Option<Arc<TerminatorSession>> {
        let stream = match TcpStream::connect(self.destination).await {
            Ok(stream) => stream,
            Err(e) => {
                self.stats.record_dial_failure();
                warn!(
                    peer = %key,
                    destination = %self.destination,
                    error = %e,
                    "destination dial failed, dropping datagram"
                );
                return None;
            }
        };

        let (reader, writer) = stream.into_split();
        let handle = Arc::new(TerminatorSession::new(key, writer));

        if !self.table.insert(key, Arc::clone(&handle)) {
            // Lookups and insertions both run on the receive task, so an
            // occupied slot cannot appear between them; keep the existing
            // session if it somehow does.
            debug!(peer = %key, "session already present, keeping existing");
            return self.table.get(&key);
        }

        self.stats.record_session_opened();
        info!(peer = %key, destination = %self.destination, "session opened");

        let dispatched = NewSession {
            key,
            reader,
            handle: Arc::clone(&handle),
        };
        if dispatch_tx.send(dispatched).is_err() {
            // Dispatcher is gone: the endpoint is shutting down
            self.table.remove(&key);
            return None;
        }

        Some(handle)
    }

    /// Forward a data payload verbatim onto the session's stream
    async fn forward(&self, key: SessionKey, handle: &TerminatorSession, data: &[u8]) {
        let mut writer = handle.writer.lock().await;
        match writer.write_all(data).await {
            Ok(()) => {
                drop(writer);
                handle.session.add_bytes_from_peer(data.len() as u64);
                trace!(peer = %key, bytes = data.len(), "datagram -> stream");
            }
            Err(e) if stream_closed(&e) => {
                drop(writer);
                debug!(peer = %key, error = %e, "stream closed, removing session");
                if let Some(removed) = self.table.remove(&key) {
                    removed.teardown().await;
                    self.stats.record_session_closed();
                }
            }
            Err(e) => {
                // Other write errors drop the datagram without tearing
                // down the session
                drop(writer);
                self.stats.record_relay_error();
                warn!(peer = %key, error = %e, "stream write error, dropping datagram");
            }
        }
    }

    /// Run one session's stream→datagram relay until the stream ends
    async fn run_session_relay(&self, new_session: NewSession) {
        let NewSession {
            key,
            mut reader,
            handle,
        } = new_session;
        let mut shutdown_rx = handle.subscribe_shutdown();

        tokio::select! {
            res = relay::pump_stream_to_datagrams(&mut reader, &self.socket, key.peer(), &self.stats) => {
                match res {
                    Ok(bytes) => {
                        handle.session.add_bytes_to_peer(bytes);
                        debug!(peer = %key, bytes, "destination stream ended");
                    }
                    Err(e) => {
                        self.stats.record_relay_error();
                        debug!(peer = %key, error = %e, "session relay ended with error");
                    }
                }
                // The stream side is gone; release the table entry.
                // Idempotent with concurrent close handling.
                if let Some(removed) = self.table.remove(&key) {
                    removed.teardown().await;
                    self.stats.record_session_closed();
                }
            }
            _ = shutdown_rx.recv() => {
                trace!(peer = %key, "session relay cancelled");
            }
        }
    }

    /// Tear down every live session (endpoint shutdown)
    async fn teardown_all(&self) {
        for (key, handle) in self.table.drain() {
            debug!(peer = %key, "closing session at shutdown");
            handle.teardown().await;
            self.stats.record_session_closed();
        }
    }
}

impl std::fmt::Debug for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminator")
            .field("local_addr", &self.local_addr)
            .field("destination", &self.destination)
            .field("active_sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}

/// Does this write error mean the stream is already closed?
fn stream_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
    )
}
