//! Endpoint statistics
//!
//! Counters shared by both endpoint roles, updated from the accept,
//! receive, and relay paths and read out as a serializable snapshot at
//! shutdown or on demand.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Statistics for a tunnel endpoint
#[derive(Debug, Default)]
pub struct EndpointStats {
    /// Sessions opened
    sessions_opened: AtomicU64,
    /// Sessions closed (torn down for any reason)
    sessions_closed: AtomicU64,
    /// Datagrams sent toward the peer
    datagrams_sent: AtomicU64,
    /// Datagrams received from the peer
    datagrams_received: AtomicU64,
    /// Payload bytes sent toward the peer
    bytes_sent: AtomicU64,
    /// Payload bytes received from the peer
    bytes_received: AtomicU64,
    /// Datagrams discarded (spoofed source, no usable session)
    datagrams_discarded: AtomicU64,
    /// Dial failures (UDP peer or TCP destination)
    dial_failures: AtomicU64,
    /// Relay loop errors
    relay_errors: AtomicU64,
}

impl EndpointStats {
    /// Create zeroed stats
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session opened
    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session closed
    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram sent with its payload size
    pub fn record_datagram_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a datagram received with its payload size
    pub fn record_datagram_received(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a discarded datagram
    pub fn record_datagram_discarded(&self) {
        self.datagrams_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dial failure
    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a relay loop error
    pub fn record_relay_error(&self) {
        self.relay_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Sessions opened so far
    #[must_use]
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Sessions closed so far
    #[must_use]
    pub fn sessions_closed(&self) -> u64 {
        self.sessions_closed.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> EndpointStatsSnapshot {
        EndpointStatsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_discarded: self.datagrams_discarded.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            relay_errors: self.relay_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of endpoint statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EndpointStatsSnapshot {
    /// Sessions opened
    pub sessions_opened: u64,
    /// Sessions closed
    pub sessions_closed: u64,
    /// Datagrams sent
    pub datagrams_sent: u64,
    /// Datagrams received
    pub datagrams_received: u64,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Datagrams discarded
    pub datagrams_discarded: u64,
    /// Dial failures
    pub dial_failures: u64,
    /// Relay errors
    pub relay_errors: u64,
}

impl EndpointStatsSnapshot {
    /// Sessions still accounted as live
    #[must_use]
    pub const fn sessions_live(&self) -> u64 {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }

    /// Total payload bytes moved in both directions
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }
}
