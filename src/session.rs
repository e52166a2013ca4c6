//! Session identity and lifecycle
//!
//! A session is the unit of multiplexing: the association between one
//! stream connection and one datagram peer address. On the Terminator the
//! peer address is the Initiator's outbound UDP socket address; on the
//! Initiator it is the fixed Terminator address.
//!
//! # Design
//!
//! The session key is an explicit value type wrapping the peer address
//! rather than a bare `SocketAddr`. Today the address *is* the identity;
//! keeping the key separate from raw connection handles lets a future
//! protocol version substitute an explicit session identifier without
//! touching the relay logic.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Key identifying a session: the datagram peer address.
///
/// At most one session exists per distinct key at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(SocketAddr);

impl SessionKey {
    /// Create a session key from a peer address
    #[must_use]
    pub const fn new(peer: SocketAddr) -> Self {
        Self(peer)
    }

    /// The datagram peer address identifying this session
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<SocketAddr> for SessionKey {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

/// Session lifecycle state
///
/// Transitions are monotonic: Active → Closing → Closed. A session never
/// moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Both relay directions are running
    Active = 0,
    /// Teardown has begun; handles are being released
    Closing = 1,
    /// Handles released and, on the Terminator, the table entry removed
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One logical TCP flow carried over the tunnel
///
/// Tracks identity, lifecycle state, and transfer counters. The stream
/// and datagram handles themselves are owned by the session's relay
/// tasks, not stored here.
#[derive(Debug)]
pub struct Session {
    /// Session key (datagram peer address)
    key: SessionKey,
    /// Lifecycle state
    state: AtomicU8,
    /// Bytes pumped from the stream toward the peer
    bytes_to_peer: AtomicU64,
    /// Bytes pumped from the peer onto the stream
    bytes_from_peer: AtomicU64,
    /// Creation timestamp
    created_at: Instant,
}

impl Session {
    /// Create a new active session
    #[must_use]
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            state: AtomicU8::new(SessionState::Active as u8),
            bytes_to_peer: AtomicU64::new(0),
            bytes_from_peer: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// The session key
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        self.key
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance the lifecycle state
    ///
    /// Returns `true` if the state changed. Transitions only move
    /// forward; trying to regress (or repeat) a state is a no-op, which
    /// keeps teardown idempotent.
    pub fn transition(&self, to: SessionState) -> bool {
        let previous = self.state.fetch_max(to as u8, Ordering::AcqRel);
        previous < to as u8
    }

    /// Record bytes sent toward the peer
    pub fn add_bytes_to_peer(&self, bytes: u64) {
        self.bytes_to_peer.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes written from the peer onto the stream
    pub fn add_bytes_from_peer(&self, bytes: u64) {
        self.bytes_from_peer.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes pumped from the stream toward the peer
    #[must_use]
    pub fn bytes_to_peer(&self) -> u64 {
        self.bytes_to_peer.load(Ordering::Relaxed)
    }

    /// Bytes pumped from the peer onto the stream
    #[must_use]
    pub fn bytes_from_peer(&self) -> u64 {
        self.bytes_from_peer.load(Ordering::Relaxed)
    }

    /// Session age
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Snapshot of the session for diagnostics
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            peer: self.key.peer(),
            state: self.state(),
            bytes_to_peer: self.bytes_to_peer(),
            bytes_from_peer: self.bytes_from_peer(),
            age_secs: self.age().as_secs(),
        }
    }
}

/// Snapshot of session state for serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Datagram peer address
    pub peer: SocketAddr,
    /// Lifecycle state
    pub state: SessionState,
    /// Bytes pumped toward the peer
    pub bytes_to_peer: u64,
    /// Bytes pumped from the peer
    pub bytes_from_peer: u64,
    /// Session age in seconds
    pub age_secs: u64,
}
