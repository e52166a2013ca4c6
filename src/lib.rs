//! udp-tunnel: TCP-over-UDP tunnel endpoints
//!
//! This crate carries TCP byte streams across network paths that only pass
//! UDP (or where UDP is preferred for NAT traversal or load balancing).
//! It provides the two endpoint roles that together form one tunnel:
//!
//! - **Initiator**: accepts TCP connections on a local port and re-emits
//!   their bytes as UDP datagrams toward a remote Terminator, one
//!   ephemeral UDP socket per accepted connection.
//! - **Terminator**: receives datagrams on a single shared UDP socket,
//!   demultiplexes them by source address into independent sessions, and
//!   replays each session's bytes onto a freshly dialed TCP connection to
//!   the real destination.
//!
//! # Architecture
//!
//! ```text
//! app ──TCP──► Initiator ──UDP datagrams──► Terminator ──TCP──► destination
//!               │                             │
//!               │ one UDP socket              │ one shared UDP socket,
//!               │ per TCP connection          │ session table keyed by
//!               │                             │ datagram source address
//! ```
//!
//! Datagram delivery and ordering guarantees are exactly those of UDP:
//! there is no sequencing, retransmission, or encryption. Session
//! lifecycle is signaled in-band with two reserved control payloads
//! (see [`protocol`]).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use udp_tunnel::config::EndpointConfig;
//! use udp_tunnel::initiator::Initiator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EndpointConfig::new("0.0.0.0", 7000, "tunnel.example.net", 7001);
//! let initiator = Arc::new(Initiator::bind(&config).await?);
//! initiator.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Endpoint configuration and address resolution
//! - [`error`]: Error types
//! - [`initiator`]: TCP-accepting tunnel endpoint
//! - [`protocol`]: Datagram payload limits and control payloads
//! - [`relay`]: Unidirectional byte pumps
//! - [`session`]: Session identity and lifecycle
//! - [`stats`]: Endpoint statistics
//! - [`table`]: Terminator session table
//! - [`terminator`]: UDP-receiving tunnel endpoint

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod initiator;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod stats;
pub mod table;
pub mod terminator;

// Re-export commonly used types at the crate root
pub use config::{EndpointConfig, LogConfig};
pub use error::{
    ConfigError, InitiatorError, RelayError, TerminatorError, TunnelError,
};
pub use initiator::Initiator;
pub use protocol::{CLOSE, MAX_PAYLOAD, START};
pub use session::{Session, SessionKey, SessionState};
pub use stats::{EndpointStats, EndpointStatsSnapshot};
pub use terminator::Terminator;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
