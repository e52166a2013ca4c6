//! Error types for udp-tunnel
//!
//! This module defines the error hierarchy for both tunnel endpoints.
//! Errors are categorized by subsystem and carry a recoverability hint:
//! bind failures are fatal to an endpoint, while per-connection and
//! per-datagram failures leave the endpoint serving other sessions.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for udp-tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Configuration errors (parameter validation, address resolution)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Initiator endpoint errors
    #[error("Initiator error: {0}")]
    Initiator(#[from] InitiatorError),

    /// Terminator endpoint errors
    #[error("Terminator error: {0}")]
    Terminator(#[from] TerminatorError),

    /// Relay loop errors
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TunnelError {
    /// Check if this error is recoverable (the endpoint can keep serving)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Initiator(e) => e.is_recoverable(),
            Self::Terminator(e) => e.is_recoverable(),
            Self::Relay(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required parameter missing or empty
    #[error("Missing required parameter: {name}")]
    MissingParameter { name: String },

    /// Parameter present but invalid
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Hostname/address resolution failure
    #[error("Failed to resolve {host}: {reason}")]
    ResolveError { host: String, reason: String },

    /// Environment variable override error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a missing parameter error
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingParameter { name: name.into() }
    }

    /// Create an invalid parameter error
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a resolution error
    pub fn resolve(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResolveError {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

/// Initiator endpoint errors
#[derive(Debug, Error)]
pub enum InitiatorError {
    /// Failed to bind the TCP listener
    #[error("Failed to bind TCP listener on {addr}: {reason}")]
    BindError { addr: String, reason: String },

    /// Failed to accept a connection (the accept loop continues)
    #[error("Accept error: {0}")]
    AcceptError(String),

    /// Failed to open the per-session UDP socket toward the Terminator
    #[error("Failed to dial UDP peer {addr}: {reason}")]
    DatagramDial { addr: SocketAddr, reason: String },

    /// I/O error
    #[error("Initiator I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl InitiatorError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BindError { .. } => false,
            Self::AcceptError(_) => true,
            Self::DatagramDial { .. } => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a bind error
    pub fn bind(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create a datagram dial error
    pub fn dial(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::DatagramDial {
            addr,
            reason: reason.into(),
        }
    }
}

/// Terminator endpoint errors
#[derive(Debug, Error)]
pub enum TerminatorError {
    /// Failed to bind the shared UDP socket
    #[error("Failed to bind UDP socket on {addr}: {reason}")]
    BindError { addr: String, reason: String },

    /// Failed to receive a datagram (the receive loop continues)
    #[error("Datagram receive error: {0}")]
    RecvError(String),

    /// Failed to dial the destination for a new session
    #[error("Failed to dial destination {addr}: {reason}")]
    DialError { addr: SocketAddr, reason: String },

    /// I/O error
    #[error("Terminator I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TerminatorError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BindError { .. } => false,
            Self::RecvError(_) => true,
            Self::DialError { .. } => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a bind error
    pub fn bind(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create a destination dial error
    pub fn dial(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::DialError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Relay loop errors
///
/// End-of-stream is not represented here: EOF is the normal trigger for
/// session teardown and the pumps report it as success.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Read from the stream connection failed
    #[error("Stream read error: {0}")]
    StreamRead(io::Error),

    /// Write to the stream connection failed
    #[error("Stream write error: {0}")]
    StreamWrite(io::Error),

    /// Datagram send failed
    #[error("Datagram send error: {0}")]
    DatagramSend(io::Error),

    /// Datagram receive failed (socket closed or transport error)
    #[error("Datagram receive error: {0}")]
    DatagramRecv(io::Error),
}

impl RelayError {
    /// Check if this error is recoverable
    ///
    /// Relay errors end the affected session but never the endpoint, so
    /// they are all recoverable from the endpoint's point of view.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }

    /// The underlying I/O error kind
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::StreamRead(e)
            | Self::StreamWrite(e)
            | Self::DatagramSend(e)
            | Self::DatagramRecv(e) => e.kind(),
        }
    }
}

/// Type alias for Result with TunnelError
pub type Result<T> = std::result::Result<T, TunnelError>;
