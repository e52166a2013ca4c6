//! Endpoint configuration and address resolution
//!
//! Both endpoints take the same four required parameters: a local bind
//! address and port, and a remote address and port. For the Initiator the
//! local pair is the TCP listen address and the remote pair is the
//! Terminator's UDP socket; for the Terminator the local pair is the UDP
//! bind address and the remote pair is the real TCP destination.
//!
//! Values supplied on the command line can be overridden through
//! environment variables (`UDP_TUNNEL_*`), layered on top before
//! validation.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Configuration shared by both tunnel endpoints
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Local bind address (hostname or IP)
    pub local_addr: String,

    /// Local bind port
    pub local_port: u16,

    /// Remote address (hostname or IP)
    pub remote_addr: String,

    /// Remote port
    pub remote_port: u16,
}

impl EndpointConfig {
    /// Create a new endpoint configuration
    pub fn new(
        local_addr: impl Into<String>,
        local_port: u16,
        remote_addr: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            local_addr: local_addr.into(),
            local_port,
            remote_addr: remote_addr.into(),
            remote_port,
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required parameter is empty or invalid.
    /// A local port of 0 is accepted (the OS picks an ephemeral port); a
    /// remote port of 0 is not, since there is nothing to dial.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_addr.is_empty() {
            return Err(ConfigError::missing("local_addr"));
        }
        if self.remote_addr.is_empty() {
            return Err(ConfigError::missing("remote_addr"));
        }
        if self.remote_port == 0 {
            return Err(ConfigError::invalid("remote_port", "must not be zero"));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables:
    /// - `UDP_TUNNEL_LOCAL_ADDR`: Override local bind address
    /// - `UDP_TUNNEL_LOCAL_PORT`: Override local bind port
    /// - `UDP_TUNNEL_REMOTE_ADDR`: Override remote address
    /// - `UDP_TUNNEL_REMOTE_PORT`: Override remote port
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EnvError` if a set variable fails to parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = std::env::var("UDP_TUNNEL_LOCAL_ADDR") {
            debug!("Local address overridden to {}", addr);
            self.local_addr = addr;
        }
        if let Ok(port) = std::env::var("UDP_TUNNEL_LOCAL_PORT") {
            self.local_port = port.parse().map_err(|_| ConfigError::EnvError {
                name: "UDP_TUNNEL_LOCAL_PORT".into(),
                reason: format!("Invalid port: {port}"),
            })?;
            debug!("Local port overridden to {}", self.local_port);
        }
        if let Ok(addr) = std::env::var("UDP_TUNNEL_REMOTE_ADDR") {
            debug!("Remote address overridden to {}", addr);
            self.remote_addr = addr;
        }
        if let Ok(port) = std::env::var("UDP_TUNNEL_REMOTE_PORT") {
            self.remote_port = port.parse().map_err(|_| ConfigError::EnvError {
                name: "UDP_TUNNEL_REMOTE_PORT".into(),
                reason: format!("Invalid port: {port}"),
            })?;
            debug!("Remote port overridden to {}", self.remote_port);
        }
        Ok(())
    }

    /// The local bind target in `host:port` form
    #[must_use]
    pub fn local_target(&self) -> String {
        format_target(&self.local_addr, self.local_port)
    }

    /// The remote target in `host:port` form
    #[must_use]
    pub fn remote_target(&self) -> String {
        format_target(&self.remote_addr, self.remote_port)
    }

    /// Resolve the local bind target to a socket address
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ResolveError` if resolution fails or yields
    /// no addresses.
    pub async fn resolve_local(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.local_target()).await
    }

    /// Resolve the remote target to a socket address
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ResolveError` if resolution fails or yields
    /// no addresses.
    pub async fn resolve_remote(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.remote_target()).await
    }
}

/// Format a host and port into a dialable target string
///
/// Bare IPv6 addresses are bracketed.
fn format_target(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Resolve a `host:port` target to its first socket address
async fn resolve(target: &str) -> Result<SocketAddr, ConfigError> {
    let mut addrs = tokio::net::lookup_host(target)
        .await
        .map_err(|e| ConfigError::resolve(target, e.to_string()))?;

    addrs
        .next()
        .ok_or_else(|| ConfigError::resolve(target, "no addresses returned"))
}

/// Logging configuration for the endpoint binaries
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format ("text" or "json")
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl LogConfig {
    /// Build a logging configuration from the environment
    ///
    /// Reads `UDP_TUNNEL_LOG_LEVEL` and `UDP_TUNNEL_LOG_FORMAT`, falling
    /// back to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("UDP_TUNNEL_LOG_LEVEL") {
            config.level = level;
        }
        if let Ok(format) = std::env::var("UDP_TUNNEL_LOG_FORMAT") {
            config.format = format;
        }
        config
    }
}
