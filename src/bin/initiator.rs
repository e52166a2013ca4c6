//! udptun-initiator: TCP-accepting tunnel endpoint
//!
//! Accepts TCP connections on a local port and forwards their bytes as
//! UDP datagrams to a udptun-terminator.
//!
//! # Usage
//!
//! ```bash
//! udptun-initiator -la 0.0.0.0 -lp 7000 -ra tunnel.example.net -rp 7001
//!
//! # With environment overrides
//! UDP_TUNNEL_LOG_LEVEL=debug udptun-initiator -la 0.0.0.0 -lp 7000 -ra 10.0.0.2 -rp 7001
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use udp_tunnel::config::{EndpointConfig, LogConfig};
use udp_tunnel::initiator::Initiator;

/// Command-line arguments
struct Args {
    local_addr: Option<String>,
    local_port: Option<u16>,
    remote_addr: Option<String>,
    remote_port: Option<u16>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            local_addr: None,
            local_port: None,
            remote_addr: None,
            remote_port: None,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-la" | "--local-addr" => parsed.local_addr = args.next(),
                "-lp" | "--local-port" => parsed.local_port = next_port(&mut args, "-lp"),
                "-ra" | "--remote-addr" => parsed.remote_addr = args.next(),
                "-rp" | "--remote-port" => parsed.remote_port = next_port(&mut args, "-rp"),
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("udptun-initiator v{}", udp_tunnel::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        parsed
    }

    /// All four parameters are required; anything missing is a usage error
    fn into_config(self) -> EndpointConfig {
        match (
            self.local_addr,
            self.local_port,
            self.remote_addr,
            self.remote_port,
        ) {
            (Some(la), Some(lp), Some(ra), Some(rp)) => EndpointConfig::new(la, lp, ra, rp),
            _ => {
                print_help();
                std::process::exit(1);
            }
        }
    }
}

fn next_port(args: &mut impl Iterator<Item = String>, flag: &str) -> Option<u16> {
    let value = args.next()?;
    match value.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            eprintln!("Invalid port for {flag}: {value}");
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"udptun-initiator v{}

Accepts local TCP connections and forwards their bytes as UDP datagrams
to a udptun-terminator.

USAGE:
    udptun-initiator -la <ADDR> -lp <PORT> -ra <ADDR> -rp <PORT>

OPTIONS:
    -la, --local-addr <ADDR>     Local TCP listen address
    -lp, --local-port <PORT>     Local TCP listen port
    -ra, --remote-addr <ADDR>    Remote terminator address
    -rp, --remote-port <PORT>    Remote terminator UDP port
    -h, --help                   Print help information
    -v, --version                Print version information

ENVIRONMENT:
    UDP_TUNNEL_LOCAL_ADDR    Override local bind address
    UDP_TUNNEL_LOCAL_PORT    Override local bind port
    UDP_TUNNEL_REMOTE_ADDR   Override remote address
    UDP_TUNNEL_REMOTE_PORT   Override remote port
    UDP_TUNNEL_LOG_LEVEL     Log level (trace, debug, info, warn, error)
    UDP_TUNNEL_LOG_FORMAT    Log format (text, json)
"#,
        udp_tunnel::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &LogConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Args::parse().into_config();
    config.apply_env_overrides()?;

    init_logging(&LogConfig::from_env());

    info!("udptun-initiator v{}", udp_tunnel::VERSION);

    let initiator = Arc::new(Initiator::bind(&config).await?);

    let run_result = tokio::select! {
        result = Arc::clone(&initiator).run() => result,
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
            Ok(())
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, shutting down");
            Ok(())
        }
    };

    initiator.shutdown();

    let stats = initiator.stats_snapshot();
    info!(
        "Final stats: {} sessions opened, {} closed, {} datagrams sent ({} bytes), {} received ({} bytes), {} discarded",
        stats.sessions_opened,
        stats.sessions_closed,
        stats.datagrams_sent,
        stats.bytes_sent,
        stats.datagrams_received,
        stats.bytes_received,
        stats.datagrams_discarded,
    );

    run_result.map_err(Into::into)
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
