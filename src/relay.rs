//! Unidirectional byte pumps
//!
//! A session's data path is a pair of these pumps. The stream→datagram
//! pump reads at most [`MAX_PAYLOAD`] bytes per call, so every successful
//! read maps to exactly one outbound datagram; payloads handed over in
//! larger pieces are split by [`crate::protocol::fragments`]. Datagrams
//! inherit the write order of the stream, but the transport may reorder
//! or drop them; no sequencing or reassembly is performed.
//!
//! The datagram→stream pump (Initiator side) validates that every
//! datagram came from the session's known peer and silently discards
//! anything else, so spoofed or stray traffic hitting the ephemeral
//! socket never reaches the stream.
//!
//! Both pumps exit when their handles are closed from outside; end of
//! stream is reported as success, not an error.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::trace;

use crate::error::RelayError;
use crate::protocol::{fragments, MAX_PAYLOAD};
use crate::stats::EndpointStats;

/// Pump bytes from a stream connection into datagrams toward a peer.
///
/// Reads up to [`MAX_PAYLOAD`] bytes per call and sends one datagram per
/// fragment. Returns the total number of payload bytes pumped once the
/// stream reaches end-of-stream.
///
/// # Errors
///
/// Returns `RelayError` if a stream read or datagram send fails. EOF is
/// not an error.
pub async fn pump_stream_to_datagrams<R>(
    reader: &mut R,
    socket: &UdpSocket,
    peer: SocketAddr,
    stats: &EndpointStats,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; MAX_PAYLOAD];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                trace!(peer = %peer, total, "stream end");
                return Ok(total);
            }
            Ok(n) => n,
            Err(e) => return Err(RelayError::StreamRead(e)),
        };

        for chunk in fragments(&buf[..n]) {
            socket
                .send_to(chunk, peer)
                .await
                .map_err(RelayError::DatagramSend)?;
            stats.record_datagram_sent(chunk.len());
            trace!(peer = %peer, bytes = chunk.len(), "stream -> datagram");
        }
        total += n as u64;
    }
}

/// Pump datagrams from a session's dedicated socket onto a stream.
///
/// Datagrams whose source is not `peer` are discarded without reaching
/// the stream. Valid payloads are written verbatim. The loop runs until
/// the socket is closed from outside or a stream write fails, so on
/// success it never returns; the caller races it against the opposite
/// pump and drops it when the session ends.
///
/// # Errors
///
/// Returns `RelayError` if the datagram receive fails (socket closed) or
/// a stream write fails.
pub async fn pump_datagrams_to_stream<W>(
    socket: &UdpSocket,
    peer: SocketAddr,
    writer: &mut W,
    stats: &EndpointStats,
) -> Result<u64, RelayError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_PAYLOAD];
    let mut total = 0u64;

    loop {
        let (n, source) = socket
            .recv_from(&mut buf)
            .await
            .map_err(RelayError::DatagramRecv)?;

        if source != peer {
            stats.record_datagram_discarded();
            trace!(source = %source, peer = %peer, "discarding datagram from unexpected source");
            continue;
        }

        stats.record_datagram_received(n);
        writer
            .write_all(&buf[..n])
            .await
            .map_err(RelayError::StreamWrite)?;
        total += n as u64;
        trace!(peer = %peer, bytes = n, "datagram -> stream");
    }
}
