//! Datagram payload limits and control payloads
//!
//! The tunnel's wire format is deliberately minimal: a datagram either
//! carries raw application bytes (no header, length prefix, or checksum)
//! or is one of two reserved control payloads, distinguished from data by
//! exact byte-for-byte equality.
//!
//! # Wire Format
//!
//! - `#start#`: sent once by the Initiator right after opening a new
//!   session's UDP socket, before any data. It primes the Terminator's
//!   lazy session creation and opens a return path through
//!   address-translating middleboxes.
//! - `#close#`: sent by the Initiator when a session's TCP connection
//!   terminates, telling the Terminator to tear down the session.
//! - anything else: application bytes, length 1..=1472, forwarded
//!   verbatim.
//!
//! A data chunk that happens to be byte-equal to a reserved payload is
//! misclassified as control. This is a known weakness of the wire format,
//! kept for compatibility; see [`classify`].

/// Maximum number of application bytes carried by one datagram.
///
/// 1500 (Ethernet MTU) - 20 (IP header) - 8 (UDP header).
pub const MAX_PAYLOAD: usize = 1472;

/// Control payload priming session creation on the Terminator.
pub const START: &[u8] = b"#start#";

/// Control payload signaling session teardown.
pub const CLOSE: &[u8] = b"#close#";

/// Classification of a received datagram payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Session-priming control payload; carries no data.
    Start,
    /// Session-teardown control payload.
    Close,
    /// Application bytes to forward verbatim.
    Data(&'a [u8]),
}

/// Classify a datagram payload as control or data.
///
/// Control payloads are matched by exact byte equality, so application
/// data that is byte-for-byte identical to `#start#` or `#close#` will be
/// misinterpreted as a control message. Escaping would change the wire
/// format and is intentionally not done here.
#[must_use]
pub fn classify(payload: &[u8]) -> Payload<'_> {
    if payload == START {
        Payload::Start
    } else if payload == CLOSE {
        Payload::Close
    } else {
        Payload::Data(payload)
    }
}

/// Split a payload into datagram-sized fragments.
///
/// A payload of length `L` yields `ceil(L / MAX_PAYLOAD)` fragments, each
/// at most [`MAX_PAYLOAD`] bytes, concatenating back to the original
/// payload. An empty payload yields no fragments.
pub fn fragments(payload: &[u8]) -> std::slice::Chunks<'_, u8> {
    payload.chunks(MAX_PAYLOAD)
}

/// Number of datagrams needed to carry a payload of the given length.
#[must_use]
pub const fn fragment_count(len: usize) -> usize {
    len.div_ceil(MAX_PAYLOAD)
}
