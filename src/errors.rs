//! Classification of teardown errors.
//!
//! Benign errors are attributable to the peer or to cancellation and are
//! expected during normal proxy operation; they are suppressed from logs.
//! Anything else is considered fatal and logged once.

use std::io;

/// Message fragments that mark a teardown cause as benign. Matching is
/// case-insensitive substring search.
const BENIGN_PATTERNS: &[&str] = &[
    "writable stream closed",
    "writablestream has been closed",
    "broken pipe",
    "connection reset",
    "connection closed",
    "connection refused",
    "connection aborted",
    "timed out",
    "timeout",
    "end of stream",
    "eof",
    "cancelled",
    "canceled",
    "aborted",
    "network unreachable",
    "host unreachable",
    "no route to host",
    "dns resolution failed",
    "unknown host",
    "failed to lookup",
];

const BENIGN_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::NotConnected,
    io::ErrorKind::TimedOut,
    io::ErrorKind::UnexpectedEof,
    io::ErrorKind::WriteZero,
];

/// Whether an error message describes an expected teardown cause.
pub fn is_benign_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    BENIGN_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Whether an error is an expected teardown cause, by kind or by message.
pub fn is_benign(error: &io::Error) -> bool {
    BENIGN_KINDS.contains(&error.kind()) || is_benign_message(&error.to_string())
}
