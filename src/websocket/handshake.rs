//! WebSocket upgrade helpers: accept-key computation and decoding of early
//! data smuggled through the `sec-websocket-protocol` request header.

use std::io;

use aws_lc_rs::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine as _;

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub fn create_accept_key(key: &str) -> String {
    let mut input = key.as_bytes().to_vec();
    input.extend_from_slice(WS_GUID);
    let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, &input);
    BASE64.encode(hash.as_ref())
}

/// Decode the base64url early-data payload carried in the
/// `sec-websocket-protocol` request header. Padding-insensitive, and both
/// the standard and url-safe alphabets are accepted.
pub fn decode_early_data(value: Option<&str>) -> io::Result<Option<Vec<u8>>> {
    let value = match value {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    let normalized = value.replace('+', "-").replace('/', "_").replace('=', "");
    URL_SAFE_NO_PAD
        .decode(normalized)
        .map(Some)
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid early data: {e}"),
            )
        })
}
