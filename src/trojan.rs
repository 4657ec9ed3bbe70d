//! Trojan request header decoding.
//!
//! Layout: `[hash_hex:56][CRLF][cmd][atyp][addr][port BE][CRLF]` followed by
//! the payload. The 56-byte password hash is treated as framing and is not
//! verified. There is no server response prefix.

use std::io;

use crate::protocol::{read_socks_location, Command, FrameCursor, TunnelRequest};

pub const COMMAND_TCP: u8 = 1;
pub const COMMAND_UDP: u8 = 3;

const CRLF: &[u8] = &[0x0d, 0x0a];

pub fn parse(frame: &[u8]) -> io::Result<TunnelRequest> {
    let mut cursor = FrameCursor::new(frame);

    cursor.read_slice(56)?;
    if cursor.read_slice(2)? != CRLF {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing crlf after trojan password hash",
        ));
    }

    let command = match cursor.read_u8()? {
        COMMAND_TCP => Command::Tcp,
        COMMAND_UDP => Command::Udp,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported trojan command: {other}"),
            ));
        }
    };

    let location = read_socks_location(&mut cursor)?;

    if cursor.read_slice(2)? != CRLF {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing crlf after trojan request",
        ));
    }

    Ok(TunnelRequest {
        location,
        command,
        response_prefix: None,
        header_len: cursor.pos(),
    })
}
