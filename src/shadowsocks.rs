//! Shadowsocks request header decoding.
//!
//! Layout: `[atyp][addr][port BE]` followed by the payload. The protocol has
//! no command byte, so a DNS port is taken to mean a UDP query; everything
//! else is relayed as TCP. No server response prefix.

use std::io;

use crate::protocol::{read_socks_location, Command, FrameCursor, TunnelRequest};

pub const DNS_PORT: u16 = 53;

pub fn parse(frame: &[u8]) -> io::Result<TunnelRequest> {
    let mut cursor = FrameCursor::new(frame);

    let location = read_socks_location(&mut cursor)?;
    let command = if location.port() == DNS_PORT {
        Command::Udp
    } else {
        Command::Tcp
    };

    Ok(TunnelRequest {
        location,
        command,
        response_prefix: None,
        header_len: cursor.pos(),
    })
}
