//! Tunnel protocol detection and the shared pieces of header parsing.
//!
//! The first WebSocket message of a connection carries the entire protocol
//! header; detection works on structural signatures in that buffer, never on
//! credentials.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::address::{Address, NetLocation};
use crate::uuid_util::is_uuid_v4_shape;
use crate::{shadowsocks, trojan, vless};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Vless,
    Trojan,
    Shadowsocks,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tcp,
    Udp,
}

/// Decoded tunnel header: where to connect, how, and what to echo back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub location: NetLocation,
    pub command: Command,
    /// Sent to the client once, prepended to the first reply chunk.
    pub response_prefix: Option<[u8; 2]>,
    /// Offset of the first payload byte after the protocol header.
    pub header_len: usize,
}

/// Classify the first buffered message.
///
/// Trojan is checked first: its fixed-offset CRLF + command byte is a
/// stronger structural anchor than the UUID shape, which could false-match
/// inside a random body.
pub fn detect(frame: &[u8]) -> Protocol {
    if frame.len() >= 62
        && frame[56] == 0x0d
        && frame[57] == 0x0a
        && matches!(frame[58], 0x01 | 0x03 | 0x7f)
        && matches!(frame[59], 0x01 | 0x03 | 0x04)
    {
        return Protocol::Trojan;
    }

    if frame.len() >= 17 && is_uuid_v4_shape(&frame[1..17]) {
        return Protocol::Vless;
    }

    Protocol::Shadowsocks
}

/// Detect the protocol of the first message and decode its header.
pub fn parse_request(frame: &[u8]) -> io::Result<(Protocol, TunnelRequest)> {
    let protocol = detect(frame);
    let request = match protocol {
        Protocol::Vless => vless::parse(frame)?,
        Protocol::Trojan => trojan::parse(frame)?,
        Protocol::Shadowsocks => shadowsocks::parse(frame)?,
    };
    Ok((protocol, request))
}

/// Bounds-checked cursor over the first message. Every short read is a
/// malformed-header error; the header is never split across messages.
pub(crate) struct FrameCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let slice = self.read_slice(1)?;
        Ok(slice[0])
    }

    pub fn read_u16_be(&mut self) -> io::Result<u16> {
        let slice = self.read_slice(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    pub fn read_slice(&mut self, len: usize) -> io::Result<&'a [u8]> {
        if self.data.len() - self.pos < len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "protocol header is truncated",
            ));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

// Address type codes shared by the socks-style layouts (Trojan and
// Shadowsocks).
pub(crate) const ADDR_TYPE_IPV4: u8 = 1;
pub(crate) const ADDR_TYPE_DOMAIN_NAME: u8 = 3;
pub(crate) const ADDR_TYPE_IPV6: u8 = 4;

/// Read `[atyp][addr][port BE]` in the socks-style encoding.
pub(crate) fn read_socks_location(cursor: &mut FrameCursor) -> io::Result<NetLocation> {
    let address_type = cursor.read_u8()?;
    let address = match address_type {
        ADDR_TYPE_IPV4 => read_ipv4(cursor)?,
        ADDR_TYPE_DOMAIN_NAME => {
            let len = cursor.read_u8()? as usize;
            parse_domain(cursor.read_slice(len)?)?
        }
        ADDR_TYPE_IPV6 => read_ipv6(cursor)?,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown address type: {other}"),
            ));
        }
    };
    let port = cursor.read_u16_be()?;
    Ok(NetLocation::new(address, port))
}

pub(crate) fn read_ipv4(cursor: &mut FrameCursor) -> io::Result<Address> {
    let bytes = cursor.read_slice(4)?;
    Ok(Address::Ipv4(Ipv4Addr::new(
        bytes[0], bytes[1], bytes[2], bytes[3],
    )))
}

pub(crate) fn read_ipv6(cursor: &mut FrameCursor) -> io::Result<Address> {
    let bytes: [u8; 16] = cursor.read_slice(16)?.try_into().unwrap();
    Ok(Address::Ipv6(Ipv6Addr::from(bytes)))
}

pub(crate) fn parse_domain(bytes: &[u8]) -> io::Result<Address> {
    if bytes.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "empty domain name",
        ));
    }
    let s = std::str::from_utf8(bytes).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to decode address: {e}"),
        )
    })?;
    // Some clients pass IP literals in the domain slot, so parse rather than
    // assuming a hostname.
    Address::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vless_frame() -> Vec<u8> {
        // version 0, v4-shaped uuid, no addons, tcp, port 443, domain
        let mut frame = vec![0u8];
        frame.extend_from_slice(&crate::uuid_util::parse_uuid("7b79e5e1-0eb0-4a88-8b0f-60ebf2a0ab1c").unwrap());
        frame.extend_from_slice(&[0x00, 0x01, 0x01, 0xbb, 0x02, 0x0b]);
        frame.extend_from_slice(b"example.com");
        frame
    }

    fn trojan_frame() -> Vec<u8> {
        let mut frame = vec![b'a'; 56];
        frame.extend_from_slice(&[0x0d, 0x0a, 0x01, 0x01, 8, 8, 8, 8, 0x00, 0x35, 0x0d, 0x0a]);
        frame.extend_from_slice(b"query");
        frame
    }

    #[test]
    fn test_detect_trojan() {
        assert_eq!(detect(&trojan_frame()), Protocol::Trojan);
    }

    #[test]
    fn test_detect_vless() {
        assert_eq!(detect(&vless_frame()), Protocol::Vless);
    }

    #[test]
    fn test_detect_shadowsocks_catch_all() {
        assert_eq!(detect(&[0x01, 1, 1, 1, 1, 0x00, 0x35]), Protocol::Shadowsocks);
        assert_eq!(detect(&[]), Protocol::Shadowsocks);
    }

    #[test]
    fn test_trojan_anchor_wins_over_uuid_shape() {
        // a long frame whose bytes [1,17) look like a v4 uuid, but which
        // carries the trojan anchor at the fixed offset
        let mut frame = vec![0u8];
        frame.extend_from_slice(
            &crate::uuid_util::parse_uuid("7b79e5e1-0eb0-4a88-8b0f-60ebf2a0ab1c").unwrap(),
        );
        frame.resize(56, 0);
        frame.extend_from_slice(&[0x0d, 0x0a, 0x01, 0x01]);
        frame.resize(62, 0);
        assert_eq!(detect(&frame), Protocol::Trojan);
    }

    #[test]
    fn test_cursor_truncation() {
        let mut cursor = FrameCursor::new(&[0x01, 0x02]);
        assert_eq!(cursor.read_u16_be().unwrap(), 0x0102);
        assert!(cursor.read_u8().is_err());
    }

    #[test]
    fn test_socks_location_domain() {
        let mut data = vec![ADDR_TYPE_DOMAIN_NAME, 11];
        data.extend_from_slice(b"example.com");
        data.extend_from_slice(&[0x01, 0xbb]);
        let mut cursor = FrameCursor::new(&data);
        let location = read_socks_location(&mut cursor).unwrap();
        assert_eq!(location.to_string(), "example.com:443");
        assert_eq!(cursor.pos(), data.len());
    }

    #[test]
    fn test_socks_location_rejects_empty_domain() {
        let data = [ADDR_TYPE_DOMAIN_NAME, 0, 0x01, 0xbb];
        let mut cursor = FrameCursor::new(&data);
        assert!(read_socks_location(&mut cursor).is_err());
    }

    #[test]
    fn test_socks_location_rejects_unknown_atyp() {
        let data = [9u8, 1, 2, 3, 4, 0, 80];
        let mut cursor = FrameCursor::new(&data);
        assert!(read_socks_location(&mut cursor).is_err());
    }
}
