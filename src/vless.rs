//! VLESS request header decoding.
//!
//! Layout: `[ver][uuid:16][addons_len][addons][cmd][port BE][atyp][addr]`
//! followed by the payload. The server reply is prefixed with `[ver, 0]`.

use std::io;

use crate::address::NetLocation;
use crate::protocol::{parse_domain, read_ipv4, read_ipv6, Command, FrameCursor, TunnelRequest};

pub const COMMAND_TCP: u8 = 1;
pub const COMMAND_UDP: u8 = 2;

const ADDRESS_TYPE_IPV4: u8 = 1;
const ADDRESS_TYPE_DOMAIN_NAME: u8 = 2;
const ADDRESS_TYPE_IPV6: u8 = 3;

pub fn parse(frame: &[u8]) -> io::Result<TunnelRequest> {
    let mut cursor = FrameCursor::new(frame);

    let version = cursor.read_u8()?;
    if version != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid client protocol version, expected 0, got {version}"),
        ));
    }

    // The user id is framing here; it is only checked against the configured
    // id when strict matching is enabled, at the connection layer.
    cursor.read_slice(16)?;

    let addons_len = cursor.read_u8()? as usize;
    cursor.read_slice(addons_len)?;

    let command = match cursor.read_u8()? {
        COMMAND_TCP => Command::Tcp,
        COMMAND_UDP => Command::Udp,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported vless command: {other}"),
            ));
        }
    };

    let port = cursor.read_u16_be()?;

    let address = match cursor.read_u8()? {
        ADDRESS_TYPE_IPV4 => read_ipv4(&mut cursor)?,
        ADDRESS_TYPE_DOMAIN_NAME => {
            let len = cursor.read_u8()? as usize;
            parse_domain(cursor.read_slice(len)?)?
        }
        ADDRESS_TYPE_IPV6 => read_ipv6(&mut cursor)?,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid vless address type: {other}"),
            ));
        }
    };

    Ok(TunnelRequest {
        location: NetLocation::new(address, port),
        command,
        response_prefix: Some([version, 0]),
        header_len: cursor.pos(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid_util::parse_uuid;

    fn header(command: u8, port: u16, atyp_and_addr: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8];
        frame.extend_from_slice(&parse_uuid("7b79e5e1-0eb0-4a88-8b0f-60ebf2a0ab1c").unwrap());
        frame.push(0); // no addons
        frame.push(command);
        frame.extend_from_slice(&port.to_be_bytes());
        frame.extend_from_slice(atyp_and_addr);
        frame
    }

    #[test]
    fn test_parse_tcp_domain() {
        let mut atyp_and_addr = vec![ADDRESS_TYPE_DOMAIN_NAME, 11];
        atyp_and_addr.extend_from_slice(b"example.com");
        let mut frame = header(COMMAND_TCP, 443, &atyp_and_addr);
        let header_end = frame.len();
        frame.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let request = parse(&frame).unwrap();
        assert_eq!(request.location.to_string(), "example.com:443");
        assert_eq!(request.command, Command::Tcp);
        assert_eq!(request.response_prefix, Some([0, 0]));
        assert_eq!(request.header_len, header_end);
        assert_eq!(&frame[request.header_len..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_parse_udp_ipv4() {
        let frame = header(COMMAND_UDP, 53, &[ADDRESS_TYPE_IPV4, 8, 8, 8, 8]);
        let request = parse(&frame).unwrap();
        assert_eq!(request.location.to_string(), "8.8.8.8:53");
        assert_eq!(request.command, Command::Udp);
    }

    #[test]
    fn test_parse_ipv6() {
        let mut atyp_and_addr = vec![ADDRESS_TYPE_IPV6];
        atyp_and_addr.extend_from_slice(&[0u8; 15]);
        atyp_and_addr.push(1);
        let frame = header(COMMAND_TCP, 443, &atyp_and_addr);
        let request = parse(&frame).unwrap();
        assert_eq!(request.location.to_string(), "0:0:0:0:0:0:0:1:443");
    }

    #[test]
    fn test_parse_skips_addons() {
        let mut frame = vec![0u8];
        frame.extend_from_slice(&parse_uuid("7b79e5e1-0eb0-4a88-8b0f-60ebf2a0ab1c").unwrap());
        frame.push(2);
        frame.extend_from_slice(&[0xaa, 0xbb]);
        frame.push(COMMAND_TCP);
        frame.extend_from_slice(&443u16.to_be_bytes());
        frame.extend_from_slice(&[ADDRESS_TYPE_IPV4, 1, 2, 3, 4]);
        let request = parse(&frame).unwrap();
        assert_eq!(request.location.to_string(), "1.2.3.4:443");
    }

    #[test]
    fn test_rejects_bad_version() {
        let mut frame = header(COMMAND_TCP, 443, &[ADDRESS_TYPE_IPV4, 1, 2, 3, 4]);
        frame[0] = 1;
        assert!(parse(&frame).is_err());
    }

    #[test]
    fn test_rejects_unknown_command() {
        let frame = header(9, 443, &[ADDRESS_TYPE_IPV4, 1, 2, 3, 4]);
        assert!(parse(&frame).is_err());
    }

    #[test]
    fn test_rejects_unknown_address_type() {
        let frame = header(COMMAND_TCP, 443, &[7, 1, 2, 3, 4]);
        assert!(parse(&frame).is_err());
    }

    #[test]
    fn test_rejects_truncated_header() {
        let mut atyp_and_addr = vec![ADDRESS_TYPE_DOMAIN_NAME, 30];
        atyp_and_addr.extend_from_slice(b"short");
        let frame = header(COMMAND_TCP, 443, &atyp_and_addr);
        assert!(parse(&frame).is_err());
    }

    #[test]
    fn test_rejects_empty_domain() {
        let frame = header(COMMAND_TCP, 443, &[ADDRESS_TYPE_DOMAIN_NAME, 0]);
        assert!(parse(&frame).is_err());
    }
}
