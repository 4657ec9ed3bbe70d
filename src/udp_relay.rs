//! UDP-over-TCP relay framing.
//!
//! UDP commands never open a UDP socket here; datagrams are forwarded over a
//! TCP connection to a fixed relay gateway, one framed write per datagram:
//!
//! ```text
//! "udp:" <host> ":" <port> "|" <raw payload bytes>
//! ```
//!
//! The relay's response bytes stream back over the same connection verbatim.

use std::io;

use tokio::net::TcpStream;

use crate::address::NetLocation;

pub const RELAY_HOST: &str = "udp-relay.hobihaus.space";
pub const RELAY_PORT: u16 = 7300;

/// Frame one datagram for the relay gateway. Datagrams are never aggregated
/// or split; each inbound message becomes exactly one write.
pub fn frame_datagram(target: &NetLocation, payload: &[u8]) -> Vec<u8> {
    let header = format!("udp:{}:{}|", target.address(), target.port());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub async fn connect() -> io::Result<TcpStream> {
    TcpStream::connect((RELAY_HOST, RELAY_PORT)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    #[test]
    fn test_frame_ipv4_datagram() {
        let target = NetLocation::new(Address::Ipv4("1.1.1.1".parse().unwrap()), 53);
        let query = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03];
        let frame = frame_datagram(&target, &query);

        assert!(frame.starts_with(b"udp:1.1.1.1:53|"));
        assert_eq!(&frame[b"udp:1.1.1.1:53|".len()..], &query);
    }

    #[test]
    fn test_frame_domain_datagram() {
        let target = NetLocation::new(Address::Hostname("dns.example".to_string()), 5353);
        let frame = frame_datagram(&target, b"q");
        assert_eq!(frame, b"udp:dns.example:5353|q");
    }

    #[test]
    fn test_frame_ipv6_datagram() {
        let target = NetLocation::new(Address::Ipv6("::1".parse().unwrap()), 53);
        let frame = frame_datagram(&target, &[]);
        assert_eq!(frame, b"udp:0:0:0:0:0:0:0:1:53|");
    }
}
