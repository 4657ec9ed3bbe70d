use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Hostname(String),
}

impl Address {
    /// Classify a host string coming off the wire or out of configuration.
    /// A colon can only mean an IPv6 literal; anything that parses as
    /// dotted-decimal is an IPv4 literal; the rest must look like a
    /// hostname.
    pub fn from(s: &str) -> std::io::Result<Self> {
        if s.contains(':') {
            return match s.parse::<Ipv6Addr>() {
                Ok(addr) => Ok(Address::Ipv6(addr)),
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Failed to parse address: {}", s),
                )),
            };
        }

        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(Address::Ipv4(addr));
        }

        let valid_hostname = !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'));
        if !valid_hostname {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to parse address: {}", s),
            ));
        }

        Ok(Address::Hostname(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(addr) => write!(f, "{}", addr),
            // All 8 groups are always written out, without `::` compression,
            // so that the rendering round-trips byte-for-byte with the wire
            // representation.
            Address::Ipv6(addr) => {
                let groups = addr.segments();
                write!(
                    f,
                    "{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}",
                    groups[0],
                    groups[1],
                    groups[2],
                    groups[3],
                    groups[4],
                    groups[5],
                    groups[6],
                    groups[7]
                )
            }
            Address::Hostname(hostname) => f.write_str(hostname),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct NetLocation {
    address: Address,
    port: u16,
}

impl NetLocation {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    pub fn from_str(s: &str, default_port: Option<u16>) -> std::io::Result<Self> {
        // a trailing ":port" wins; any other colon must belong to an ipv6
        // literal and is left for the address parser to judge
        let (address_str, port) = match s.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => (s, default_port),
            },
            None => (s, default_port),
        };

        let address = Address::from(address_str)?;
        let port = port.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("No port in {}", s))
        })?;

        Ok(Self { address, port })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
