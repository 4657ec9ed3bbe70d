//! Upstream endpoint selection from the request path.
//!
//! Two path shapes enter the tunnel: a direct `/host-port` endpoint (the
//! separator may be `-`, `:` or `=`), or a comma-joined list of two-letter
//! region codes resolved through the configured relay map.

use std::collections::HashMap;
use std::io;
use std::sync::LazyLock;

use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use regex::Regex;

use crate::address::{Address, NetLocation};

static DIRECT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(.+)[-:=](\d{1,5})$").unwrap());
static REGION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[A-Z]{2}(,[A-Z]{2})*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelPath {
    Direct(NetLocation),
    Regions(Vec<String>),
}

/// Classify a request path. `None` means the path is not a tunnel path.
pub fn parse_path(path: &str) -> Option<TunnelPath> {
    if REGION_PATTERN.is_match(path) {
        let codes = path[1..].split(',').map(str::to_string).collect();
        return Some(TunnelPath::Regions(codes));
    }

    if let Some(captures) = DIRECT_PATTERN.captures(path) {
        let host = captures.get(1).unwrap().as_str();
        let port = captures.get(2).unwrap().as_str().parse::<u16>().ok()?;
        let address = Address::from(host).ok()?;
        return Some(TunnelPath::Direct(NetLocation::new(address, port)));
    }

    None
}

/// Resolve a tunnel path to a concrete relay endpoint. Region paths pick one
/// code and then one relay entry uniformly at random.
pub fn resolve_endpoint(
    path: &TunnelPath,
    proxy_map: Option<&HashMap<String, Vec<String>>>,
) -> io::Result<NetLocation> {
    match path {
        TunnelPath::Direct(location) => Ok(location.clone()),
        TunnelPath::Regions(codes) => {
            let proxy_map = proxy_map.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "no proxy list configured")
            })?;

            let code = &codes[random_index(codes.len())?];
            let relays = proxy_map.get(code).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown region code: {code}"),
                )
            })?;
            if relays.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no relays available for region: {code}"),
                ));
            }

            NetLocation::from_str(&relays[random_index(relays.len())?], None)
        }
    }
}

fn random_index(len: usize) -> io::Result<usize> {
    let mut buf = [0u8; 4];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| io::Error::other("system rng failed"))?;
    Ok(u32::from_be_bytes(buf) as usize % len)
}
