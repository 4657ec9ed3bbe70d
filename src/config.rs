use std::collections::HashMap;
use std::env;
use std::time::Duration;

use log::warn;

use crate::uuid_util::parse_uuid;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Sources for the static page routes, fetched and served on demand.
#[derive(Debug, Clone)]
pub struct PageUrls {
    pub main: String,
    pub sub: String,
    pub link: String,
    pub converter: String,
    pub checker: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub user_id: [u8; 16],
    /// When set, inbound VLESS user ids must match `user_id`. Off by default:
    /// any well-formed v4 UUID is accepted as a protocol signature.
    pub strict_user_id: bool,
    pub bind_addr: String,
    pub pages: PageUrls,
    /// Region code to "ip:port" upstream relays. `None` when PROXY_LIST is
    /// unset or malformed; region requests then fail with 502.
    pub proxy_map: Option<HashMap<String, Vec<String>>>,
    /// When set, each tunnel is torn down with a normal close after this
    /// duration.
    pub tunnel_deadline: Option<Duration>,
}

impl Config {
    pub fn from_env() -> std::io::Result<Self> {
        let user_id = parse_uuid(&required_var("UUID")?)?;

        let pages = PageUrls {
            main: required_var("MAIN_PAGE_URL")?,
            sub: required_var("SUB_PAGE_URL")?,
            link: required_var("LINK_PAGE_URL")?,
            converter: required_var("CONVERTER_PAGE_URL")?,
            checker: required_var("CHECKER_PAGE_URL")?,
        };

        let proxy_map = match env::var("PROXY_LIST") {
            Ok(json) => parse_proxy_list(&json),
            Err(_) => None,
        };

        let strict_user_id = env::var("STRICT_UUID")
            .map(|value| parse_flag(&value))
            .unwrap_or(false);

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let tunnel_deadline = match env::var("TUNNEL_DEADLINE_SECS") {
            Ok(value) => {
                let secs = value.parse::<u64>().map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Invalid TUNNEL_DEADLINE_SECS: {e}"),
                    )
                })?;
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        Ok(Self {
            user_id,
            strict_user_id,
            bind_addr,
            pages,
            proxy_map,
            tunnel_deadline,
        })
    }
}

fn required_var(name: &str) -> std::io::Result<String> {
    env::var(name).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Missing required environment variable {name}"),
        )
    })
}

/// Parse the region-to-relay map. A malformed value downgrades to `None`
/// instead of failing startup, so that direct tunnels keep working.
pub fn parse_proxy_list(json: &str) -> Option<HashMap<String, Vec<String>>> {
    match serde_json::from_str(json) {
        Ok(map) => Some(map),
        Err(e) => {
            warn!("Ignoring malformed PROXY_LIST: {e}");
            None
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
