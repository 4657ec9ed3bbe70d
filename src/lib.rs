//! galosh - a WebSocket edge tunnel server.
//!
//! galosh terminates a WebSocket from a client, auto-detects the tunneling
//! protocol framed inside it (VLESS, Trojan, or Shadowsocks), extracts the
//! intended destination from the protocol header, and relays the remaining
//! bytes bidirectionally: to the declared destination directly, to an
//! upstream relay selected by region code from the request path, or to a
//! UDP-over-TCP gateway when the protocol frames a UDP datagram.
//!
//! The tunnel engine lives in [`tunnel`]; the rest of the crate is protocol
//! decoding ([`protocol`], [`vless`], [`trojan`], [`shadowsocks`]), the
//! WebSocket transport ([`websocket`]), upstream selection ([`upstream`]),
//! and the thin HTTP surface in front of it all ([`http_server`]).

pub mod address;
pub mod async_stream;
pub mod config;
pub mod errors;
pub mod http_server;
pub mod line_reader;
pub mod pages;
pub mod protocol;
pub mod shadowsocks;
pub mod trojan;
pub mod tunnel;
pub mod udp_relay;
pub mod upstream;
pub mod uuid_util;
pub mod vless;
pub mod websocket;
