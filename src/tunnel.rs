//! The per-connection tunnel engine.
//!
//! One task owns the whole connection: it reads the first WebSocket message,
//! detects and decodes the protocol header, dials the outbound, and then
//! multiplexes both directions in a single `select!` loop. All connection
//! state (outbound slot, response prefix, retry bookkeeping) lives on this
//! task's stack; nothing is shared across connections.

use std::io;
use std::net::IpAddr;

use bytes::Bytes;
use log::{debug, error};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::address::{Address, NetLocation};
use crate::config::Config;
use crate::errors::is_benign;
use crate::protocol::{self, Command, Protocol};
use crate::udp_relay;
use crate::websocket::{WebsocketStream, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR};

const READ_BUFFER_SIZE: usize = 16384;

/// How a tunnel ended. `Failed` closes the WebSocket with 1002 and a
/// diagnostic reason; everything else closes with 1000.
enum Teardown {
    Normal,
    Failed(String),
}

/// Run a tunnel over an accepted WebSocket until it finishes, then close the
/// WebSocket exactly once.
pub async fn run_tunnel(mut ws: WebsocketStream, upstream: NetLocation, config: &Config) {
    let outcome = match config.tunnel_deadline {
        Some(deadline) => match timeout(deadline, drive(&mut ws, &upstream, config)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("tunnel deadline reached");
                Ok(Teardown::Normal)
            }
        },
        None => drive(&mut ws, &upstream, config).await,
    };

    match outcome {
        Ok(Teardown::Normal) => {
            let _ = ws.close(CLOSE_NORMAL, "").await;
        }
        Ok(Teardown::Failed(reason)) => {
            debug!("tunnel rejected: {reason}");
            let _ = ws.close(CLOSE_PROTOCOL_ERROR, &reason).await;
        }
        Err(e) => {
            if is_benign(&e) {
                debug!("tunnel closed: {e}");
            } else {
                error!("tunnel failed: {e}");
            }
            let _ = ws.close(CLOSE_NORMAL, "").await;
        }
    }
}

async fn drive(
    ws: &mut WebsocketStream,
    upstream: &NetLocation,
    config: &Config,
) -> io::Result<Teardown> {
    let first = match ws.read_message().await? {
        Some(message) => message,
        None => return Ok(Teardown::Normal),
    };

    let (protocol, request) = match protocol::parse_request(&first) {
        Ok(parsed) => parsed,
        Err(e) => return Ok(Teardown::Failed(e.to_string())),
    };

    if config.strict_user_id && protocol == Protocol::Vless {
        let client_id = &first[1..17];
        if config.user_id[..].ct_eq(client_id).unwrap_u8() == 0 {
            return Ok(Teardown::Failed("unknown user id".to_string()));
        }
    }

    let residual = first.slice(request.header_len..);
    debug!(
        "{} {:?} tunnel to {}",
        protocol.name(),
        request.command,
        request.location
    );

    match request.command {
        Command::Tcp => {
            pump_tcp(
                ws,
                request.location,
                request.response_prefix,
                residual,
                upstream,
            )
            .await
        }
        Command::Udp => pump_udp(ws, request.location, request.response_prefix, residual).await,
    }
}

/// TCP relay: dial the parsed destination, pump both directions, and fall
/// back to the path-selected upstream at most once if the destination never
/// produces a byte.
async fn pump_tcp(
    ws: &mut WebsocketStream,
    location: NetLocation,
    mut response_prefix: Option<[u8; 2]>,
    residual: Bytes,
    upstream: &NetLocation,
) -> io::Result<Teardown> {
    let retry_target = if upstream != &location {
        Some(upstream.clone())
    } else {
        None
    };
    let mut retried = false;

    let mut outbound = match dial(&location, &residual).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("dial {location} failed: {e}");
            match retry_target {
                Some(ref target) => {
                    retried = true;
                    response_prefix = None;
                    match dial(target, &residual).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            return Ok(Teardown::Failed(format!("connect to {target} failed: {e}")));
                        }
                    }
                }
                None => {
                    return Ok(Teardown::Failed(format!("connect to {location} failed: {e}")));
                }
            }
        }
    };

    let mut has_incoming_data = false;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            message = ws.read_message() => match message? {
                Some(data) => {
                    outbound.write_all(&data).await?;
                }
                None => return Ok(Teardown::Normal),
            },
            result = outbound.read(&mut buf) => match result {
                Ok(n) if n > 0 => {
                    forward_to_client(ws, &mut response_prefix, &buf[..n]).await?;
                    has_incoming_data = true;
                }
                other => {
                    // EOF or read error on the outbound
                    match retry(&retry_target, &mut retried, has_incoming_data, &residual).await? {
                        Some(replacement) => {
                            response_prefix = None;
                            outbound = replacement;
                        }
                        None => {
                            return match other {
                                Err(e) => Err(e),
                                _ => Ok(Teardown::Normal),
                            };
                        }
                    }
                }
            },
        }
    }
}

/// UDP relay: each inbound message becomes one framed datagram write to the
/// relay gateway; relay bytes stream back verbatim.
async fn pump_udp(
    ws: &mut WebsocketStream,
    location: NetLocation,
    mut response_prefix: Option<[u8; 2]>,
    residual: Bytes,
) -> io::Result<Teardown> {
    let mut relay = match udp_relay::connect().await {
        Ok(stream) => stream,
        Err(e) => {
            return Ok(Teardown::Failed(format!("connect to udp relay failed: {e}")));
        }
    };

    if !residual.is_empty() {
        relay
            .write_all(&udp_relay::frame_datagram(&location, &residual))
            .await?;
    }

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            message = ws.read_message() => match message? {
                Some(data) => {
                    if !data.is_empty() {
                        relay
                            .write_all(&udp_relay::frame_datagram(&location, &data))
                            .await?;
                    }
                }
                None => return Ok(Teardown::Normal),
            },
            result = relay.read(&mut buf) => match result {
                Ok(0) => return Ok(Teardown::Normal),
                Ok(n) => forward_to_client(ws, &mut response_prefix, &buf[..n]).await?,
                Err(e) => return Err(e),
            },
        }
    }
}

/// Open the outbound connection and write the residual payload before any
/// pumped bytes.
async fn dial(location: &NetLocation, residual: &[u8]) -> io::Result<TcpStream> {
    let mut stream = match location.address() {
        Address::Ipv4(addr) => TcpStream::connect((IpAddr::V4(*addr), location.port())).await?,
        Address::Ipv6(addr) => TcpStream::connect((IpAddr::V6(*addr), location.port())).await?,
        Address::Hostname(host) => TcpStream::connect((host.as_str(), location.port())).await?,
    };
    if !residual.is_empty() {
        stream.write_all(residual).await?;
    }
    Ok(stream)
}

/// Replace the outbound with a connection to the retry target, if the
/// single retry is still available and no data has reached the client yet.
/// `Ok(None)` means the caller should give up with its own error.
async fn retry(
    retry_target: &Option<NetLocation>,
    retried: &mut bool,
    has_incoming_data: bool,
    residual: &[u8],
) -> io::Result<Option<TcpStream>> {
    if has_incoming_data || *retried {
        return Ok(None);
    }
    let target = match retry_target {
        Some(target) => target,
        None => return Ok(None),
    };
    *retried = true;
    debug!("no data from destination, retrying via {target}");
    match dial(target, residual).await {
        Ok(stream) => Ok(Some(stream)),
        Err(e) => Err(io::Error::new(
            e.kind(),
            format!("retry connect to {target} failed: {e}"),
        )),
    }
}

/// Send one outbound chunk to the client, prepending the single-use response
/// prefix to the first chunk so both arrive in one message.
async fn forward_to_client(
    ws: &mut WebsocketStream,
    response_prefix: &mut Option<[u8; 2]>,
    chunk: &[u8],
) -> io::Result<()> {
    match response_prefix.take() {
        Some(prefix) => {
            let mut message = Vec::with_capacity(prefix.len() + chunk.len());
            message.extend_from_slice(&prefix);
            message.extend_from_slice(chunk);
            ws.write_message(&message).await
        }
        None => ws.write_message(chunk).await,
    }
}
