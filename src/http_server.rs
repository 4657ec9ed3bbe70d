//! The inbound HTTP surface: a raw HTTP/1.1 listener that serves the static
//! page routes and upgrades tunnel paths to WebSocket.

use std::io;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::async_stream::AsyncStream;
use crate::config::Config;
use crate::errors::is_benign;
use crate::line_reader::LineReader;
use crate::pages;
use crate::tunnel;
use crate::upstream;
use crate::websocket::{handshake, WebsocketStream};

// combined size budget for all header lines of one request
const MAX_HEADER_BLOCK_SIZE: usize = 8192;

pub async fn serve(config: Arc<Config>) -> io::Result<()> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept failed: {e}");
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            error!("Failed to set TCP nodelay: {e}");
        }

        let config = config.clone();
        tokio::spawn(async move {
            match handle_connection(stream, config).await {
                Ok(()) => debug!("{}:{} finished", addr.ip(), addr.port()),
                Err(e) if is_benign(&e) => debug!("{}:{} closed: {}", addr.ip(), addr.port(), e),
                Err(e) => error!("{}:{} failed: {}", addr.ip(), addr.port(), e),
            }
        });
    }
}

/// The request fields the router actually consumes. Header names are
/// matched case-insensitively while reading; everything else is dropped.
#[derive(Default)]
struct RequestHeaders {
    upgrade_websocket: bool,
    websocket_key: Option<String>,
    websocket_protocol: Option<String>,
}

struct ParsedRequest {
    method: String,
    path: String,
    headers: RequestHeaders,
}

async fn handle_connection(stream: TcpStream, config: Arc<Config>) -> io::Result<()> {
    let mut stream: Box<dyn AsyncStream> = Box::new(stream);
    let mut reader = LineReader::new();

    let request = parse_request(&mut stream, &mut reader).await?;
    if request.method != "GET" {
        return respond_error(&mut stream, 404, "not found").await;
    }

    let page_url = match request.path.as_str() {
        "/" => Some(&config.pages.main),
        "/sub" => Some(&config.pages.sub),
        "/link" => Some(&config.pages.link),
        "/converter" => Some(&config.pages.converter),
        "/checker" => Some(&config.pages.checker),
        _ => None,
    };
    if let Some(url) = page_url {
        return respond_page(&mut stream, url).await;
    }

    if let Some(path) = upstream::parse_path(&request.path) {
        if !request.headers.upgrade_websocket {
            return respond_error(&mut stream, 404, "not found").await;
        }

        let endpoint = match upstream::resolve_endpoint(&path, config.proxy_map.as_ref()) {
            Ok(endpoint) => endpoint,
            Err(e) => return respond_error(&mut stream, 502, &e.to_string()).await,
        };

        let subprotocol = request.headers.websocket_protocol;
        let early_data = match handshake::decode_early_data(subprotocol.as_deref()) {
            Ok(data) => data,
            Err(e) => return respond_error(&mut stream, 400, &e.to_string()).await,
        };

        let websocket_key = match request.headers.websocket_key {
            Some(key) => key,
            None => return respond_error(&mut stream, 400, "missing websocket key header").await,
        };

        let subprotocol_response_header = match subprotocol {
            Some(value) => format!("Sec-WebSocket-Protocol: {value}\r\n"),
            None => String::new(),
        };
        let http_response = format!(
            concat!(
                "HTTP/1.1 101 Switching Protocols\r\n",
                "Upgrade: websocket\r\n",
                "Connection: Upgrade\r\n",
                "{}",
                "Sec-WebSocket-Accept: {}\r\n",
                "\r\n"
            ),
            subprotocol_response_header,
            handshake::create_accept_key(&websocket_key),
        );
        stream.write_all(http_response.as_bytes()).await?;
        stream.flush().await?;

        let ws = WebsocketStream::new(stream, reader.unparsed_data(), early_data);
        tunnel::run_tunnel(ws, endpoint, &config).await;
        return Ok(());
    }

    respond_error(&mut stream, 404, "not found").await
}

async fn parse_request(
    stream: &mut Box<dyn AsyncStream>,
    reader: &mut LineReader,
) -> io::Result<ParsedRequest> {
    // the request line is validated before any header is looked at
    let request_line = reader.read_line(stream).await?;
    let mut tokens = request_line.split(' ');
    let (method, path, version) = match (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    {
        (Some(method), Some(path), Some(version), None) => (method, path, version),
        _ => {
            return Err(io::Error::other(format!(
                "malformed request line: {request_line}"
            )));
        }
    };
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(io::Error::other(format!(
            "unsupported http version: {version}"
        )));
    }
    let method = method.to_string();
    let path = path.to_string();

    let mut headers = RequestHeaders::default();
    let mut header_bytes = 0usize;
    loop {
        let line = reader.read_line(stream).await?;
        if line.is_empty() {
            break;
        }

        header_bytes += line.len();
        if header_bytes > MAX_HEADER_BLOCK_SIZE {
            return Err(io::Error::other("request header block is too large"));
        }

        let (name, value) = match line.split_once(':') {
            Some(split) => split,
            None => {
                return Err(io::Error::other(format!("header line without a colon: {line}")));
            }
        };
        let value = value.trim();

        if name.eq_ignore_ascii_case("upgrade") {
            headers.upgrade_websocket = value.eq_ignore_ascii_case("websocket");
        } else if name.eq_ignore_ascii_case("sec-websocket-key") {
            headers.websocket_key = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("sec-websocket-protocol") {
            headers.websocket_protocol = Some(value.to_string());
        }
    }

    Ok(ParsedRequest {
        method,
        path,
        headers,
    })
}

async fn respond_page(stream: &mut Box<dyn AsyncStream>, url: &str) -> io::Result<()> {
    match pages::fetch_page(url).await {
        Ok(page) => {
            write_response(
                stream,
                page.status,
                "text/html; charset=utf-8",
                page.body.as_bytes(),
            )
            .await
        }
        Err(e) => {
            debug!("page fetch failed for {url}: {e}");
            respond_error(stream, 502, "page fetch failed").await
        }
    }
}

async fn respond_error(
    stream: &mut Box<dyn AsyncStream>,
    status: u16,
    message: &str,
) -> io::Result<()> {
    write_response(stream, status, "text/plain; charset=utf-8", message.as_bytes()).await
}

async fn write_response(
    stream: &mut Box<dyn AsyncStream>,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> io::Result<()> {
    let head = format!(
        concat!(
            "HTTP/1.1 {} {}\r\n",
            "Content-Type: {}\r\n",
            "Content-Length: {}\r\n",
            "Connection: close\r\n",
            "\r\n"
        ),
        status,
        reason_phrase(status),
        content_type,
        body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        502 => "Bad Gateway",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    async fn parse(raw: &[u8]) -> io::Result<ParsedRequest> {
        let (mut client, server) = tokio::io::duplex(8192);
        client.write_all(raw).await.unwrap();
        let mut stream: Box<dyn AsyncStream> = Box::new(server);
        let mut reader = LineReader::new();
        parse_request(&mut stream, &mut reader).await
    }

    #[tokio::test]
    async fn test_parse_request() {
        let request = parse(
            b"GET /SG,US HTTP/1.1\r\nHost: edge.example\r\nUpgrade: WebSocket\r\nSec-WebSocket-Key: abc123\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/SG,US");
        assert!(request.headers.upgrade_websocket);
        assert_eq!(request.headers.websocket_key.as_deref(), Some("abc123"));
        assert_eq!(request.headers.websocket_protocol, None);
    }

    #[tokio::test]
    async fn test_parse_request_upgrade_to_something_else() {
        let request = parse(b"GET /SG HTTP/1.1\r\nUpgrade: h2c\r\n\r\n")
            .await
            .unwrap();
        assert!(!request.headers.upgrade_websocket);
    }

    #[tokio::test]
    async fn test_parse_request_rejects_bad_version() {
        assert!(parse(b"GET / HTTP/2\r\n\r\n").await.is_err());
        assert!(parse(b"GET /\r\n\r\n").await.is_err());
    }

    #[tokio::test]
    async fn test_parse_request_rejects_invalid_header() {
        assert!(parse(b"GET / HTTP/1.1\r\nno-colon-here\r\n\r\n").await.is_err());
    }

    #[tokio::test]
    async fn test_write_response() {
        let (mut client, server) = tokio::io::duplex(8192);
        let mut stream: Box<dyn AsyncStream> = Box::new(server);
        write_response(&mut stream, 404, "text/plain; charset=utf-8", b"not found")
            .await
            .unwrap();
        drop(stream);

        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(raw.contains("Content-Length: 9\r\n"));
        assert!(raw.ends_with("\r\n\r\nnot found"));
    }
}
