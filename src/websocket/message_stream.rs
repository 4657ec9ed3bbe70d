use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use log::warn;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

use crate::async_stream::AsyncStream;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

const READ_BUFFER_SIZE: usize = 16384;
const MAX_MESSAGE_SIZE: usize = 1 << 23;
const MAX_CONTROL_SIZE: usize = 125;

const OPCODE_CONTINUE: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xa;

#[derive(Debug, PartialEq)]
enum ReadState {
    Header,
    ExtendedLength { length_bytes: usize },
    Mask,
    Payload,
}

/// Server-side WebSocket transport with message granularity.
///
/// `read_message` returns one contiguous buffer per inbound message:
/// fragmented messages are fully materialized before being handed out, so
/// downstream parsers never see a header split across reads. Parsing state
/// lives in the struct, which makes `read_message` safe to race inside
/// `select!` and resume later.
///
/// Writes emit exactly one unmasked binary frame per message, so the
/// client-visible message boundaries mirror what the engine forwards.
pub struct WebsocketStream {
    stream: Box<dyn AsyncStream>,
    early_data: Option<Bytes>,

    read_state: ReadState,
    frame_fin: bool,
    frame_opcode: u8,
    frame_masked: bool,
    frame_length: u64,
    frame_mask: [u8; 4],
    frame_mask_offset: usize,
    frame_discard: bool,

    // data frames are assembled here until a final frame completes them
    message: Vec<u8>,
    in_message: bool,
    control: Vec<u8>,

    unprocessed_buf: Box<[u8]>,
    unprocessed_start_offset: usize,
    unprocessed_end_offset: usize,

    pending_pong: Option<Vec<u8>>,
    read_closed: bool,
    close_sent: bool,
}

impl WebsocketStream {
    /// `initial_data` is whatever the HTTP layer over-read past the upgrade
    /// request; `early_data` is a decoded first message carried in the
    /// handshake itself.
    pub fn new(
        stream: Box<dyn AsyncStream>,
        initial_data: &[u8],
        early_data: Option<Vec<u8>>,
    ) -> Self {
        let mut unprocessed_buf = vec![0u8; READ_BUFFER_SIZE].into_boxed_slice();
        let mut unprocessed_end_offset = 0;
        if !initial_data.is_empty() {
            unprocessed_buf[..initial_data.len()].copy_from_slice(initial_data);
            unprocessed_end_offset = initial_data.len();
        }

        Self {
            stream,
            early_data: early_data.map(Bytes::from),
            read_state: ReadState::Header,
            frame_fin: false,
            frame_opcode: OPCODE_CONTINUE,
            frame_masked: false,
            frame_length: 0,
            frame_mask: [0u8; 4],
            frame_mask_offset: 0,
            frame_discard: false,
            message: Vec::new(),
            in_message: false,
            control: Vec::new(),
            unprocessed_buf,
            unprocessed_start_offset: 0,
            unprocessed_end_offset,
            pending_pong: None,
            read_closed: false,
            close_sent: false,
        }
    }

    /// Read the next complete message. `Ok(None)` means the client closed
    /// the connection (close frame or EOF).
    pub async fn read_message(&mut self) -> io::Result<Option<Bytes>> {
        futures::future::poll_fn(|cx| self.poll_read_message(cx)).await
    }

    fn poll_read_message(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Option<Bytes>>> {
        if let Some(data) = self.early_data.take() {
            return Poll::Ready(Ok(Some(data)));
        }

        loop {
            if let Some(message) = self.process_frames()? {
                return Poll::Ready(Ok(Some(message)));
            }
            if self.read_closed {
                return Poll::Ready(Ok(None));
            }

            if self.unprocessed_start_offset > 0 {
                self.unprocessed_buf
                    .copy_within(self.unprocessed_start_offset..self.unprocessed_end_offset, 0);
                self.unprocessed_end_offset -= self.unprocessed_start_offset;
                self.unprocessed_start_offset = 0;
            }

            let mut read_buf = ReadBuf::new(&mut self.unprocessed_buf[self.unprocessed_end_offset..]);
            match Pin::new(&mut self.stream).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let len = read_buf.filled().len();
                    if len == 0 {
                        self.read_closed = true;
                        return Poll::Ready(Ok(None));
                    }
                    self.unprocessed_end_offset += len;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Drive the frame state machine over buffered bytes. Returns a message
    /// when one completes; `None` when more bytes are needed or the read
    /// side closed.
    fn process_frames(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if self.read_closed {
                return Ok(None);
            }

            let available = self.unprocessed_end_offset - self.unprocessed_start_offset;
            match self.read_state {
                ReadState::Header => {
                    if available < 2 {
                        return Ok(None);
                    }
                    let first = self.unprocessed_buf[self.unprocessed_start_offset];
                    let second = self.unprocessed_buf[self.unprocessed_start_offset + 1];
                    self.consume(2);

                    self.frame_fin = first & 0x80 != 0;
                    self.frame_opcode = first & 0x0f;
                    self.frame_masked = second & 0x80 != 0;
                    self.frame_mask_offset = 0;
                    self.frame_discard = false;

                    let length = second & 0x7f;

                    match self.frame_opcode {
                        OPCODE_BINARY | OPCODE_TEXT => {
                            if self.in_message {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    "new data frame in the middle of a fragmented message",
                                ));
                            }
                        }
                        OPCODE_CONTINUE => {
                            if !self.in_message {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    "continuation frame without a message in progress",
                                ));
                            }
                        }
                        OPCODE_CLOSE | OPCODE_PING | OPCODE_PONG => {
                            if !self.frame_fin || length as usize > MAX_CONTROL_SIZE {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!(
                                        "invalid control frame (opcode {})",
                                        self.frame_opcode
                                    ),
                                ));
                            }
                            self.control.clear();
                        }
                        unknown => {
                            warn!("Ignoring unknown frame type: {unknown}");
                            self.frame_discard = true;
                        }
                    }

                    if length == 126 {
                        self.read_state = ReadState::ExtendedLength { length_bytes: 2 };
                    } else if length == 127 {
                        self.read_state = ReadState::ExtendedLength { length_bytes: 8 };
                    } else {
                        self.frame_length = length as u64;
                        self.read_state = if self.frame_masked {
                            ReadState::Mask
                        } else {
                            ReadState::Payload
                        };
                    }
                }
                ReadState::ExtendedLength { length_bytes } => {
                    if available < length_bytes {
                        return Ok(None);
                    }
                    let mut length = 0u64;
                    for i in 0..length_bytes {
                        length = (length << 8)
                            | (self.unprocessed_buf[self.unprocessed_start_offset + i] as u64);
                    }
                    self.consume(length_bytes);

                    if length > 0x7fffffffffffffff {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid frame length ({length})"),
                        ));
                    }
                    self.frame_length = length;
                    self.read_state = if self.frame_masked {
                        ReadState::Mask
                    } else {
                        ReadState::Payload
                    };
                }
                ReadState::Mask => {
                    if available < 4 {
                        return Ok(None);
                    }
                    self.frame_mask.copy_from_slice(
                        &self.unprocessed_buf
                            [self.unprocessed_start_offset..self.unprocessed_start_offset + 4],
                    );
                    self.consume(4);
                    self.read_state = ReadState::Payload;
                }
                ReadState::Payload => {
                    if self.frame_length == 0 {
                        if let Some(message) = self.finish_frame() {
                            return Ok(Some(message));
                        }
                        continue;
                    }

                    let take = std::cmp::min(available as u64, self.frame_length) as usize;
                    if take == 0 {
                        return Ok(None);
                    }

                    let start = self.unprocessed_start_offset;
                    if self.frame_masked {
                        for i in 0..take {
                            self.unprocessed_buf[start + i] ^=
                                self.frame_mask[(self.frame_mask_offset + i) % 4];
                        }
                        self.frame_mask_offset = (self.frame_mask_offset + take) % 4;
                    }

                    let chunk = &self.unprocessed_buf[start..start + take];
                    if self.frame_discard {
                        // dropped
                    } else if self.frame_opcode >= OPCODE_CLOSE {
                        self.control.extend_from_slice(chunk);
                    } else {
                        if self.message.len() + take > MAX_MESSAGE_SIZE {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "message is too large",
                            ));
                        }
                        self.message.extend_from_slice(chunk);
                    }

                    self.consume(take);
                    self.frame_length -= take as u64;

                    if self.frame_length == 0 {
                        if let Some(message) = self.finish_frame() {
                            return Ok(Some(message));
                        }
                    }
                }
            }
        }
    }

    fn finish_frame(&mut self) -> Option<Bytes> {
        self.read_state = ReadState::Header;
        match self.frame_opcode {
            OPCODE_BINARY | OPCODE_TEXT | OPCODE_CONTINUE => {
                if self.frame_discard {
                    return None;
                }
                if self.frame_fin {
                    self.in_message = false;
                    Some(Bytes::from(std::mem::take(&mut self.message)))
                } else {
                    self.in_message = true;
                    None
                }
            }
            OPCODE_PING => {
                self.pending_pong = Some(std::mem::take(&mut self.control));
                None
            }
            OPCODE_CLOSE => {
                self.read_closed = true;
                None
            }
            _ => None,
        }
    }

    fn consume(&mut self, amount: usize) {
        self.unprocessed_start_offset += amount;
        if self.unprocessed_start_offset == self.unprocessed_end_offset {
            self.unprocessed_start_offset = 0;
            self.unprocessed_end_offset = 0;
        }
    }

    /// Write one binary message. Any pong owed to the client goes out first,
    /// so control responses cannot interleave into the middle of a message.
    pub async fn write_message(&mut self, payload: &[u8]) -> io::Result<()> {
        self.flush_pending_pong().await?;
        let header = frame_header(OPCODE_BINARY, payload.len());
        self.stream.write_all(&header).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await
    }

    async fn flush_pending_pong(&mut self) -> io::Result<()> {
        if let Some(payload) = self.pending_pong.take() {
            let header = frame_header(OPCODE_PONG, payload.len());
            self.stream.write_all(&header).await?;
            self.stream.write_all(&payload).await?;
            self.stream.flush().await?;
        }
        Ok(())
    }

    /// Send a close frame and shut the stream down. Safe to call any number
    /// of times; the close frame goes out at most once.
    pub async fn close(&mut self, code: u16, reason: &str) -> io::Result<()> {
        if self.close_sent {
            return Ok(());
        }
        self.close_sent = true;

        let reason_bytes = reason.as_bytes();
        let reason_bytes = &reason_bytes[..reason_bytes.len().min(MAX_CONTROL_SIZE - 2)];
        let mut payload = Vec::with_capacity(2 + reason_bytes.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason_bytes);

        let header = frame_header(OPCODE_CLOSE, payload.len());
        self.stream.write_all(&header).await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await
    }
}

fn frame_header(opcode: u8, payload_len: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(10);
    // server frames are final and unmasked
    header.push(opcode | 0x80);
    if payload_len < 126 {
        header.push(payload_len as u8);
    } else if payload_len <= 65535 {
        header.push(0x7e);
        header.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        header.push(0x7f);
        header.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }
    header
}


#[cfg(test)]
mod tests {
    use super::testing::{decode_frame, encode_binary, encode_frame};
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    fn stream_pair() -> (tokio::io::DuplexStream, WebsocketStream) {
        let (client, server) = tokio::io::duplex(65536);
        (client, WebsocketStream::new(Box::new(server), &[], None))
    }

    #[tokio::test]
    async fn test_read_single_binary_frame() {
        let (mut client, mut ws) = stream_pair();
        client
            .write_all(&encode_binary(b"hello", None))
            .await
            .unwrap();

        let message = ws.read_message().await.unwrap().unwrap();
        assert_eq!(&message[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_masked_frame() {
        let (mut client, mut ws) = stream_pair();
        client
            .write_all(&encode_binary(b"masked payload", Some([1, 2, 3, 4])))
            .await
            .unwrap();

        let message = ws.read_message().await.unwrap().unwrap();
        assert_eq!(&message[..], b"masked payload");
    }

    #[tokio::test]
    async fn test_fragmented_message_is_contiguous() {
        let (mut client, mut ws) = stream_pair();
        client
            .write_all(&encode_frame(OPCODE_BINARY, false, b"hel", Some([9, 9, 9, 9])))
            .await
            .unwrap();
        client
            .write_all(&encode_frame(OPCODE_CONTINUE, true, b"lo", None))
            .await
            .unwrap();

        let message = ws.read_message().await.unwrap().unwrap();
        assert_eq!(&message[..], b"hello");
    }

    #[tokio::test]
    async fn test_extended_length_frame() {
        let payload = vec![0xabu8; 300];
        let (mut client, mut ws) = stream_pair();
        client.write_all(&encode_binary(&payload, None)).await.unwrap();

        let message = ws.read_message().await.unwrap().unwrap();
        assert_eq!(&message[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_early_data_is_first_message() {
        let (mut client, server) = tokio::io::duplex(65536);
        let mut ws = WebsocketStream::new(Box::new(server), &[], Some(b"early".to_vec()));
        client.write_all(&encode_binary(b"next", None)).await.unwrap();

        assert_eq!(&ws.read_message().await.unwrap().unwrap()[..], b"early");
        assert_eq!(&ws.read_message().await.unwrap().unwrap()[..], b"next");
    }

    #[tokio::test]
    async fn test_initial_data_is_parsed_as_frames() {
        let (mut client, server) = tokio::io::duplex(65536);
        let buffered = encode_binary(b"pipelined", None);
        let mut ws = WebsocketStream::new(Box::new(server), &buffered, None);

        assert_eq!(&ws.read_message().await.unwrap().unwrap()[..], b"pipelined");

        client.write_all(&encode_binary(b"more", None)).await.unwrap();
        assert_eq!(&ws.read_message().await.unwrap().unwrap()[..], b"more");
    }

    #[tokio::test]
    async fn test_close_frame_ends_reads() {
        let (mut client, mut ws) = stream_pair();
        client
            .write_all(&encode_frame(OPCODE_CLOSE, true, &1000u16.to_be_bytes(), None))
            .await
            .unwrap();

        assert!(ws.read_message().await.unwrap().is_none());
        // subsequent reads stay closed
        assert!(ws.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_ends_reads() {
        let (client, mut ws) = stream_pair();
        drop(client);
        assert!(ws.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ping_answered_before_next_write() {
        let (mut client, mut ws) = stream_pair();
        client
            .write_all(&encode_frame(OPCODE_PING, true, b"ts", None))
            .await
            .unwrap();
        client.write_all(&encode_binary(b"data", None)).await.unwrap();

        assert_eq!(&ws.read_message().await.unwrap().unwrap()[..], b"data");
        ws.write_message(b"reply").await.unwrap();

        let mut out = vec![0u8; 1024];
        let n = {
            use tokio::io::AsyncReadExt as _;
            client.read(&mut out).await.unwrap()
        };
        let (opcode, payload, consumed) = decode_frame(&out[..n]);
        assert_eq!(opcode, OPCODE_PONG);
        assert_eq!(payload, b"ts");
        let (opcode, payload, _) = decode_frame(&out[consumed..n]);
        assert_eq!(opcode, OPCODE_BINARY);
        assert_eq!(payload, b"reply");
    }

    #[tokio::test]
    async fn test_close_is_sent_once() {
        let (mut client, mut ws) = stream_pair();
        ws.close(1000, "done").await.unwrap();
        let _ = ws.close(1002, "again").await;

        let mut out = Vec::new();
        {
            use tokio::io::AsyncReadExt as _;
            client.read_to_end(&mut out).await.unwrap();
        }
        let (opcode, payload, consumed) = decode_frame(&out);
        assert_eq!(opcode, OPCODE_CLOSE);
        assert_eq!(&payload[..2], &1000u16.to_be_bytes());
        assert_eq!(&payload[2..], b"done");
        assert_eq!(consumed, out.len());
    }

    #[tokio::test]
    async fn test_continuation_without_start_rejected() {
        let (mut client, mut ws) = stream_pair();
        client
            .write_all(&encode_frame(OPCODE_CONTINUE, true, b"x", None))
            .await
            .unwrap();
        assert!(ws.read_message().await.is_err());
    }
}
