use tokio::io::AsyncReadExt;

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Buffered CRLF line reader used for the inbound HTTP request. Bytes read
/// past the last consumed line stay available through `unparsed_data`, so
/// that anything the client pipelined after the request (WebSocket frames)
/// can be handed to the next layer.
pub struct LineReader {
    buf: Box<[u8]>,
    start_offset: usize,
    end_offset: usize,
}

impl LineReader {
    pub fn new() -> Self {
        // the buffer size is also the maximum line length that can be read.
        Self {
            buf: vec![0u8; DEFAULT_BUFFER_SIZE].into_boxed_slice(),
            start_offset: 0,
            end_offset: 0,
        }
    }

    pub async fn read_line<T: AsyncReadExt + Unpin>(
        &mut self,
        stream: &mut T,
    ) -> std::io::Result<&str> {
        let mut search_start_offset = self.start_offset;
        loop {
            let search_end_offset = self.end_offset;
            match self.buf[search_start_offset..search_end_offset]
                .iter()
                .position(|&b| b == b'\n')
            {
                Some(pos) => {
                    let newline_pos = search_start_offset + pos;
                    if newline_pos == self.start_offset || self.buf[newline_pos - 1] != b'\r' {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "Line is not terminated by CRLF",
                        ));
                    }
                    let line_start = self.start_offset;
                    self.start_offset = newline_pos + 1;
                    let line = &self.buf[line_start..newline_pos - 1];
                    return std::str::from_utf8(line).map_err(|e| {
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("Failed to decode utf8: {}", e),
                        )
                    });
                }
                None => {
                    let previous_start_offset = self.start_offset;

                    self.read(stream).await?;

                    // Only search through new data. The offsets can only have
                    // moved if the buffer was compacted to the front.
                    if previous_start_offset != self.start_offset {
                        search_start_offset = search_end_offset - previous_start_offset;
                    } else {
                        search_start_offset = search_end_offset;
                    }
                }
            }
        }
    }

    pub fn unparsed_data(&self) -> &[u8] {
        &self.buf[self.start_offset..self.end_offset]
    }

    async fn read<T: AsyncReadExt + Unpin>(&mut self, stream: &mut T) -> std::io::Result<()> {
        if self.start_offset == 0 && self.end_offset == self.buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "line is too long",
            ));
        }

        if self.start_offset > 0 {
            self.buf.copy_within(self.start_offset..self.end_offset, 0);
            self.end_offset -= self.start_offset;
            self.start_offset = 0;
        }

        let len = stream.read(&mut self.buf[self.end_offset..]).await?;
        if len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "EOF while reading",
            ));
        }
        self.end_offset += len;
        Ok(())
    }
}
