use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::DecodeError;

pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

const CRLF: &[u8] = b"\r\n";

/// Buffered reader over a borrowed connection.
///
/// The reader never closes `conn`; it only issues reads on it. One refill is
/// one underlying `read` call, and only happens once every buffered byte has
/// been handed out.
#[derive(Debug)]
pub struct BufferedReader<'a, R> {
    conn: &'a mut R,
    buf: Box<[u8]>,
    filled: usize,
    pos: usize,
}

impl<'a, R: AsyncRead + Unpin> BufferedReader<'a, R> {
    pub fn new(conn: &'a mut R) -> Self {
        Self::with_capacity(conn, DEFAULT_BUFFER_SIZE)
    }

    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(conn: &'a mut R, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            conn,
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes already pulled off the connection but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    async fn refill(&mut self) -> Result<usize, DecodeError> {
        let n = self.conn.read(&mut self.buf).await?;
        self.pos = 0;
        self.filled = n;
        Ok(n)
    }

    /// Reads up to and including the first occurrence of `delimiter`.
    ///
    /// If the stream ends first, whatever was read is returned as-is; callers
    /// check whether the result actually ends with the delimiter.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        if delimiter.is_empty() {
            return Ok(out);
        }

        loop {
            if self.pos == self.filled && self.refill().await? == 0 {
                return Ok(out);
            }

            // a match may start in the tail of what we already collected
            let search_from = out.len().saturating_sub(delimiter.len() - 1);
            let before = out.len();
            out.extend_from_slice(&self.buf[self.pos..self.filled]);

            if let Some(idx) = find(&out[search_from..], delimiter) {
                let end = search_from + idx + delimiter.len();
                self.pos += end - before;
                out.truncate(end);
                return Ok(out);
            }
            self.pos = self.filled;
        }
    }

    /// Reads exactly `len` bytes.
    pub async fn read_fixed(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(len.min(self.capacity()));

        while out.len() < len {
            if self.pos == self.filled && self.refill().await? == 0 {
                return Err(DecodeError::ShortRead {
                    expected: len,
                    received: out.len(),
                });
            }
            let take = (self.filled - self.pos).min(len - out.len());
            out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
        }

        Ok(out)
    }

    /// Decodes a chunked transfer-encoded body and returns the joined payload.
    pub async fn read_chunked(&mut self) -> Result<Vec<u8>, DecodeError> {
        let mut body = Vec::new();
        loop {
            let line = self.read_until(CRLF).await?;
            let Some(line) = line.strip_suffix(CRLF) else {
                return Err(DecodeError::UnexpectedEof);
            };
            let size = parse_chunk_size(line)?;

            if size == 0 {
                // trailer section / final CRLF
                self.read_until(CRLF).await?;
                break;
            }

            let chunk = self.read_fixed(size).await?;
            body.extend_from_slice(&chunk);
            self.read_until(CRLF).await?;
        }
        Ok(body)
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, DecodeError> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let size = String::from_utf8_lossy(size);
    let size = size.trim();
    usize::from_str_radix(size, 16).map_err(|_| DecodeError::InvalidChunkSize(size.to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
