use std::io;

use bytes::{Buf, Bytes, BytesMut};
use itertools::Itertools;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Splits a stream into CRLF-terminated command lines and fixed-size job
/// bodies.
pub struct LineReader<T: AsyncRead + Unpin> {
    /// Bytes read but not yet handed out.
    buf: BytesMut,
    /// Longest line handed out whole. Anything longer comes back in pieces.
    max_line: usize,
    /// No CRLF starts before this index of buf.
    maybe_crlf_from: usize,
    reader: T,
    /// Returned once buffered lines run out.
    pending_error: Option<io::Error>,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    /// Reads the next CRLF-terminated line, without its CRLF. Returns None at
    /// end of stream, dropping any unterminated tail.
    ///
    /// Cancel-safe: the only await is a `read_buf` into the internal buffer.
    /// A read error is held back until the lines already buffered have been
    /// handed out.
    pub async fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            // Scan only the bytes not yet searched, starting one early in case
            // the previous read ended on a \r.
            let eol = self
                .buf
                .iter()
                .skip(self.maybe_crlf_from)
                .tuple_windows::<(_, _)>()
                .position(|x| x == (&b'\r', &b'\n'))
                .map(|pos| self.maybe_crlf_from + pos);

            match eol {
                Some(eol) if eol <= self.max_line => {
                    let line = self.buf.split_to(eol + 2).freeze();
                    self.maybe_crlf_from = 0;

                    return Ok(Some(line.slice(..eol)));
                },
                // Too long either way. The prefix can never parse, and the
                // remainder is read as a line of its own.
                Some(_) => return Ok(Some(self.split_overlong())),
                None if self.buf.len() >= self.max_line => {
                    return Ok(Some(self.split_overlong()));
                },
                None => {
                    let n_bytes_read =
                        match self.reader.read_buf(&mut self.buf).await {
                            Ok(n) => n,
                            Err(e) => {
                                self.pending_error = Some(e);
                                0
                            },
                        };

                    // Resume scanning from the byte before the new data.
                    self.maybe_crlf_from =
                        self.buf.len().saturating_sub(n_bytes_read + 1);

                    // Nothing read means end of stream (or an error), and no
                    // further line can be parsed.
                    if n_bytes_read == 0 {
                        return match self.pending_error.take() {
                            Some(e) => Err(e),
                            None => Ok(None),
                        };
                    }
                },
            }
        }
    }

    fn split_overlong(&mut self) -> Bytes {
        self.maybe_crlf_from = 0;
        self.buf.split_to(self.max_line).freeze()
    }

    /// Reads exactly `n` bytes, returning None if the stream ends first.
    pub async fn read_exact(&mut self, n: usize) -> io::Result<Option<Bytes>> {
        self.fill(n).await?;

        if self.buf.len() < n {
            return Ok(None);
        }

        self.maybe_crlf_from = 0;
        Ok(Some(self.buf.split_to(n).freeze()))
    }

    /// Discards exactly `n` bytes, returning false if the stream ends first.
    pub async fn skip(&mut self, mut n: usize) -> io::Result<bool> {
        self.maybe_crlf_from = 0;

        loop {
            let take = n.min(self.buf.len());
            self.buf.advance(take);
            n -= take;

            if n == 0 {
                return Ok(true);
            }

            if self.read_more().await? == 0 {
                return Ok(false);
            }
        }
    }

    /// Resolves once the peer has closed the stream (or it fails). Anything
    /// the peer sends in the meantime is buffered for later reads.
    ///
    /// This function is cancel-safe for the same reason as `read_line`.
    pub async fn wait_closed(&mut self) {
        loop {
            match self.reader.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {},
            }
        }
    }

    /// Reads until at least `n` bytes are buffered or the stream ends.
    async fn fill(&mut self, n: usize) -> io::Result<()> {
        self.buf.reserve(n.saturating_sub(self.buf.len()));

        while self.buf.len() < n {
            if self.read_more().await? == 0 {
                break;
            }
        }

        Ok(())
    }

    async fn read_more(&mut self) -> io::Result<usize> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }

        self.reader.read_buf(&mut self.buf).await
    }

    /// Wraps `reader`, handing out unterminated data once `max_line` bytes
    /// accumulate.
    pub fn with_max_line(reader: T, max_line: usize) -> Self {
        Self {
            max_line,
            ..reader.into()
        }
    }
}

impl<T: AsyncRead + Unpin> From<T> for LineReader<T> {
    fn from(value: T) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line: usize::MAX,
            maybe_crlf_from: 0,
            reader: value,
            pending_error: None,
        }
    }
}
