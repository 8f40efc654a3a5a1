//! Incremental CRLF line reading over an `AsyncRead`.
//!
//! This module provides [`LineReader`], which splits a byte stream into
//! CRLF-terminated lines, starting from an already-received first packet and
//! falling through to the inner reader once that is exhausted. Bytes read
//! past the last consumed line are recoverable via [`LineReader::into_parts`].

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Errors produced while splitting a stream into lines.
#[derive(Debug, Error)]
pub enum LineError {
    /// A line contained bytes that are not valid UTF-8.
    #[error("line is not valid utf-8")]
    Utf8,
    /// The buffer limit was reached before a line delimiter arrived.
    #[error("buffered {0} bytes without finding a line delimiter")]
    TooLong(usize),
    /// The stream ended in the middle of a line.
    #[error("stream ended before end of line")]
    UnexpectedEof,
    /// Reading from the inner stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A CRLF line splitter over an `AsyncRead` with a prebuffered first packet.
///
/// Lines are decoded as strict UTF-8 and returned without their delimiter.
/// The internal buffer holds at most `max_buffered` undelivered bytes; a line
/// that does not terminate within that limit is an error.
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_buffered: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Creates a line reader that consumes `initial` before reading from
    /// `inner`.
    pub fn new(inner: R, initial: &[u8], max_buffered: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::from(initial),
            max_buffered,
        }
    }

    /// Reads the next CRLF-terminated line.
    pub async fn next_line(&mut self) -> Result<String, LineError> {
        loop {
            if let Some(idx) = memmem::find(&self.buf, CRLF) {
                let line = self.buf.split_to(idx);
                self.buf.advance(CRLF.len());
                let line = std::str::from_utf8(&line).map_err(|_| LineError::Utf8)?;
                return Ok(line.to_owned());
            }
            if self.buf.len() >= self.max_buffered {
                return Err(LineError::TooLong(self.buf.len()));
            }
            let max = self.max_buffered - self.buf.len();
            let n = (&mut self.inner)
                .take(max as u64)
                .read_buf(&mut self.buf)
                .await?;
            if n == 0 {
                return Err(LineError::UnexpectedEof);
            }
        }
    }

    /// Returns the unconsumed carry-over bytes and the inner reader.
    pub fn into_parts(self) -> (Bytes, R) {
        (self.buf.freeze(), self.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::AsyncWriteExt;

    use super::*;

    fn reader(initial: &[u8], rest: &'static [u8]) -> LineReader<Cursor<&'static [u8]>> {
        LineReader::new(Cursor::new(rest), initial, 8192)
    }

    #[tokio::test]
    async fn splits_initial_packet_into_lines() {
        let mut r = reader(b"GET / HTTP/1.1\r\nHost: x\r\n", b"");
        assert_eq!(r.next_line().await.unwrap(), "GET / HTTP/1.1");
        assert_eq!(r.next_line().await.unwrap(), "Host: x");
    }

    #[tokio::test]
    async fn continues_into_inner_reader() {
        let mut r = reader(b"first\r\nsec", b"ond\r\n");
        assert_eq!(r.next_line().await.unwrap(), "first");
        assert_eq!(r.next_line().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn line_split_across_many_reads() {
        let (mut tx, rx) = tokio::io::duplex(16);
        let mut r = LineReader::new(rx, b"he", 8192);
        let write = async move {
            for chunk in [&b"llo"[..], b" wor", b"ld\r", b"\ntail"] {
                tx.write_all(chunk).await.unwrap();
            }
            drop(tx);
        };
        let (line, ()) = tokio::join!(r.next_line(), write);
        assert_eq!(line.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn bare_cr_is_not_a_delimiter() {
        let mut r = reader(b"a\rb\r\n", b"");
        assert_eq!(r.next_line().await.unwrap(), "a\rb");
    }

    #[tokio::test]
    async fn empty_line() {
        let mut r = reader(b"\r\nrest", b"");
        assert_eq!(r.next_line().await.unwrap(), "");
        assert_eq!(r.into_parts().0.as_ref(), b"rest");
    }

    #[tokio::test]
    async fn carry_over_preserved() {
        let mut r = reader(b"line\r\nbody bytes", b"");
        r.next_line().await.unwrap();
        let (carry, _) = r.into_parts();
        assert_eq!(carry.as_ref(), b"body bytes");
    }

    #[tokio::test]
    async fn rejects_invalid_utf8() {
        let mut r = reader(&[0xff, 0xfe, b'\r', b'\n'], b"");
        assert!(matches!(r.next_line().await, Err(LineError::Utf8)));
    }

    #[tokio::test]
    async fn eof_mid_line() {
        let mut r = reader(b"unterminated", b"");
        assert!(matches!(
            r.next_line().await,
            Err(LineError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn enforces_buffer_limit() {
        let mut r = LineReader::new(Cursor::new(&b""[..]), &[b'x'; 32], 16);
        assert!(matches!(r.next_line().await, Err(LineError::TooLong(_))));
    }
}
