//! Fills a fixed-capacity buffer from a stream and scans it for lines.
//!
//! Unlike [`bytes::BytesMut`]-based line readers (which grow the buffer to
//! accommodate whatever arrives), `LineScanner` holds a fixed-size backing
//! array and never blocks the caller on a line boundary it hasn't seen yet:
//! once the buffer fills without finding a terminator, it hands back a
//! partial chunk and lets the caller decide how to stitch continuations
//! together (see [`crate::parser::EventParser`], which does exactly that
//! for `data:` lines).

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::byte_span::ByteSpan;
use crate::error::{Error, Result};

/// Default backing buffer size, matching the spec's default of 1000 bytes.
pub const DEFAULT_CAPACITY: usize = 1000;

/// A single chunk of a line, never containing the terminator itself.
///
/// If `end_of_line` is `false`, the line continues into the next chunk
/// returned by [`LineScanner::read`].
#[derive(Debug)]
pub struct LineChunk<'a> {
    pub span: ByteSpan<'a>,
    pub end_of_line: bool,
}

/// Reads lines (terminated by `\r`, `\n`, or `\r\n`) out of an
/// `AsyncRead` stream using a single fixed-capacity buffer.
pub struct LineScanner<T> {
    reader: T,
    buf: Box<[u8]>,
    /// Valid, unconsumed bytes live in `buf[start..end]`.
    start: usize,
    end: usize,
    /// Offset up to which `buf[start..]` is already known to contain no
    /// terminator; avoids rescanning bytes we've already looked at.
    scanned_to: usize,
    /// Set when the previous chunk ended in a bare `\r` that was the last
    /// byte available; the very next byte decides whether it was a lone CR
    /// or the second half of a CRLF pair.
    last_was_cr: bool,
}

impl<T: AsyncRead + Unpin> LineScanner<T> {
    pub fn new(reader: T) -> Self {
        Self::with_capacity(reader, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(reader: T, cap: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; cap.max(1)].into_boxed_slice(),
            start: 0,
            end: 0,
            scanned_to: 0,
            last_was_cr: false,
        }
    }

    /// Reads the next line chunk, pulling from the underlying stream as
    /// needed. Fails with [`Error::StreamClosedByServer`] on a clean EOF
    /// that leaves no pending bytes to return, or with an I/O error if the
    /// underlying read fails.
    pub async fn read(&mut self) -> Result<LineChunk<'_>> {
        loop {
            // 1. Compact: slide unconsumed bytes down to the start of the
            // buffer so there's always room to read more.
            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.scanned_to = self.scanned_to.saturating_sub(self.start);
                self.start = 0;
            }

            // 3. A CR straddling the previous read's end: the next byte
            // decides whether it was a lone CR or the first half of a CRLF
            // pair. Don't resolve this until a byte has actually arrived —
            // if the buffer is empty, fall through to step 7 and revisit
            // this on the next iteration once more bytes are in.
            if self.last_was_cr && self.start < self.end {
                self.last_was_cr = false;
                if self.buf[self.start] == b'\n' {
                    self.start += 1;
                }
                self.scanned_to = self.scanned_to.max(self.start);
            }

            // 4. Look for a terminator in the unscanned tail of the buffer.
            let mut pos = self.scanned_to.max(self.start);
            while pos < self.end {
                match self.buf[pos] {
                    b'\n' => {
                        let span = ByteSpan::new(&self.buf, self.start, pos - self.start);
                        self.start = pos + 1;
                        self.scanned_to = self.start;
                        return Ok(LineChunk {
                            span,
                            end_of_line: true,
                        });
                    },
                    b'\r' => {
                        if pos + 1 < self.end {
                            let consumed = if self.buf[pos + 1] == b'\n' { 2 } else { 1 };
                            let span = ByteSpan::new(&self.buf, self.start, pos - self.start);
                            self.start = pos + consumed;
                            self.scanned_to = self.start;
                            return Ok(LineChunk {
                                span,
                                end_of_line: true,
                            });
                        } else {
                            // Last byte in the buffer: defer to the next read.
                            let span = ByteSpan::new(&self.buf, self.start, pos - self.start);
                            self.start = pos + 1;
                            self.scanned_to = self.start;
                            self.last_was_cr = true;
                            return Ok(LineChunk {
                                span,
                                end_of_line: true,
                            });
                        }
                    },
                    _ => pos += 1,
                }
            }
            self.scanned_to = pos;

            // 6. No terminator; if the buffer is full, emit a partial chunk.
            if self.end - self.start == self.buf.len() {
                let span = ByteSpan::new(&self.buf, self.start, self.end - self.start);
                self.start = self.end;
                return Ok(LineChunk {
                    span,
                    end_of_line: false,
                });
            }

            // 7. Pull more bytes and try again.
            let n = self.reader.read(&mut self.buf[self.end..]).await?;
            if n == 0 {
                return Err(Error::StreamClosedByServer);
            }
            self.end += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{self, AsyncWriteExt};
    use tokio::task::yield_now;

    use super::*;

    async fn collect_lines<T: AsyncRead + Unpin>(
        scanner: &mut LineScanner<T>,
        n: usize,
    ) -> Vec<(Vec<u8>, bool)> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let chunk = scanner.read().await.unwrap();
            out.push((chunk.span.as_bytes().to_vec(), chunk.end_of_line));
        }
        out
    }

    #[tokio::test]
    async fn splits_on_lf_cr_and_crlf() {
        let (mut client, server) = io::duplex(4096);
        tokio::spawn(async move {
            client.write_all(b"a\nb\rc\r\nd").await.unwrap();
            yield_now().await;
            client.write_all(b"\n").await.unwrap();
        });

        let mut s = LineScanner::new(server);
        let lines = collect_lines(&mut s, 4).await;
        assert_eq!(
            lines,
            vec![
                (b"a".to_vec(), true),
                (b"b".to_vec(), true),
                (b"c".to_vec(), true),
                (b"d".to_vec(), true),
            ]
        );
    }

    #[tokio::test]
    async fn cr_straddling_buffer_end_is_not_misread_as_two_lines() {
        // Force the CR to be the very last byte delivered in one read, with
        // the LF arriving in a subsequent read.
        let (mut client, server) = io::duplex(4096);
        tokio::spawn(async move {
            client.write_all(b"line1\r").await.unwrap();
            yield_now().await;
            client.write_all(b"\nline2\r\n").await.unwrap();
        });

        let mut s = LineScanner::new(server);
        let lines = collect_lines(&mut s, 2).await;
        assert_eq!(
            lines,
            vec![(b"line1".to_vec(), true), (b"line2".to_vec(), true)]
        );
    }

    #[tokio::test]
    async fn bare_cr_not_followed_by_lf_terminates_its_own_line() {
        let (mut client, server) = io::duplex(4096);
        tokio::spawn(async move {
            client.write_all(b"a\rb\n").await.unwrap();
        });

        let mut s = LineScanner::new(server);
        let lines = collect_lines(&mut s, 2).await;
        assert_eq!(lines, vec![(b"a".to_vec(), true), (b"b".to_vec(), true)]);
    }

    #[tokio::test]
    async fn full_buffer_without_terminator_yields_partial_chunk() {
        let (mut client, server) = io::duplex(4096);
        let payload = vec![b'x'; 10];
        let payload_clone = payload.clone();
        tokio::spawn(async move {
            client.write_all(&payload_clone).await.unwrap();
            client.write_all(b"\n").await.unwrap();
        });

        let mut s = LineScanner::with_capacity(server, 4);
        let first = s.read().await.unwrap();
        assert!(!first.end_of_line);
        assert_eq!(first.span.as_bytes(), b"xxxx");

        let second = s.read().await.unwrap();
        assert!(!second.end_of_line);
        assert_eq!(second.span.as_bytes(), b"xxxx");

        let third = s.read().await.unwrap();
        assert!(third.end_of_line);
        assert_eq!(third.span.as_bytes(), b"xx");
    }

    #[tokio::test]
    async fn clean_eof_with_no_pending_bytes_is_stream_closed() {
        let (client, server) = io::duplex(4096);
        drop(client);
        let mut s = LineScanner::new(server);
        let err = s.read().await.unwrap_err();
        assert!(matches!(err, Error::StreamClosedByServer));
    }
}
