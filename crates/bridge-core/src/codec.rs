//! Bounded newline framing for backend output.
//!
//! Backends speak one JSON-RPC message per line. `LineCodec` splits a byte
//! stream into lines (delimiter included) without ever buffering more than
//! `max_length` bytes of a single line. A line that grows past the limit is
//! discarded up to its terminating newline and reported as
//! [`Line::Oversized`] so the reader can log it and keep going.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// One framed unit read from a line-delimited stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line including its trailing `\n` (absent only for a final
    /// unterminated line at end of stream).
    Complete(Bytes),
    /// A line that exceeded the limit and was dropped; `size` counts every
    /// discarded byte including the delimiter.
    Oversized { size: usize },
}

/// Newline decoder with a per-line size cap.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where to resume the newline search in the current buffer.
    next_index: usize,
    /// Bytes thrown away so far while skipping an oversized line.
    discarding: Option<usize>,
}

impl LineCodec {
    /// Create a codec accepting lines of at most `max_length` bytes
    /// (delimiter included).
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
            discarding: None,
        }
    }

    /// The configured per-line limit.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        loop {
            if let Some(discarded) = self.discarding {
                return match buf.iter().position(|b| *b == b'\n') {
                    Some(offset) => {
                        buf.advance(offset + 1);
                        self.discarding = None;
                        Ok(Some(Line::Oversized {
                            size: discarded + offset + 1,
                        }))
                    }
                    None => {
                        let len = buf.len();
                        buf.advance(len);
                        self.discarding = Some(discarded + len);
                        Ok(None)
                    }
                };
            }

            let read_to = self.max_length.min(buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match newline {
                Some(offset) => {
                    let end = self.next_index + offset + 1;
                    self.next_index = 0;
                    return Ok(Some(Line::Complete(buf.split_to(end).freeze())));
                }
                None if buf.len() >= self.max_length => {
                    // No delimiter within the limit: switch to skipping.
                    self.next_index = 0;
                    self.discarding = Some(0);
                }
                None => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if let Some(discarded) = self.discarding.take() {
            if discarded > 0 {
                return Ok(Some(Line::Oversized { size: discarded }));
            }
        }
        self.next_index = 0;
        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Line::Complete(buf.split().freeze())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn complete(s: &str) -> Line {
        Line::Complete(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_splits_lines_keeping_delimiter() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from("first\nsecond\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(complete("first\n")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(complete("second\n")));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_partial_line_waits_for_more_input() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from("{\"jsonrpc\":");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\"2.0\"}\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(complete("{\"jsonrpc\":\"2.0\"}\n"))
        );
    }

    #[test]
    fn test_oversized_line_is_skipped_and_next_line_survives() {
        let mut codec = LineCodec::new(8);
        let mut buf = BytesMut::from("0123456789abcdef");

        // Still inside the oversized line: nothing to emit yet.
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"xyz\nok\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Line::Oversized { size: 20 })
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(complete("ok\n")));
    }

    #[test]
    fn test_line_exactly_at_limit_is_accepted() {
        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from("abc\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(complete("abc\n")));
    }

    #[test]
    fn test_unterminated_tail_is_flushed_at_eof() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from("done\ntail");

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(complete("done\n")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(complete("tail")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn test_framed_read_over_async_reader() {
        let input: &[u8] = b"{\"id\":1}\n{\"method\":\"notify\"}\n";
        let lines: Vec<Line> = FramedRead::new(input, LineCodec::new(1024))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![complete("{\"id\":1}\n"), complete("{\"method\":\"notify\"}\n")]
        );
    }
}
