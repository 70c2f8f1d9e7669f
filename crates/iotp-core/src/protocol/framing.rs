//! Bounded line reading for the hex line protocol.
//!
//! Both endpoints read one `\n`-terminated line at a time.  Lines are
//! handled as raw bytes so a peer sending non-UTF-8 garbage produces an
//! undecodable line instead of an I/O error, and no line may grow past
//! [`MAX_LINE_LEN`] bytes.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest line accepted, terminator excluded.  An INITIAL snapshot of a
/// home with 255 devices of every kind still fits.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One unit read from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its `\n`.
    Line(Vec<u8>),
    /// More than the limit arrived without a newline.  The rest of that line
    /// is skipped if reading continues.
    TooLong,
}

/// Splits a buffered reader into [`Frame`]s.
///
/// [`LineReader::next_frame`] is cancel safe: bytes taken from the reader
/// before a cancelled call stay buffered here, so it can sit inside a
/// `timeout` or `select!` without losing part of a line.
pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    max_len: usize,
    skipping: bool,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, MAX_LINE_LEN)
    }

    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            max_len,
            skipping: false,
        }
    }

    /// Reads the next frame.  Returns `None` at end of stream; an
    /// unterminated final fragment is returned as a line first.
    ///
    /// # Errors
    ///
    /// Returns the underlying reader's I/O error.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.pending.is_empty() || self.skipping {
                    self.pending.clear();
                    return Ok(None);
                }
                return Ok(Some(Frame::Line(std::mem::take(&mut self.pending))));
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let body = newline.unwrap_or(available.len());
            if !self.skipping {
                self.pending.extend_from_slice(&available[..body]);
            }
            let consumed = newline.map_or(body, |at| at + 1);
            self.inner.consume(consumed);

            if self.skipping {
                self.skipping = newline.is_none();
                continue;
            }
            if self.pending.len() > self.max_len {
                self.pending.clear();
                self.skipping = newline.is_none();
                return Ok(Some(Frame::TooLong));
            }
            if newline.is_some() {
                return Ok(Some(Frame::Line(std::mem::take(&mut self.pending))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt, BufReader};
    use tokio::time::{timeout, Duration};

    fn reader(input: &[u8], max_len: usize) -> LineReader<&[u8]> {
        LineReader::with_max_len(input, max_len)
    }

    #[tokio::test]
    async fn test_lines_are_split_at_newline() {
        // Arrange
        let mut lines = reader(b"00\n0101\r\n", 16);

        // Act / Assert
        assert_eq!(lines.next_frame().await.unwrap(), Some(Frame::Line(b"00".to_vec())));
        assert_eq!(lines.next_frame().await.unwrap(), Some(Frame::Line(b"0101\r".to_vec())));
        assert_eq!(lines.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_utf8_bytes_come_back_as_a_line() {
        let mut lines = reader(&[0xFF, 0xFE, b'\n'], 16);

        assert_eq!(
            lines.next_frame().await.unwrap(),
            Some(Frame::Line(vec![0xFF, 0xFE]))
        );
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_returned_before_end() {
        let mut lines = reader(b"09", 16);

        assert_eq!(lines.next_frame().await.unwrap(), Some(Frame::Line(b"09".to_vec())));
        assert_eq!(lines.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_over_long_line_is_reported_then_skipped() {
        // Arrange
        let mut input = vec![b'a'; 40];
        input.extend_from_slice(b"\n00\n");
        let mut lines = reader(&input, 8);

        // Act
        let first = lines.next_frame().await.unwrap();
        let second = lines.next_frame().await.unwrap();

        // Assert
        assert_eq!(first, Some(Frame::TooLong));
        assert_eq!(second, Some(Frame::Line(b"00".to_vec())));
    }

    #[tokio::test]
    async fn test_line_at_the_limit_is_accepted() {
        let mut lines = reader(b"01234567\n", 8);

        assert_eq!(
            lines.next_frame().await.unwrap(),
            Some(Frame::Line(b"01234567".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_partial_line() {
        // Arrange
        let (mut tx, rx) = duplex(64);
        let mut lines = LineReader::new(BufReader::new(rx));
        tx.write_all(b"01").await.unwrap();

        // Act: the first wait gives up halfway through the line
        let early = timeout(Duration::from_millis(20), lines.next_frame()).await;
        tx.write_all(b"49\n").await.unwrap();
        let line = lines.next_frame().await.unwrap();

        // Assert
        assert!(early.is_err());
        assert_eq!(line, Some(Frame::Line(b"0149".to_vec())));
    }
}
