//! Newline-delimited text framing over async byte streams
//!
//! `LineReader` yields one line per call with the terminator stripped;
//! `LineWriter` appends the terminator and flushes after every write so
//! peers see each line as soon as it is produced.

use std::io;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};

/// Default upper bound on one inbound line, terminator included
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Reads `\n`-terminated lines from a byte stream
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_line_bytes: usize,
    buf: Vec<u8>,
    /// Set after returning a chunk of a line that had no terminator yet
    mid_line: bool,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_line_bytes,
            buf: Vec::new(),
            mid_line: false,
        }
    }

    /// Read the next line
    ///
    /// Returns `Ok(None)` at EOF. A trailing `\r` is stripped along with the
    /// `\n`; bytes that are not valid UTF-8 are replaced. A line longer than
    /// the configured limit comes back in limit-sized chunks, one per call.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let limit = self.max_line_bytes as u64;

        loop {
            self.buf.clear();
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if read == 0 {
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') {
                // Limit hit or EOF without a terminator; hand out what we have.
                self.mid_line = read as u64 == limit;
                return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
            }

            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }

            // A terminator right after a full chunk ends that line, not a new empty one.
            let tail_of_chunked = std::mem::take(&mut self.mid_line) && self.buf.is_empty();
            if !tail_of_chunked {
                return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
            }
        }
    }
}

/// Writes lines to a byte stream, flushing after each one
pub struct LineWriter<W> {
    inner: BufWriter<W>,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
        }
    }

    /// Write `line` followed by `\n`
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }

    /// Write `text` with no terminator, leaving the client's cursor on the same line
    pub async fn write_prompt(&mut self, text: &str) -> io::Result<()> {
        self.inner.write_all(text.as_bytes()).await?;
        self.inner.flush().await
    }

    /// Flush and shut down the write side of the stream
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
