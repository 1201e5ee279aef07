// src/channel/duplex.rs

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::time::timeout_at;

use super::line_buffer::LineBuffer;
use super::{Budget, Wait};
use crate::errors::{Error, Result};

const READ_CHUNK: usize = 4096;

enum Filled {
    Data,
    Eof,
    TimedOut,
}

/// Reads `'\n'`-terminated lines from one end of a pipe.
///
/// The reader is *good* until the stream has ended and everything buffered
/// has been handed out (or an I/O error occurred). A trailing line without a
/// terminator is delivered exactly once at end of stream.
pub struct LineReader<R> {
    inner: R,
    buf: LineBuffer,
    eof: bool,
    good: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: LineBuffer::new(),
            eof: false,
            good: true,
        }
    }

    /// False once the stream has ended and no buffered data remains, or
    /// after an I/O error. Reads on a not-good reader return `Ok(None)`.
    pub fn is_good(&self) -> bool {
        self.good
    }

    /// Next line, terminator included. `Ok(None)` means no line arrived
    /// within the wait budget, or the stream is exhausted.
    pub async fn read_line(&mut self, wait: Wait) -> io::Result<Option<String>> {
        if !self.good {
            return Ok(None);
        }
        let budget = wait.budget();
        loop {
            if let Some(line) = self.buf.pop_line() {
                return Ok(Some(line));
            }
            if self.eof {
                let rest = self.buf.take_remainder();
                self.good = false;
                return Ok(rest);
            }
            match self.fill(budget).await? {
                Filled::Data | Filled::Eof => continue,
                Filled::TimedOut => return Ok(None),
            }
        }
    }

    /// Whether a `read_line` would yield a line. Distinguishes three cases:
    /// data pending (true), stream closed with a final partial line still
    /// unread (true), stream closed and empty (false, and the reader goes
    /// not-good).
    pub async fn can_read_line(&mut self, wait: Wait) -> bool {
        if !self.good {
            return false;
        }
        let budget = wait.budget();
        loop {
            if self.buf.has_line() {
                return true;
            }
            if self.eof {
                if self.buf.is_empty() {
                    self.good = false;
                    return false;
                }
                return true;
            }
            match self.fill(budget).await {
                Ok(Filled::Data) | Ok(Filled::Eof) => continue,
                Ok(Filled::TimedOut) | Err(_) => return false,
            }
        }
    }

    async fn fill(&mut self, budget: Budget) -> io::Result<Filled> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = match budget {
            Budget::Forever => self.inner.read(&mut chunk).await,
            Budget::Poll | Budget::Until(_) => {
                let at = match budget {
                    Budget::Until(at) => at,
                    _ => tokio::time::Instant::now(),
                };
                match timeout_at(at, self.inner.read(&mut chunk)).await {
                    Ok(res) => res,
                    Err(_) => return Ok(Filled::TimedOut),
                }
            }
        };
        match read {
            Ok(0) => {
                self.eof = true;
                Ok(Filled::Eof)
            }
            Ok(n) => {
                self.buf.extend(&chunk[..n]);
                Ok(Filled::Data)
            }
            Err(e) => {
                self.good = false;
                Err(e)
            }
        }
    }
}

/// The outbound half of a channel: the write end of the child's stdin pipe.
pub struct ChannelWriter {
    inner: Option<ChildStdin>,
}

impl ChannelWriter {
    fn new(stdin: ChildStdin) -> Self {
        Self { inner: Some(stdin) }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Single OS write; may write fewer bytes than given.
    pub async fn write(&mut self, text: &str) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(w) => w.write(text.as_bytes()).await,
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel input already closed",
            )),
        }
    }

    pub async fn write_all(&mut self, text: &str) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(w) => {
                w.write_all(text.as_bytes()).await?;
                w.flush().await
            }
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel input already closed",
            )),
        }
    }

    /// Signals end-of-input by closing the pipe's write end. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut w) = self.inner.take() {
            let _ = w.shutdown().await;
        }
    }
}

/// The inbound half: the child's stdout and stderr pipes, multiplexed into
/// one line stream. Interleaving between the two streams is unspecified.
pub struct OutputStream {
    stdout: LineReader<ChildStdout>,
    stderr: LineReader<ChildStderr>,
}

impl OutputStream {
    /// Next line from either stream, terminator included. `None` once both
    /// streams are exhausted.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            match (self.stdout.is_good(), self.stderr.is_good()) {
                (false, false) => return None,
                (true, false) => {
                    if let Ok(Some(line)) = self.stdout.read_line(Wait::Forever).await {
                        return Some(line);
                    }
                }
                (false, true) => {
                    if let Ok(Some(line)) = self.stderr.read_line(Wait::Forever).await {
                        return Some(line);
                    }
                }
                (true, true) => {
                    let Self { stdout, stderr } = self;
                    tokio::select! {
                        res = stdout.read_line(Wait::Forever) => {
                            if let Ok(Some(line)) = res {
                                return Some(line);
                            }
                        }
                        res = stderr.read_line(Wait::Forever) => {
                            if let Ok(Some(line)) = res {
                                return Some(line);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Parent-side binding of a child's piped stdio: a writer feeding stdin and
/// a line stream draining stdout and stderr.
pub struct DuplexChannel {
    writer: ChannelWriter,
    output: OutputStream,
}

impl DuplexChannel {
    /// Takes ownership of the child's stdio handles. Fails if any handle is
    /// missing or was already taken.
    pub fn from_child(child: &mut Child) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ChannelSetup("child stdin is not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ChannelSetup("child stdout is not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ChannelSetup("child stderr is not piped".into()))?;
        Ok(Self {
            writer: ChannelWriter::new(stdin),
            output: OutputStream {
                stdout: LineReader::new(stdout),
                stderr: LineReader::new(stderr),
            },
        })
    }

    pub async fn write(&mut self, text: &str) -> io::Result<usize> {
        self.writer.write(text).await
    }

    pub async fn write_all(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text).await
    }

    /// Next stdout line within the wait budget.
    pub async fn read_line(&mut self, wait: Wait) -> io::Result<Option<String>> {
        self.output.stdout.read_line(wait).await
    }

    pub async fn can_read_line(&mut self, wait: Wait) -> bool {
        self.output.stdout.can_read_line(wait).await
    }

    /// Closes the outbound side, signalling end-of-input to the child.
    pub async fn close_output(&mut self) {
        self.writer.close().await;
    }

    pub fn split(self) -> (ChannelWriter, OutputStream) {
        (self.writer, self.output)
    }
}
