//! In-process single-producer/single-consumer byte streams
//!
//! A [`Piper`] owns exactly one reader end and one writer end. Bytes are
//! observed by the reader strictly in write order, and a full pipe blocks the
//! writer until the reader catches up. Dropping or shutting down the writer
//! ends the stream for the reader; dropping the reader makes further writes
//! fail with a broken pipe.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Default number of bytes buffered between writer and reader
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Type-erased input of a pipeline stage
pub type StageReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased output of a pipeline stage
pub type StageWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A unidirectional pipe connecting two adjacent stages
#[derive(Debug)]
pub struct Piper {
    pub reader: PipeReader,
    pub writer: PipeWriter,
}

impl Piper {
    pub fn new(capacity: usize) -> Self {
        let (read_half, write_half) = tokio::io::duplex(capacity.max(1));
        Self {
            reader: PipeReader(read_half),
            writer: PipeWriter(write_half),
        }
    }

    /// Hand the two ends to their owners
    pub fn split(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }
}

impl Default for Piper {
    fn default() -> Self {
        Self::new(DEFAULT_PIPE_CAPACITY)
    }
}

/// Reading end of a [`Piper`]
#[derive(Debug)]
pub struct PipeReader(DuplexStream);

impl PipeReader {
    pub fn boxed(self) -> StageReader {
        Box::new(self)
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

/// Writing end of a [`Piper`]
#[derive(Debug)]
pub struct PipeWriter(DuplexStream);

impl PipeWriter {
    pub fn boxed(self) -> StageWriter {
        Box::new(self)
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}
