//! Demultiplexing of exec session output.
//!
//! An exec session interleaves the process's stdout and stderr on a single
//! connection. [`DemuxConn`] turns it back into a plain duplex stream: reads
//! yield stdout only, stderr chunks are handed to a diagnostic sink as they
//! are encountered, and writes go to the process's stdin.
//!
//! Chunks are only pulled from the session when the reader asks for more
//! data, so a slow reader back-pressures the backend process.

use super::engine::{OutputChunk, OutputStream};
use crate::error::Result;
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// Receives stderr output of a demultiplexed session.
pub type DiagnosticSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Sink that forwards stderr lines to the log.
pub fn log_sink(source: impl Into<String>) -> DiagnosticSink {
    let source = source.into();
    Arc::new(move |data: &[u8]| {
        for line in String::from_utf8_lossy(data).lines().filter(|l| !l.is_empty()) {
            debug!(target: "brig::buildkitd", source = %source, "{}", line);
        }
    })
}

/// Duplex stream over an exec session with stderr split off.
pub struct DemuxConn {
    output: OutputStream,
    input: Pin<Box<dyn AsyncWrite + Send>>,
    diagnostics: DiagnosticSink,
    pending: Bytes,
    eof: bool,
}

impl DemuxConn {
    pub fn new(
        output: OutputStream,
        input: Pin<Box<dyn AsyncWrite + Send>>,
        diagnostics: DiagnosticSink,
    ) -> Self {
        Self { output, input, diagnostics, pending: Bytes::new(), eof: false }
    }
}

impl AsyncRead for DemuxConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                let chunk = this.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }

            match ready!(this.output.poll_next_unpin(cx)) {
                Some(Ok(OutputChunk::Stdout(data))) => this.pending = data,
                Some(Ok(OutputChunk::Stderr(data))) => (this.diagnostics)(&data),
                Some(Err(e)) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
                None => this.eof = true,
            }
        }
    }
}

impl AsyncWrite for DemuxConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().input.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().input.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().input.as_mut().poll_shutdown(cx)
    }
}

/// Drain an output stream into separate stdout and stderr buffers.
pub async fn collect_output(
    mut output: OutputStream,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> Result<()> {
    while let Some(chunk) = output.next().await {
        match chunk? {
            OutputChunk::Stdout(data) => stdout.extend_from_slice(&data),
            OutputChunk::Stderr(data) => stderr.extend_from_slice(&data),
        }
    }
    Ok(())
}
