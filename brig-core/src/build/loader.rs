//! Streaming `docker` exports into the local image store.
//!
//! The exporter writes an image tarball into a [`LoadWriter`]. The first write
//! spawns the load call, which reads the other end of an unbuffered pipe: a
//! write completes only once the image store has read all of it, so the
//! exporter never runs ahead of the import. Shutting the writer down waits
//! until the load has started, not until it has finished.

use crate::error::{BrigError, Result};
use crate::progress::{ProgressWriter, STDOUT};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const IMPORT_VERTEX: &str = "importing to docker";

/// Local image store that can load image tarballs.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Start loading the tarball read from `input`. The returned stream
    /// yields progress lines until the load completes.
    async fn load_image(
        &self,
        input: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<BoxStream<'static, Result<String>>>;
}

/// A written buffer and the signal that it was fully read.
struct Chunk {
    data: Bytes,
    consumed: oneshot::Sender<()>,
}

/// Read half of the pipe handed to the image store.
struct PipeReader {
    rx: mpsc::UnboundedReceiver<Chunk>,
    current: Option<Chunk>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(chunk) = this.current.as_mut() {
                if chunk.data.has_remaining() {
                    let n = chunk.data.len().min(buf.remaining());
                    buf.put_slice(&chunk.data[..n]);
                    chunk.data.advance(n);
                }
                if !chunk.data.has_remaining() {
                    if let Some(done) = this.current.take() {
                        let _ = done.consumed.send(());
                    }
                }
                return Poll::Ready(Ok(()));
            }
            match ready!(this.rx.poll_recv(cx)) {
                Some(chunk) => this.current = Some(chunk),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

struct PendingLoad {
    store: Arc<dyn ImageStore>,
    reader: PipeReader,
    progress: ProgressWriter,
    started: oneshot::Sender<std::result::Result<(), String>>,
}

/// Export sink that loads the written image into an [`ImageStore`].
///
/// After a write returns `Pending`, callers must retry with the same buffer,
/// as `write_all` does.
pub struct LoadWriter {
    tx: Option<mpsc::UnboundedSender<Chunk>>,
    inflight: Option<(usize, oneshot::Receiver<()>)>,
    pending: Option<PendingLoad>,
    started: Option<oneshot::Receiver<std::result::Result<(), String>>>,
}

impl LoadWriter {
    pub fn new(store: Arc<dyn ImageStore>, progress: ProgressWriter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = PipeReader { rx, current: None };
        let (started_tx, started_rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            inflight: None,
            pending: Some(PendingLoad { store, reader, progress, started: started_tx }),
            started: Some(started_rx),
        }
    }

    fn start(&mut self) {
        if let Some(load) = self.pending.take() {
            debug!("Starting image load");
            tokio::spawn(run_load(load));
        }
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "image load stopped reading")
}

async fn run_load(load: PendingLoad) {
    let PendingLoad { store, reader, progress, started } = load;
    let mut lines = match store.load_image(Box::new(reader)).await {
        Ok(lines) => lines,
        Err(e) => {
            warn!(error = %e, "Image load failed to start");
            let _ = started.send(Err(e.to_string()));
            return;
        }
    };
    let _ = started.send(Ok(()));

    let result = progress
        .wrap(IMPORT_VERTEX, |sub| async move {
            while let Some(line) = lines.next().await {
                let mut line = line?;
                line.push('\n');
                sub.log(STDOUT, line.as_bytes()).await;
            }
            Ok(())
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, "Image load failed");
    }
}

impl AsyncWrite for LoadWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            if let Some((len, consumed)) = this.inflight.as_mut() {
                let len = *len;
                let outcome = ready!(Pin::new(consumed).poll(cx));
                this.inflight = None;
                return match outcome {
                    Ok(()) => Poll::Ready(Ok(len)),
                    Err(_) => Poll::Ready(Err(closed_pipe())),
                };
            }
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }

            this.start();
            let tx = this.tx.as_ref().ok_or_else(closed_pipe)?;
            let (consumed_tx, consumed_rx) = oneshot::channel();
            tx.send(Chunk { data: Bytes::copy_from_slice(buf), consumed: consumed_tx })
                .map_err(|_| closed_pipe())?;
            this.inflight = Some((buf.len(), consumed_rx));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // End of stream for the reader.
        this.tx = None;

        // Nothing was ever written, so no load to wait for.
        if this.pending.is_some() {
            return Poll::Ready(Ok(()));
        }
        if let Some(rx) = this.started.as_mut() {
            let outcome = ready!(Pin::new(rx).poll(cx));
            this.started = None;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(msg)) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, msg))),
                Err(_) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        BrigError::Internal("image load ended before starting".to_string()),
                    )))
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::channel;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct RecordingStore {
        called: AtomicBool,
        loaded: Arc<Mutex<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl ImageStore for RecordingStore {
        async fn load_image(
            &self,
            mut input: Box<dyn AsyncRead + Send + Unpin>,
        ) -> Result<BoxStream<'static, Result<String>>> {
            self.called.store(true, Ordering::SeqCst);
            if self.fail {
                return Err(BrigError::Internal("daemon unavailable".to_string()));
            }
            let loaded = self.loaded.clone();
            let stream = futures::stream::once(async move {
                let mut body = Vec::new();
                input.read_to_end(&mut body).await?;
                loaded.lock().extend_from_slice(&body);
                Ok::<_, BrigError>(format!("Loaded image: {} bytes", body.len()))
            });
            Ok(stream.boxed())
        }
    }

    #[tokio::test]
    async fn test_load_starts_on_first_write() {
        let store = Arc::new(RecordingStore::default());
        let (pw, mut rx) = channel();
        let mut writer = LoadWriter::new(store.clone(), pw);
        assert!(!store.called.load(Ordering::SeqCst));

        writer.write_all(b"image tarball").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let mut vertex_names = Vec::new();
        let mut logs = Vec::new();
        while let Some(event) = rx.recv().await {
            vertex_names.extend(event.status.vertexes.into_iter().map(|v| v.name));
            logs.extend(event.status.logs.into_iter().map(|l| l.data));
        }

        assert!(store.called.load(Ordering::SeqCst));
        assert_eq!(store.loaded.lock().as_slice(), b"image tarball");
        assert!(vertex_names.iter().all(|n| n == IMPORT_VERTEX));
        assert_eq!(logs, vec![b"Loaded image: 13 bytes\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_shutdown_without_writes_does_not_load() {
        let store = Arc::new(RecordingStore::default());
        let (pw, _rx) = channel();
        let mut writer = LoadWriter::new(store.clone(), pw);
        writer.shutdown().await.unwrap();
        assert!(!store.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_load_surfaces_on_shutdown() {
        let store = Arc::new(RecordingStore { fail: true, ..Default::default() });
        let (pw, _rx) = channel();
        let mut writer = LoadWriter::new(store, pw);

        // The write fails once the load drops its input.
        let write = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(write.kind(), std::io::ErrorKind::BrokenPipe);
        let err = writer.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("daemon unavailable"));
    }

    /// Accepts the input but never reads it.
    #[derive(Default)]
    struct StalledStore {
        input: Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>,
    }

    #[async_trait]
    impl ImageStore for StalledStore {
        async fn load_image(
            &self,
            input: Box<dyn AsyncRead + Send + Unpin>,
        ) -> Result<BoxStream<'static, Result<String>>> {
            *self.input.lock() = Some(input);
            Ok(futures::stream::pending().boxed())
        }
    }

    #[tokio::test]
    async fn test_write_waits_for_the_store_to_read() {
        let store = Arc::new(StalledStore::default());
        let (pw, _rx) = channel();
        let mut writer = LoadWriter::new(store.clone(), pw);

        let write = writer.write_all(&[7u8; 32 * 1024]);
        let stalled = tokio::time::timeout(std::time::Duration::from_millis(100), write).await;
        assert!(stalled.is_err(), "write completed without a reader");

        // Reading drains the pending chunk and releases the writer.
        let mut input = store.input.lock().take().unwrap();
        let reader = tokio::spawn(async move {
            let mut body = Vec::new();
            input.read_to_end(&mut body).await.unwrap();
            body.len()
        });
        writer.write_all(&[7u8; 32 * 1024]).await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);
        assert_eq!(reader.await.unwrap(), 32 * 1024);
    }
}
