//! Build progress plumbing.
//!
//! Backends report progress as [`SolveStatus`] batches. Every producer holds a
//! [`ProgressWriter`], which tags what it sends with an optional prefix before
//! it reaches the single consumer (usually a [`Printer`]). The stream is done
//! once every writer has been dropped.
//!
//! ```text
//! solve task ──► status_channel() ──┐
//! solve task ──► status_channel() ──┼──► ProgressReceiver ──► Printer
//! bootstrap  ──► wrap()/log()    ───┘
//! ```

mod printer;

pub use printer::Printer;

use crate::error::Result;
use std::future::Future;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffered status batches per channel before producers are back-pressured.
const STATUS_BUFFER_SIZE: usize = 128;

/// Standard output stream number used in [`VertexLog::stream`].
pub const STDOUT: u8 = 1;
/// Standard error stream number used in [`VertexLog::stream`].
pub const STDERR: u8 = 2;

/// One step of a build as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    pub digest: String,
    pub name: String,
    pub started: Option<SystemTime>,
    pub completed: Option<SystemTime>,
    pub cached: bool,
    pub error: Option<String>,
}

/// Raw output attached to a vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLog {
    pub vertex: String,
    pub stream: u8,
    pub data: Vec<u8>,
}

/// A batch of progress updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveStatus {
    pub vertexes: Vec<Vertex>,
    pub logs: Vec<VertexLog>,
}

/// A status batch tagged with the prefix of the writer that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub prefix: Option<String>,
    pub status: SolveStatus,
}

/// Consumer side of a progress channel.
pub type ProgressReceiver = mpsc::Receiver<StatusEvent>;

/// Create a progress channel.
pub fn channel() -> (ProgressWriter, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(STATUS_BUFFER_SIZE);
    (ProgressWriter { tx, prefix: None }, rx)
}

/// Producer handle for progress events.
///
/// Cloning is cheap. Sends never fail: once the consumer is gone, progress is
/// silently dropped so a build is never aborted because nobody is watching.
#[derive(Debug, Clone)]
pub struct ProgressWriter {
    tx: mpsc::Sender<StatusEvent>,
    prefix: Option<String>,
}

impl ProgressWriter {
    /// Derive a writer whose events carry `prefix`. When `enabled` is false
    /// the derived writer sends unprefixed events.
    pub fn with_prefix(&self, prefix: impl Into<String>, enabled: bool) -> Self {
        let prefix = prefix.into();
        let prefix = if enabled && !prefix.is_empty() { Some(prefix) } else { None };
        Self { tx: self.tx.clone(), prefix }
    }

    /// Send one status batch.
    pub async fn write(&self, status: SolveStatus) {
        let event = StatusEvent { prefix: self.prefix.clone(), status };
        let _ = self.tx.send(event).await;
    }

    /// Open a raw status channel for a backend client.
    ///
    /// Returns the sender to hand to the client and a forwarding task that
    /// completes once the sender (and all its clones) are dropped and every
    /// batch has been relayed.
    pub fn status_channel(&self) -> (mpsc::Sender<SolveStatus>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SolveStatus>(STATUS_BUFFER_SIZE);
        let writer = self.clone();
        let forward = tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                writer.write(status).await;
            }
        });
        (tx, forward)
    }

    /// Run `f` as a named vertex: reports it started, then completed with the
    /// outcome of `f`.
    pub async fn wrap<T, F, Fut>(&self, name: impl Into<String>, f: F) -> Result<T>
    where
        F: FnOnce(SubLogger) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut vertex = Vertex {
            digest: format!("sha256:{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            started: Some(SystemTime::now()),
            completed: None,
            cached: false,
            error: None,
        };
        self.write(SolveStatus { vertexes: vec![vertex.clone()], logs: vec![] }).await;

        let sub = SubLogger { writer: self.clone(), vertex: vertex.digest.clone() };
        let result = f(sub).await;

        vertex.completed = Some(SystemTime::now());
        if let Err(e) = &result {
            vertex.error = Some(e.to_string());
        }
        self.write(SolveStatus { vertexes: vec![vertex], logs: vec![] }).await;
        result
    }
}

/// Logger scoped to one vertex opened by [`ProgressWriter::wrap`].
#[derive(Debug, Clone)]
pub struct SubLogger {
    writer: ProgressWriter,
    vertex: String,
}

impl SubLogger {
    /// Attach raw output to this vertex.
    pub async fn log(&self, stream: u8, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let log = VertexLog { vertex: self.vertex.clone(), stream, data: data.to_vec() };
        self.writer.write(SolveStatus { vertexes: vec![], logs: vec![log] }).await;
    }

    /// Open a nested vertex.
    pub async fn wrap<T, F, Fut>(&self, name: impl Into<String>, f: F) -> Result<T>
    where
        F: FnOnce(SubLogger) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.writer.wrap(name, f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrigError;

    #[tokio::test]
    async fn test_prefix_is_applied() {
        let (pw, mut rx) = channel();
        pw.with_prefix("default linux-builder", true).write(SolveStatus::default()).await;
        pw.with_prefix("ignored", false).write(SolveStatus::default()).await;
        drop(pw);

        assert_eq!(rx.recv().await.unwrap().prefix.as_deref(), Some("default linux-builder"));
        assert_eq!(rx.recv().await.unwrap().prefix, None);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_status_channel_forwards_until_closed() {
        let (pw, mut rx) = channel();
        let (tx, forward) = pw.with_prefix("app", true).status_channel();
        drop(pw);

        tx.send(SolveStatus::default()).await.unwrap();
        drop(tx);
        forward.await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.prefix.as_deref(), Some("app"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_wrap_reports_error() {
        let (pw, mut rx) = channel();
        let result: Result<()> = pw
            .wrap("pulling image", |sub| async move {
                sub.log(STDERR, b"denied").await;
                Err(BrigError::Internal("denied".to_string()))
            })
            .await;
        assert!(result.is_err());
        drop(pw);

        let started = rx.recv().await.unwrap().status;
        assert_eq!(started.vertexes[0].name, "pulling image");
        assert!(started.vertexes[0].completed.is_none());

        let log = rx.recv().await.unwrap().status;
        assert_eq!(log.logs[0].data, b"denied");
        assert_eq!(log.logs[0].vertex, started.vertexes[0].digest);

        let done = rx.recv().await.unwrap().status;
        assert!(done.vertexes[0].completed.is_some());
        assert_eq!(done.vertexes[0].error.as_deref(), Some("Internal error: denied"));
    }

    #[tokio::test]
    async fn test_writes_after_consumer_gone_are_dropped() {
        let (pw, rx) = channel();
        drop(rx);
        pw.write(SolveStatus::default()).await;
    }
}
