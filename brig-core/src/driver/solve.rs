//! Backend-facing request and response shapes.

use crate::platform::Platform;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Exporter response key holding the digest of the produced image.
pub const EXPORTER_IMAGE_DIGEST: &str = "containerimage.digest";

/// A session service exposed to the backend for the duration of a solve
/// (file uploads, registry credentials, secrets, ...).
pub trait Attachable: Send + Sync + fmt::Debug {
    /// Kind of service, e.g. `"upload"` or `"auth"`.
    fn kind(&self) -> &str;

    /// Access to the concrete service for clients that serve it.
    fn as_any(&self) -> &dyn Any;
}

/// Writer receiving an exporter's raw output stream.
///
/// Shared between the per-platform copies of a request; the backend client
/// takes it once when the export starts.
#[derive(Clone)]
pub struct ExportOutput(Arc<parking_lot::Mutex<Option<Pin<Box<dyn AsyncWrite + Send>>>>>);

impl ExportOutput {
    pub fn new(writer: impl AsyncWrite + Send + 'static) -> Self {
        Self(Arc::new(parking_lot::Mutex::new(Some(Box::pin(writer)))))
    }

    /// Take the writer. Returns `None` once taken.
    pub fn take(&self) -> Option<Pin<Box<dyn AsyncWrite + Send>>> {
        self.0.lock().take()
    }
}

impl fmt::Debug for ExportOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let taken = self.0.lock().is_none();
        f.debug_struct("ExportOutput").field("taken", &taken).finish()
    }
}

/// One build output: exporter kind plus its attributes.
#[derive(Debug, Clone, Default)]
pub struct ExportEntry {
    /// Exporter kind: `image`, `oci`, `docker`, `local`, `tar`, ...
    pub kind: String,
    pub attrs: HashMap<String, String>,
    pub output: Option<ExportOutput>,
}

impl ExportEntry {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), attrs: HashMap::new(), output: None }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// Cache import or export entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptionsEntry {
    pub kind: String,
    pub attrs: HashMap<String, String>,
}

impl CacheOptionsEntry {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), attrs: HashMap::new() }
    }
}

/// A solve request ready to submit to a backend.
#[derive(Debug, Clone, Default)]
pub struct SolveRequest {
    pub frontend: String,
    pub frontend_attrs: BTreeMap<String, String>,
    pub local_dirs: BTreeMap<String, PathBuf>,
    pub exports: Vec<ExportEntry>,
    pub cache_exports: Vec<CacheOptionsEntry>,
    pub cache_imports: Vec<CacheOptionsEntry>,
    pub session: Vec<Arc<dyn Attachable>>,
}

/// Result of a successful solve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveResponse {
    pub exporter_response: HashMap<String, String>,
}

impl SolveResponse {
    pub fn image_digest(&self) -> Option<&str> {
        self.exporter_response.get(EXPORTER_IMAGE_DIGEST).map(String::as_str)
    }
}

/// A worker of a running backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: String,
    pub platforms: Vec<Platform>,
}
