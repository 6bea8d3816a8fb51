//! Build orchestration.
//!
//! [`Dispatcher::dispatch`] takes a set of named build requests, resolves
//! which backend serves which platforms ([`resolve_drivers`]), boots the
//! backends it needs, turns each assignment into a [`SolveRequest`] and runs
//! all of them concurrently.
//!
//! [`SolveRequest`]: crate::driver::SolveRequest

mod archive;
mod dispatch;
mod hosts;
mod inputs;
mod loader;
mod reference;
mod resolve;
mod session;

pub use dispatch::Dispatcher;
pub use inputs::{load_inputs, InputsRelease};
pub use loader::{ImageStore, LoadWriter};
pub use reference::validate_tag;
pub use resolve::{resolve_drivers, DriverPair, Resolution};
pub use session::UploadProvider;

use crate::driver::{Attachable, CacheOptionsEntry, ExportEntry};
use crate::platform::Platform;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Context or Dockerfile path meaning "read from the input stream".
pub const STDIN_PATH: &str = "-";

/// A reader handed to the build in place of standard input.
///
/// Clones share the same reader; it can be consumed once.
#[derive(Clone)]
pub struct InputStream(Arc<parking_lot::Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>>);

impl InputStream {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self(Arc::new(parking_lot::Mutex::new(Some(Box::new(reader)))))
    }

    /// The process's standard input.
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }

    /// Take the reader. Returns `None` once consumed.
    pub fn take(&self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.0.lock().take()
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let consumed = self.0.lock().is_none();
        f.debug_struct("InputStream").field("consumed", &consumed).finish()
    }
}

/// Source materials of a build.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    /// Local directory, remote URL, or `-` for the input stream.
    pub context_path: String,
    /// Dockerfile path; empty for `<context>/Dockerfile`, `-` for the input stream.
    pub dockerfile_path: String,
    pub in_stream: Option<InputStream>,
}

impl Inputs {
    pub fn new(context_path: impl Into<String>) -> Self {
        Self { context_path: context_path.into(), ..Default::default() }
    }
}

/// One named build request.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub inputs: Inputs,
    /// Target platforms. Empty means the backend's default platform.
    pub platforms: Vec<Platform>,
    pub tags: Vec<String>,
    pub labels: HashMap<String, String>,
    pub build_args: HashMap<String, String>,
    /// Target stage.
    pub target: Option<String>,
    /// Always pull referenced images.
    pub pull: bool,
    pub no_cache: bool,
    /// One of `""`, `default`, `host`, `none`.
    pub network_mode: String,
    /// `host:ip` entries.
    pub extra_hosts: Vec<String>,
    pub exports: Vec<ExportEntry>,
    pub cache_from: Vec<CacheOptionsEntry>,
    pub cache_to: Vec<CacheOptionsEntry>,
    pub session: Vec<Arc<dyn Attachable>>,
    /// File receiving the image digest after a successful build.
    pub image_id_file: Option<PathBuf>,
}
