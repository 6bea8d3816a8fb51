use crate::driver::Attachable;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tokio::io::AsyncRead;

const UPLOAD_URL_PREFIX: &str = "http://buildkit-session/";

/// Session service that serves piped build contexts to the backend.
///
/// Each added reader gets a session URL that the frontend fetches as its
/// remote context.
#[derive(Default)]
pub struct UploadProvider {
    uploads: parking_lot::Mutex<HashMap<String, Box<dyn AsyncRead + Send + Unpin>>>,
}

impl UploadProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader and return the URL it is served under.
    pub fn add(&self, reader: Box<dyn AsyncRead + Send + Unpin>) -> String {
        let url = format!("{}{}", UPLOAD_URL_PREFIX, uuid::Uuid::new_v4().simple());
        self.uploads.lock().insert(url.clone(), reader);
        url
    }

    /// Hand out the reader registered under `url`. Each upload is served once.
    pub fn take(&self, url: &str) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.uploads.lock().remove(url)
    }

    pub fn len(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Attachable for UploadProvider {
    fn kind(&self) -> &str {
        "upload"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for UploadProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<String> = self.uploads.lock().keys().cloned().collect();
        f.debug_struct("UploadProvider").field("uploads", &urls).finish()
    }
}
