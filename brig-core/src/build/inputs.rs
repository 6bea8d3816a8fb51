//! Context loading: turns build [`Inputs`] into solve request fields.
//!
//! | context        | dockerfile      | result                                         |
//! |----------------|-----------------|------------------------------------------------|
//! | `-` (archive)  | empty           | upload session, `context` = session URL         |
//! | `-` (text)     | empty           | text is the Dockerfile, empty temp dir context  |
//! | local dir      | empty/path/`-`  | `context` bound, Dockerfile dir bound           |
//! | git/URL        | empty/path      | `context` = URL                                 |

use super::archive::{is_archive, ARCHIVE_HEADER_SIZE};
use super::session::UploadProvider;
use super::{InputStream, Inputs, STDIN_PATH};
use crate::driver::SolveRequest;
use crate::error::{BrigError, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Temporary resources created while loading inputs.
///
/// Dropping it deletes every temporary directory.
#[derive(Debug, Default)]
pub struct InputsRelease {
    temp_dirs: Vec<TempDir>,
}

impl InputsRelease {
    pub fn temp_dirs(&self) -> Vec<&Path> {
        self.temp_dirs.iter().map(|d| d.path()).collect()
    }
}

/// Piped input saved to disk so every backend share of a request can load it.
///
/// The input stream can be taken once; a request split across backends
/// replays the saved copy instead.
#[derive(Debug)]
pub struct SpooledStream {
    dir: TempDir,
    path: PathBuf,
}

impl SpooledStream {
    /// Whether loading `inputs` consumes the input stream.
    pub fn needed(inputs: &Inputs) -> bool {
        inputs.context_path == STDIN_PATH || inputs.dockerfile_path == STDIN_PATH
    }

    /// Drain the input stream of `inputs` into a temporary file.
    pub async fn capture(inputs: &Inputs) -> Result<Self> {
        let mut reader = take_stream(inputs)?;
        let dir = temp_dir("stdin")?;
        let path = dir.path().join("stdin");
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| BrigError::IoError { path: path.clone(), source: e })?;
        let size = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| BrigError::IoError { path: path.clone(), source: e })?;
        file.flush().await.map_err(|e| BrigError::IoError { path: path.clone(), source: e })?;
        debug!(bytes = size, "Spooled piped input");
        Ok(Self { dir, path })
    }

    /// A copy of `inputs` reading the saved stream from the start.
    pub async fn replay(&self, inputs: &Inputs) -> Result<Inputs> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| BrigError::IoError { path: self.path.clone(), source: e })?;
        Ok(Inputs { in_stream: Some(InputStream::new(file)), ..inputs.clone() })
    }

    /// Hand the spool file's lifetime to a release handle.
    pub fn into_release(self) -> InputsRelease {
        InputsRelease { temp_dirs: vec![self.dir] }
    }
}

/// Resolve `inputs` into `target`'s context, Dockerfile and session fields.
pub async fn load_inputs(inputs: &Inputs, target: &mut SolveRequest) -> Result<InputsRelease> {
    if inputs.context_path.is_empty() {
        return Err(BrigError::MissingContext);
    }

    let mut release = InputsRelease::default();
    let mut dockerfile_reader: Option<BoxedReader> = None;
    let mut dockerfile_dir: Option<PathBuf> = None;
    let mut dockerfile_name = match inputs.dockerfile_path.as_str() {
        STDIN_PATH => String::new(),
        path => path.to_string(),
    };
    let context = inputs.context_path.as_str();

    if context == STDIN_PATH {
        if inputs.dockerfile_path == STDIN_PATH {
            return Err(BrigError::StdinConflict);
        }

        let mut stream = take_stream(inputs)?;
        let mut header = Vec::with_capacity(ARCHIVE_HEADER_SIZE * 2);
        (&mut stream)
            .take((ARCHIVE_HEADER_SIZE * 2) as u64)
            .read_to_end(&mut header)
            .await
            .map_err(|e| BrigError::Io(e).wrap("failed to peek context header from stdin"))?;

        let archive = is_archive(&header);
        let reader: BoxedReader = Box::new(Cursor::new(header).chain(stream));

        if archive {
            let upload = Arc::new(UploadProvider::new());
            let url = upload.add(reader);
            target.frontend_attrs.insert("context".to_string(), url);
            target.session.push(upload);
        } else {
            if !inputs.dockerfile_path.is_empty() {
                return Err(BrigError::DockerfileConflict);
            }
            let empty = temp_dir("empty-dir")?;
            target.local_dirs.insert("context".to_string(), empty.path().to_path_buf());
            release.temp_dirs.push(empty);
            dockerfile_reader = Some(reader);
        }
    } else if is_local_dir(context).await {
        target.local_dirs.insert("context".to_string(), PathBuf::from(context));
        match inputs.dockerfile_path.as_str() {
            STDIN_PATH => dockerfile_reader = Some(take_stream(inputs)?),
            "" => dockerfile_dir = Some(PathBuf::from(context)),
            path => {
                let path = Path::new(path);
                dockerfile_dir = Some(match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                });
                dockerfile_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
            }
        }
    } else if is_git_url(context) || is_url(context) {
        if inputs.dockerfile_path == STDIN_PATH {
            return Err(BrigError::RemoteContextStdin);
        }
        target.frontend_attrs.insert("context".to_string(), context.to_string());
    } else {
        return Err(BrigError::ContextNotFound { path: context.to_string() });
    }

    if let Some(reader) = dockerfile_reader {
        let dir = write_temp_dockerfile(reader).await?;
        dockerfile_dir = Some(dir.path().to_path_buf());
        release.temp_dirs.push(dir);
    }

    if dockerfile_name.is_empty() {
        dockerfile_name = DEFAULT_DOCKERFILE.to_string();
    }
    target.frontend_attrs.insert("filename".to_string(), dockerfile_name);

    if let Some(dir) = dockerfile_dir {
        target.local_dirs.insert("dockerfile".to_string(), dir);
    }

    Ok(release)
}

fn take_stream(inputs: &Inputs) -> Result<BoxedReader> {
    inputs.in_stream.as_ref().and_then(|s| s.take()).ok_or(BrigError::StdinUnavailable)
}

fn temp_dir(prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| BrigError::Io(e).wrap("creating temporary directory"))
}

async fn write_temp_dockerfile(mut reader: BoxedReader) -> Result<TempDir> {
    let dir = temp_dir("dockerfile")?;
    let path = dir.path().join(DEFAULT_DOCKERFILE);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| BrigError::IoError { path: path.clone(), source: e })?;
    tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| BrigError::IoError { path: path.clone(), source: e })?;
    file.flush().await.map_err(|e| BrigError::IoError { path, source: e })?;
    Ok(dir)
}

async fn is_local_dir(path: &str) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn is_git_url(s: &str) -> bool {
    if is_url(s) && s.ends_with(".git") {
        return true;
    }
    ["git://", "github.com/", "git@"].iter().any(|prefix| s.starts_with(prefix))
}
