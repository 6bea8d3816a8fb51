//! Container engine abstraction used by the container driver.
//!
//! The driver only ever talks to the engine through [`ContainerEngine`], which
//! keeps the lifecycle logic independent of the Docker API client and lets
//! tests drive it with an in-memory engine.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// One chunk of demultiplexed container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// Output of an exec session or of a container's log.
pub type OutputStream = BoxStream<'static, Result<OutputChunk>>;

/// An attached exec session.
pub struct ExecSession {
    pub id: String,
    pub output: OutputStream,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Runtime state of an existing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
}

/// What the driver needs to know about an existing container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub state: ContainerState,
    /// Names of the named volumes mounted into the container.
    pub volumes: Vec<String>,
}

/// Named volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
}

/// Everything needed to create the backend container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub privileged: bool,
    pub userns_mode: Option<String>,
    pub volumes: Vec<VolumeMount>,
    pub network_mode: Option<String>,
    pub cgroup_parent: Option<String>,
}

/// Container engine operations.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Inspect a container. `Ok(None)` when it does not exist.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerDetails>>;

    /// Pull an image from its registry.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Whether the image is present in the local image store.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Cgroup driver of the engine host (`cgroupfs`, `systemd`), if known.
    async fn cgroup_driver(&self) -> Result<Option<String>>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    /// Start a container. Starting a running container is not an error.
    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    /// Remove a container together with its anonymous volumes.
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Create an exec session with stdin, stdout and stderr attached.
    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecSession>;

    /// Exit code of a finished exec session.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Recent container output, both streams.
    async fn logs(&self, container: &str) -> Result<OutputStream>;
}
