//! Managed BuildKit container driver.
//!
//! Runs BuildKit inside a privileged container on a Docker engine. The
//! container keeps its state on a named volume, so removing and recreating
//! the container preserves the build cache unless the volume is removed too.
//!
//! # Lifecycle
//!
//! ```text
//! absent ──bootstrap──► running ──stop──► stopped
//!   ▲                      │                 │
//!   └────────rm────────────┴──────rm─────────┘
//! ```
//!
//! Bootstrapping an existing container only starts it and waits for
//! readiness, so [`Driver::bootstrap`] is safe to call repeatedly.

pub mod demux;
pub mod docker;
pub mod engine;
mod options;

pub use demux::{DemuxConn, DiagnosticSink};
pub use docker::DockerEngine;
pub use engine::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerState, ExecSession, OutputChunk,
    OutputStream, VolumeMount,
};
pub use options::DriverOptions;

use super::{BuildClient, ClientConnector, Driver, DriverFeatures, DriverStatus};
use crate::error::{BrigError, Result};
use crate::progress::{ProgressWriter, SubLogger, STDERR, STDOUT};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Image used when no `image` option is given.
pub const DEFAULT_IMAGE: &str = "moby/buildkit:buildx-stable-1";

/// BuildKit state directory inside the container.
pub const STATE_DIR: &str = "/var/lib/buildkit";

/// Cgroup parent of backend containers on cgroupfs hosts.
pub const DEFAULT_CGROUP_PARENT: &str = "/docker/brig";

const CONTAINER_PREFIX: &str = "brig_buildkit_";
const VOLUME_STATE_SUFFIX: &str = "_state";
const FACTORY_NAME: &str = "docker-container";

/// Readiness probing schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    /// Attempt `n` is followed by a sleep of `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self { max_attempts: 15, backoff_unit: Duration::from_millis(120) }
    }
}

/// Output of a finished exec.
#[derive(Debug, Default)]
struct RunOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// BuildKit running in a container on a Docker engine.
pub struct DockerContainerDriver {
    name: String,
    engine: Arc<dyn ContainerEngine>,
    connector: Option<Arc<dyn ClientConnector>>,
    options: DriverOptions,
    flags: Vec<String>,
    readiness: ReadinessPolicy,
    diagnostics: DiagnosticSink,
}

impl DockerContainerDriver {
    /// Driver for builder node `name`.
    pub fn new(
        name: impl Into<String>,
        engine: Arc<dyn ContainerEngine>,
        options: DriverOptions,
    ) -> Self {
        let name = name.into();
        let diagnostics = demux::log_sink(format!("{}{}", CONTAINER_PREFIX, name));
        Self {
            name,
            engine,
            connector: None,
            options,
            flags: Vec::new(),
            readiness: ReadinessPolicy::default(),
            diagnostics,
        }
    }

    /// Connector turning the control channel into a [`BuildClient`].
    /// Required for [`Driver::client`].
    pub fn with_connector(mut self, connector: Arc<dyn ClientConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Extra `buildkitd` flags passed as the container command.
    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn container_name(&self) -> String {
        format!("{}{}", CONTAINER_PREFIX, self.name)
    }

    pub fn state_volume(&self) -> String {
        format!("{}{}", self.container_name(), VOLUME_STATE_SUFFIX)
    }

    pub fn image(&self) -> &str {
        self.options.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    async fn create(&self, sub: &SubLogger) -> Result<()> {
        let image = self.image().to_string();
        let pulled = sub
            .wrap(format!("pulling image {}", image), |_| self.engine.pull_image(&image))
            .await;
        if let Err(pull_err) = pulled {
            match self.engine.image_exists(&image).await {
                Ok(true) => {
                    warn!(image = %image, error = %pull_err, "Pull failed, using local image");
                    sub.wrap(format!("pulling failed, using local image {}", image), |_| async {
                        Ok(())
                    })
                    .await?;
                }
                _ => return Err(pull_err),
            }
        }

        let container = self.container_name();
        sub.wrap(format!("creating container {}", container), |_| async {
            let spec = self.container_spec(&image).await;
            self.engine.create_container(&spec).await?;
            self.engine.start_container(&container).await
        })
        .await?;

        self.wait(sub).await
    }

    async fn container_spec(&self, image: &str) -> ContainerSpec {
        let cgroup_parent = match &self.options.cgroup_parent {
            Some(parent) => Some(parent.clone()),
            None => match self.engine.cgroup_driver().await {
                Ok(Some(driver)) if driver == "cgroupfs" => Some(DEFAULT_CGROUP_PARENT.to_string()),
                Ok(_) => None,
                Err(e) => {
                    debug!(error = %e, "Could not determine cgroup driver");
                    None
                }
            },
        };

        ContainerSpec {
            name: self.container_name(),
            image: image.to_string(),
            env: self.options.env.clone(),
            cmd: if self.flags.is_empty() { None } else { Some(self.flags.clone()) },
            privileged: true,
            userns_mode: Some("host".to_string()),
            volumes: vec![VolumeMount {
                source: self.state_volume(),
                target: STATE_DIR.to_string(),
            }],
            network_mode: self.options.network.clone(),
            cgroup_parent,
        }
    }

    /// Probe until BuildKit answers or the attempts run out.
    async fn wait(&self, sub: &SubLogger) -> Result<()> {
        let probe = probe_command();
        let mut attempt = 1;
        loop {
            let mut out = RunOutput::default();
            match self.run(&probe, &mut out).await {
                Ok(()) => {
                    debug!(attempts = attempt, "BuildKit ready");
                    return Ok(());
                }
                Err(e) if attempt >= self.readiness.max_attempts => {
                    warn!(attempts = attempt, error = %e, "BuildKit did not become ready");
                    self.copy_logs(sub).await;
                    sub.log(STDOUT, &out.stdout).await;
                    sub.log(STDERR, &out.stderr).await;
                    return Err(e);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Readiness probe failed");
                    metrics::counter!("brig_readiness_retries_total", "driver" => FACTORY_NAME)
                        .increment(1);
                    tokio::time::sleep(self.readiness.backoff_unit * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Relay the container's log to the progress vertex. Best effort.
    async fn copy_logs(&self, sub: &SubLogger) {
        let mut logs = match self.engine.logs(&self.container_name()).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(error = %e, "Could not read container logs");
                return;
            }
        };
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(OutputChunk::Stdout(data)) => sub.log(STDOUT, &data).await,
                Ok(OutputChunk::Stderr(data)) => sub.log(STDERR, &data).await,
                Err(e) => {
                    warn!(error = %e, "Container log stream failed");
                    return;
                }
            }
        }
    }

    /// Run a command in the container to completion.
    async fn run(&self, cmd: &[String], out: &mut RunOutput) -> Result<()> {
        let session = self.engine.exec(&self.container_name(), cmd).await?;
        if session.id.is_empty() {
            return Err(BrigError::EmptyExecId);
        }
        drop(session.input);
        demux::collect_output(session.output, &mut out.stdout, &mut out.stderr).await?;

        match self.engine.exec_exit_code(&session.id).await? {
            Some(code) if code != 0 => Err(BrigError::ExecExitCode { code }),
            _ => Ok(()),
        }
    }
}

fn probe_command() -> Vec<String> {
    vec!["buildctl".to_string(), "debug".to_string(), "workers".to_string()]
}

fn dial_command() -> Vec<String> {
    vec!["buildctl".to_string(), "dial-stdio".to_string()]
}

#[async_trait]
impl Driver for DockerContainerDriver {
    fn factory_name(&self) -> &str {
        FACTORY_NAME
    }

    #[instrument(skip(self, progress), fields(container = %self.container_name()))]
    async fn bootstrap(&self, progress: &ProgressWriter) -> Result<()> {
        progress
            .wrap("[internal] booting buildkit", |sub| async move {
                match self.engine.inspect_container(&self.container_name()).await? {
                    None => {
                        info!("Creating BuildKit container");
                        self.create(&sub).await
                    }
                    Some(_) => {
                        let container = self.container_name();
                        sub.wrap(format!("starting container {}", container), |_| {
                            self.engine.start_container(&container)
                        })
                        .await?;
                        self.wait(&sub).await
                    }
                }
            })
            .await
    }

    async fn status(&self) -> Result<DriverStatus> {
        let status = match self.engine.inspect_container(&self.container_name()).await? {
            None => DriverStatus::Inactive,
            Some(details) => match details.state {
                ContainerState::Created => DriverStatus::Created,
                ContainerState::Running => DriverStatus::Running,
                ContainerState::Stopped => DriverStatus::Stopped,
            },
        };
        Ok(status)
    }

    #[instrument(skip(self), fields(container = %self.container_name()))]
    async fn stop(&self, _force: bool) -> Result<()> {
        if self.status().await? != DriverStatus::Running {
            debug!("Container not running, nothing to stop");
            return Ok(());
        }
        self.engine.stop_container(&self.container_name()).await?;
        info!("Container stopped");
        Ok(())
    }

    #[instrument(skip(self), fields(container = %self.container_name()))]
    async fn rm(&self, force: bool, rm_volume: bool) -> Result<()> {
        let container = self.container_name();
        let details = match self.engine.inspect_container(&container).await? {
            Some(details) => details,
            None => return Ok(()),
        };

        self.engine.remove_container(&container, force).await?;
        info!("Container removed");

        let volume = self.state_volume();
        if rm_volume && details.volumes.iter().any(|v| *v == volume) {
            self.engine.remove_volume(&volume).await?;
            info!(volume = %volume, "State volume removed");
        }
        Ok(())
    }

    async fn client(&self) -> Result<Arc<dyn BuildClient>> {
        let container = self.container_name();
        if self.status().await? != DriverStatus::Running {
            return Err(BrigError::DriverNotRunning { driver: container });
        }
        let connector = self.connector.as_ref().ok_or_else(|| BrigError::InvalidConfig {
            reason: "no BuildKit client connector configured".to_string(),
        })?;

        let session = self.engine.exec(&container, &dial_command()).await?;
        if session.id.is_empty() {
            return Err(BrigError::EmptyExecId);
        }
        let conn = DemuxConn::new(session.output, session.input, self.diagnostics.clone());
        connector.connect(Box::new(conn)).await
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures {
            oci_exporter: true,
            docker_exporter: true,
            cache_export: true,
            multi_platform: true,
        }
    }
}
