//! Docker Engine API implementation of [`ContainerEngine`] and
//! [`ImageStore`], backed by bollard.

use super::engine::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerState, ExecSession, OutputChunk,
    OutputStream,
};
use crate::build::ImageStore;
use crate::error::{BrigError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ImportImageOptions};
use bollard::models::{
    ContainerStateStatusEnum, HostConfig, Mount, MountTypeEnum, SystemInfoCgroupDriverEnum,
};
use bollard::volume::RemoveVolumeOptions;
use bollard::Docker;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Docker Engine client.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BrigError::engine("connect", "docker", e))?;
        Ok(Self { docker })
    }
}

fn is_status(err: &DockerError, code: u16) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn log_chunk(
    item: std::result::Result<LogOutput, DockerError>,
    target: &str,
) -> Result<OutputChunk> {
    match item {
        Ok(LogOutput::StdErr { message }) => Ok(OutputChunk::Stderr(message)),
        Ok(LogOutput::StdOut { message })
        | Ok(LogOutput::Console { message })
        | Ok(LogOutput::StdIn { message }) => Ok(OutputChunk::Stdout(message)),
        Err(e) => Err(BrigError::engine("read output", target, e)),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerDetails>> {
        let inspected = self.docker.inspect_container(name, None::<InspectContainerOptions>).await;
        let info = match inspected {
            Ok(info) => info,
            Err(e) if is_status(&e, 404) => return Ok(None),
            Err(e) => return Err(BrigError::engine("inspect container", name, e)),
        };

        let status = info.state.as_ref().and_then(|s| s.status);
        let state = match status {
            Some(ContainerStateStatusEnum::RUNNING)
            | Some(ContainerStateStatusEnum::RESTARTING)
            | Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Running,
            Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
            _ => ContainerState::Stopped,
        };
        let volumes = info
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.name)
            .collect();

        Ok(Some(ContainerDetails { state, volumes }))
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions { from_image: image, ..Default::default() };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            let progress = progress.map_err(|e| BrigError::ImagePullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(status) = progress.status {
                debug!(image = %image, "{}", status);
            }
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(BrigError::engine("inspect image", image, e)),
        }
    }

    async fn cgroup_driver(&self) -> Result<Option<String>> {
        let info = self.docker.info().await.map_err(|e| BrigError::engine("info", "docker", e))?;
        let driver = match info.cgroup_driver {
            Some(SystemInfoCgroupDriverEnum::CGROUPFS) => Some("cgroupfs".to_string()),
            Some(SystemInfoCgroupDriverEnum::SYSTEMD) => Some("systemd".to_string()),
            _ => None,
        };
        Ok(driver)
    }

    #[instrument(skip(self, spec), fields(container = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let mounts = spec
            .volumes
            .iter()
            .map(|v| Mount {
                typ: Some(MountTypeEnum::VOLUME),
                source: Some(v.source.clone()),
                target: Some(v.target.clone()),
                ..Default::default()
            })
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            cmd: spec.cmd.clone(),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                userns_mode: spec.userns_mode.clone(),
                mounts: Some(mounts),
                network_mode: spec.network_mode.clone(),
                cgroup_parent: spec.cgroup_parent.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions { name: spec.name.clone(), platform: None };

        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| BrigError::engine("create container", &spec.name, e))?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        match self.docker.start_container(name, None::<StartContainerOptions<String>>).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) => Err(BrigError::engine("start container", name, e)),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        match self.docker.stop_container(name, None::<StopContainerOptions>).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) => Err(BrigError::engine("stop container", name, e)),
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions { v: true, force, ..Default::default() };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| BrigError::engine("remove container", name, e))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
            .map_err(|e| BrigError::engine("remove volume", name, e))
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecSession> {
        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| BrigError::engine("create exec", container, e))?;

        let started = self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| BrigError::engine("attach exec", container, e))?;

        match started {
            StartExecResults::Attached { output, input } => {
                let target = container.to_string();
                let output = output.map(move |item| log_chunk(item, &target)).boxed();
                Ok(ExecSession { id: created.id, output, input })
            }
            StartExecResults::Detached => Err(BrigError::engine(
                "attach exec",
                container,
                "exec started detached",
            )),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| BrigError::engine("inspect exec", exec_id, e))?;
        Ok(inspect.exit_code)
    }

    async fn logs(&self, container: &str) -> Result<OutputStream> {
        let options = LogsOptions::<String> { stdout: true, stderr: true, ..Default::default() };
        let target = container.to_string();
        let logs = self
            .docker
            .logs(container, Some(options))
            .map(move |item| log_chunk(item, &target))
            .boxed();
        Ok(logs)
    }
}

#[async_trait]
impl ImageStore for DockerEngine {
    async fn load_image(
        &self,
        input: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        // The engine reads the archive as it arrives; a read error ends the
        // upload and the engine reports the truncated archive.
        let archive = ReaderStream::new(input)
            .take_while(|chunk| {
                if let Err(e) = chunk {
                    warn!(error = %e, "Image archive stream failed");
                }
                futures::future::ready(chunk.is_ok())
            })
            .filter_map(|chunk| futures::future::ready(chunk.ok()));

        let progress = self
            .docker
            .import_image_stream(ImportImageOptions { quiet: false }, archive, None)
            .map_err(|e| BrigError::engine("load image", "docker", e))
            .and_then(|info| async move {
                if let Some(error) = info.error {
                    return Err(BrigError::engine("load image", "docker", error));
                }
                Ok(info.stream.or(info.status).unwrap_or_default())
            })
            .boxed();
        Ok(progress)
    }
}
