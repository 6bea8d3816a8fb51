//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use brig_core::driver::container::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerState, ExecSession, OutputChunk,
    OutputStream,
};
use brig_core::driver::{
    BuildClient, DriverFeatures, DriverInfo, DriverStatus, SolveRequest, SolveResponse, WorkerInfo,
    EXPORTER_IMAGE_DIGEST,
};
use brig_core::build::ImageStore;
use brig_core::progress::{SolveStatus, Vertex};
use brig_core::{BrigError, Driver, Platform, ProgressWriter, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Body a [`MockClient`] writes into every export output it receives.
pub const EXPORTED_IMAGE: &[u8] = b"image tarball";

pub fn all_features() -> DriverFeatures {
    DriverFeatures {
        oci_exporter: true,
        docker_exporter: true,
        cache_export: true,
        multi_platform: true,
    }
}

/// How a mock answers a solve or a boot.
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    #[default]
    Succeed,
    Fail(String),
    /// Never return; records when the pending call is dropped.
    Hang,
}

/// Backend client that records every solve request.
#[derive(Default)]
pub struct MockClient {
    pub requests: Mutex<Vec<SolveRequest>>,
    pub workers: Vec<WorkerInfo>,
    pub digest: String,
    pub behavior: Behavior,
    pub dropped: Arc<AtomicBool>,
}

impl MockClient {
    pub fn new(digest: &str) -> Self {
        Self { digest: digest.to_string(), ..Default::default() }
    }

    pub fn with_workers(mut self, platforms: Vec<Platform>) -> Self {
        self.workers = vec![WorkerInfo { id: "worker0".to_string(), platforms }];
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn requests(&self) -> Vec<SolveRequest> {
        self.requests.lock().clone()
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BuildClient for MockClient {
    async fn solve(
        &self,
        request: SolveRequest,
        status: tokio::sync::mpsc::Sender<SolveStatus>,
    ) -> Result<SolveResponse> {
        self.requests.lock().push(request.clone());
        let vertex = Vertex {
            digest: "sha256:step".to_string(),
            name: "[1/1] FROM scratch".to_string(),
            started: None,
            completed: None,
            cached: true,
            error: None,
        };
        let _ = status.send(SolveStatus { vertexes: vec![vertex], logs: vec![] }).await;

        match &self.behavior {
            Behavior::Succeed => {
                for output in request.exports.iter().filter_map(|e| e.output.as_ref()) {
                    if let Some(mut writer) = output.take() {
                        writer.write_all(EXPORTED_IMAGE).await.map_err(BrigError::Io)?;
                        writer.shutdown().await.map_err(BrigError::Io)?;
                    }
                }
                let mut exporter_response = HashMap::new();
                exporter_response.insert(EXPORTER_IMAGE_DIGEST.to_string(), self.digest.clone());
                Ok(SolveResponse { exporter_response })
            }
            Behavior::Fail(reason) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(BrigError::Internal(reason.clone()))
            }
            Behavior::Hang => {
                let _flag = DropFlag(self.dropped.clone());
                futures::future::pending().await
            }
        }
    }

    async fn list_workers(&self) -> Result<Vec<WorkerInfo>> {
        Ok(self.workers.clone())
    }
}

/// Driver whose backend "boots" instantly and counts how often it did.
pub struct MockDriver {
    pub boots: AtomicUsize,
    pub running: AtomicBool,
    pub client: Arc<MockClient>,
    pub features: DriverFeatures,
    pub boot: Behavior,
    pub boot_dropped: Arc<AtomicBool>,
}

impl MockDriver {
    pub fn new(client: MockClient) -> Self {
        Self {
            boots: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            client: Arc::new(client),
            features: all_features(),
            boot: Behavior::Succeed,
            boot_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_boot(mut self, boot: Behavior) -> Self {
        self.boot = boot;
        self
    }

    pub fn with_features(mut self, features: DriverFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn boots(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn factory_name(&self) -> &str {
        "mock"
    }

    async fn bootstrap(&self, progress: &ProgressWriter) -> Result<()> {
        progress
            .wrap("[internal] booting buildkit", |_| async {
                self.boots.fetch_add(1, Ordering::SeqCst);
                match &self.boot {
                    Behavior::Succeed => {}
                    Behavior::Fail(reason) => {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        return Err(BrigError::Internal(reason.clone()));
                    }
                    Behavior::Hang => {
                        let _flag = DropFlag(self.boot_dropped.clone());
                        futures::future::pending::<()>().await;
                    }
                }
                self.running.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
    }

    async fn status(&self) -> Result<DriverStatus> {
        if self.running.load(Ordering::SeqCst) {
            Ok(DriverStatus::Running)
        } else {
            Ok(DriverStatus::Inactive)
        }
    }

    async fn stop(&self, _force: bool) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rm(&self, _force: bool, _rm_volume: bool) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn client(&self) -> Result<Arc<dyn BuildClient>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(BrigError::DriverNotRunning { driver: "mock".to_string() });
        }
        Ok(self.client.clone())
    }

    fn features(&self) -> DriverFeatures {
        self.features
    }
}

/// A node backed by `driver`, advertising `platforms`.
pub fn node(name: &str, driver: &Arc<MockDriver>, platforms: Vec<Platform>) -> DriverInfo {
    DriverInfo::new(name, driver.clone()).with_platforms(platforms)
}

/// Image store that keeps every byte it is asked to load.
#[derive(Default)]
pub struct MockImageStore {
    pub loaded: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl ImageStore for MockImageStore {
    async fn load_image(
        &self,
        mut input: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let loaded = self.loaded.clone();
        let lines = futures::stream::once(async move {
            let mut buf = [0u8; 1024];
            loop {
                let n = input.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                loaded.lock().extend_from_slice(&buf[..n]);
            }
            Ok::<_, BrigError>("Loaded image".to_string())
        });
        Ok(lines.boxed())
    }
}

/// Poll `check` for up to a second.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Recorded calls of a [`MockEngine`].
#[derive(Debug, Default)]
pub struct EngineCalls {
    pub pulls: usize,
    pub creates: Vec<ContainerSpec>,
    pub starts: usize,
    pub stops: usize,
    pub removed_containers: Vec<String>,
    pub removed_volumes: Vec<String>,
    pub execs: Vec<Vec<String>>,
}

/// In-memory container engine.
pub struct MockEngine {
    pub calls: Mutex<EngineCalls>,
    pub container: Mutex<Option<ContainerDetails>>,
    /// Readiness probes fail until this many have been attempted.
    pub probe_failures: AtomicUsize,
    pub probes: AtomicUsize,
    pub pull_fails: bool,
    pub local_images: Vec<String>,
    pub logs: Vec<u8>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            calls: Mutex::new(EngineCalls::default()),
            container: Mutex::new(None),
            probe_failures: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            pull_fails: false,
            local_images: Vec::new(),
            logs: b"buildkitd: listening\n".to_vec(),
        }
    }
}

impl MockEngine {
    pub fn with_container(self, state: ContainerState, volumes: Vec<String>) -> Self {
        *self.container.lock() = Some(ContainerDetails { state, volumes });
        self
    }

    pub fn failing_probes(self, n: usize) -> Self {
        self.probe_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn state(&self) -> Option<ContainerState> {
        self.container.lock().as_ref().map(|c| c.state)
    }

    fn set_state(&self, state: ContainerState) {
        if let Some(c) = self.container.lock().as_mut() {
            c.state = state;
        }
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn inspect_container(&self, _name: &str) -> Result<Option<ContainerDetails>> {
        Ok(self.container.lock().clone())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.calls.lock().pulls += 1;
        if self.pull_fails {
            return Err(BrigError::ImagePullFailed {
                image: image.to_string(),
                reason: "offline".to_string(),
            });
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.local_images.iter().any(|i| i == image))
    }

    async fn cgroup_driver(&self) -> Result<Option<String>> {
        Ok(Some("systemd".to_string()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let volumes = spec.volumes.iter().map(|v| v.source.clone()).collect();
        *self.container.lock() = Some(ContainerDetails { state: ContainerState::Created, volumes });
        self.calls.lock().creates.push(spec.clone());
        Ok(())
    }

    async fn start_container(&self, _name: &str) -> Result<()> {
        self.calls.lock().starts += 1;
        self.set_state(ContainerState::Running);
        Ok(())
    }

    async fn stop_container(&self, _name: &str) -> Result<()> {
        self.calls.lock().stops += 1;
        self.set_state(ContainerState::Stopped);
        Ok(())
    }

    async fn remove_container(&self, name: &str, _force: bool) -> Result<()> {
        self.calls.lock().removed_containers.push(name.to_string());
        *self.container.lock() = None;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.calls.lock().removed_volumes.push(name.to_string());
        Ok(())
    }

    async fn exec(&self, _container: &str, cmd: &[String]) -> Result<ExecSession> {
        self.calls.lock().execs.push(cmd.to_vec());
        let attempt = self.probes.fetch_add(1, Ordering::SeqCst);
        let (id, chunk) = if attempt < self.probe_failures.load(Ordering::SeqCst) {
            ("exec-fail", OutputChunk::Stderr(Bytes::from_static(b"connection refused\n")))
        } else {
            ("exec-ok", OutputChunk::Stdout(Bytes::from_static(b"ID  PLATFORMS\n")))
        };
        let chunks = vec![Ok(chunk)];
        Ok(ExecSession {
            id: id.to_string(),
            output: futures::stream::iter(chunks).boxed(),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        Ok(Some(if exec_id == "exec-fail" { 1 } else { 0 }))
    }

    async fn logs(&self, _container: &str) -> Result<OutputStream> {
        let chunk = OutputChunk::Stderr(Bytes::from(self.logs.clone()));
        Ok(futures::stream::iter(vec![Ok(chunk)]).boxed())
    }
}
