//! Build backend ("driver") abstraction.
//!
//! A driver manages one BuildKit instance and hands out a [`BuildClient`]
//! for it once it is running. brig ships the managed container driver
//! ([`container::DockerContainerDriver`]); other drivers plug in through the
//! [`Driver`] trait.

pub mod container;
mod solve;

pub use solve::{
    Attachable, CacheOptionsEntry, ExportEntry, ExportOutput, SolveRequest, SolveResponse,
    WorkerInfo, EXPORTER_IMAGE_DIGEST,
};

use crate::error::{BrigError, Result};
use crate::platform::Platform;
use crate::progress::{ProgressWriter, SolveStatus};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info, instrument};

/// How many times [`boot`] tries to bring a driver up before giving up.
const BOOT_ATTEMPTS: u32 = 2;

/// Optional build features a driver may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    OciExporter,
    DockerExporter,
    CacheExport,
    MultiPlatform,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::OciExporter => "OCI exporter",
            Feature::DockerExporter => "Docker exporter",
            Feature::CacheExport => "cache export",
            Feature::MultiPlatform => "multiple platforms",
        };
        f.write_str(name)
    }
}

/// Features a driver supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverFeatures {
    pub oci_exporter: bool,
    pub docker_exporter: bool,
    pub cache_export: bool,
    pub multi_platform: bool,
}

/// Observed state of a driver's backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Backend does not exist.
    Inactive,
    /// Backend exists but was never started.
    Created,
    Running,
    Stopped,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverStatus::Inactive => "inactive",
            DriverStatus::Created => "created",
            DriverStatus::Running => "running",
            DriverStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Client for a running BuildKit instance.
///
/// The BuildKit wire protocol lives behind this trait; brig only prepares
/// requests and consumes results.
#[async_trait]
pub trait BuildClient: Send + Sync {
    /// Submit a solve request. Progress batches go to `status` until the call
    /// returns; the sender is dropped on return.
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolveResponse>;

    /// List the workers of this instance and the platforms they can build.
    async fn list_workers(&self) -> Result<Vec<WorkerInfo>>;
}

/// Duplex byte stream carrying the BuildKit control protocol.
pub trait ControlStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ControlStream for T {}

/// Turns a raw control connection into a [`BuildClient`].
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, conn: Box<dyn ControlStream>) -> Result<Arc<dyn BuildClient>>;
}

/// Driver trait.
///
/// All backend integrations must implement this trait.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Name of the driver kind (for messages and metrics).
    fn factory_name(&self) -> &str;

    /// Bring the backend to a running, ready state.
    async fn bootstrap(&self, progress: &ProgressWriter) -> Result<()>;

    /// Current backend state.
    async fn status(&self) -> Result<DriverStatus>;

    /// Stop the backend if it is running.
    async fn stop(&self, force: bool) -> Result<()>;

    /// Remove the backend, optionally together with its persistent state.
    async fn rm(&self, force: bool, rm_volume: bool) -> Result<()>;

    /// Connect a client to the running backend.
    async fn client(&self) -> Result<Arc<dyn BuildClient>>;

    /// Features this driver supports.
    fn features(&self) -> DriverFeatures;
}

/// Backend descriptor: one configured builder node.
#[derive(Clone)]
pub struct DriverInfo {
    pub name: String,
    pub driver: Option<Arc<dyn Driver>>,
    /// Platforms the node is known to support. Empty means unknown.
    pub platforms: Vec<Platform>,
    /// Initialization error, if the driver could not be constructed.
    pub err: Option<String>,
    /// Marks the implicit default local-runtime backend.
    pub default_local: bool,
}

impl DriverInfo {
    pub fn new(name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self {
            name: name.into(),
            driver: Some(driver),
            platforms: Vec::new(),
            err: None,
            default_local: false,
        }
    }

    /// Descriptor for a node whose driver failed to initialize.
    pub fn failed(name: impl Into<String>, err: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: None,
            platforms: Vec::new(),
            err: Some(err.into()),
            default_local: false,
        }
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn as_default_local(mut self) -> Self {
        self.default_local = true;
        self
    }

    pub fn features(&self) -> DriverFeatures {
        self.driver.as_ref().map(|d| d.features()).unwrap_or_default()
    }

    pub fn factory_name(&self) -> &str {
        self.driver.as_ref().map(|d| d.factory_name()).unwrap_or("unknown")
    }

    /// Error for a feature this node lacks.
    pub fn not_supported(&self, feature: Feature) -> BrigError {
        BrigError::FeatureUnsupported { feature, driver: self.factory_name().to_string() }
    }
}

impl fmt::Debug for DriverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverInfo")
            .field("name", &self.name)
            .field("driver", &self.driver.as_ref().map(|d| d.factory_name()))
            .field("platforms", &self.platforms)
            .field("err", &self.err)
            .field("default_local", &self.default_local)
            .finish()
    }
}

/// Keep only the nodes whose driver initialized. Fails with the last
/// initialization error when none are usable.
pub fn filter_available(drivers: &[DriverInfo]) -> Result<Vec<DriverInfo>> {
    let mut last_err = "no drivers found".to_string();
    let mut out = Vec::with_capacity(drivers.len());
    for di in drivers {
        if let Some(err) = &di.err {
            last_err = err.clone();
        } else if di.driver.is_some() {
            out.push(di.clone());
        }
    }
    if out.is_empty() {
        return Err(BrigError::NoValidDrivers { reason: last_err });
    }
    Ok(out)
}

/// Make sure the driver's backend is running and return a client for it.
#[instrument(skip(driver, progress), fields(driver = %driver.factory_name()))]
pub async fn boot(driver: &dyn Driver, progress: &ProgressWriter) -> Result<Arc<dyn BuildClient>> {
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        let status = driver.status().await?;
        attempt += 1;
        if status != DriverStatus::Running {
            if attempt > BOOT_ATTEMPTS {
                return Err(BrigError::BootstrapExhausted {
                    driver: driver.factory_name().to_string(),
                    attempts: BOOT_ATTEMPTS,
                });
            }
            driver.bootstrap(progress).await?;
        }

        match driver.client().await {
            Ok(client) => {
                crate::observability::metrics::record_driver_boot(
                    started.elapsed().as_secs_f64(),
                    driver.factory_name(),
                );
                info!(attempts = attempt, "driver ready");
                return Ok(client);
            }
            Err(e)
                if matches!(e.root(), BrigError::DriverNotRunning { .. })
                    && attempt <= BOOT_ATTEMPTS =>
            {
                continue
            }
            Err(e) => return Err(e),
        }
    }
}
