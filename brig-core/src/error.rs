//! Error types for brig.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::driver::Feature;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for brig operations.
pub type Result<T> = std::result::Result<T, BrigError>;

/// Main error type for brig.
#[derive(Error, Debug)]
pub enum BrigError {
    // Driver resolution errors
    #[error("driver required for build")]
    NoDriverConfigured,

    #[error("no valid drivers found: {reason}")]
    NoValidDrivers { reason: String },

    #[error("failed to bootstrap driver {driver} after {attempts} attempts")]
    BootstrapExhausted { driver: String, attempts: u32 },

    #[error("driver {driver} is not running")]
    DriverNotRunning { driver: String },

    #[error("listing workers of {driver}: {reason}")]
    ListWorkers { driver: String, reason: String },

    // Build option validation errors
    #[error("multiple outputs currently unsupported (target {target})")]
    MultipleExports { target: String },

    #[error("image ID file cannot be specified when building for multiple platforms")]
    ImageIdFileMultiPlatform,

    #[error("local and tar exporters are incompatible with image ID file")]
    ImageIdFileExporter,

    #[error("tag is needed when pushing to registry")]
    PushWithoutTag,

    #[error("auto-push is currently not implemented for {driver} driver")]
    DefaultDriverPush { driver: String },

    #[error("invalid tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("network mode {mode:?} not supported by buildkit")]
    UnsupportedNetworkMode { mode: String },

    #[error("invalid host {host}")]
    InvalidExtraHost { host: String },

    #[error("invalid platform {platform:?}: {reason}")]
    InvalidPlatform { platform: String, reason: String },

    #[error(
        "{feature} feature is currently not supported for {driver} driver. \
         Please switch to a different driver (eg. \"brig create\")"
    )]
    FeatureUnsupported { feature: Feature, driver: String },

    #[error("loading into the local image store requires an image store connection")]
    NoImageStore,

    // Build context errors
    #[error("please specify build context (e.g. \".\" for the current directory)")]
    MissingContext,

    #[error("invalid argument: can't use stdin for both build context and dockerfile")]
    StdinConflict,

    #[error("ambiguous Dockerfile source: both stdin and flag correspond to Dockerfiles")]
    DockerfileConflict,

    #[error("Dockerfile from stdin is not supported with remote contexts")]
    RemoteContextStdin,

    #[error("stdin was requested but no input stream is attached")]
    StdinUnavailable,

    #[error("unable to prepare context: path {path:?} not found")]
    ContextNotFound { path: String },

    // Container backend errors
    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("container engine error during {operation} on {target}: {reason}")]
    Engine { operation: String, target: String, reason: String },

    #[error("exec ID empty")]
    EmptyExecId,

    #[error("exit code {code}")]
    ExecExitCode { code: i64 },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<BrigError>,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BrigError {
    /// Attach the operation that produced this error.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Context { context: context.into(), source: Box::new(self) }
    }

    /// Shorthand for a failed container engine call.
    pub fn engine(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Engine {
            operation: operation.into(),
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the innermost error, skipping context wrappers.
    pub fn root(&self) -> &BrigError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the error stems from cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}
