//! brig core library
//!
//! Build orchestration over BuildKit backends: context loading, backend
//! container lifecycle, platform-to-backend resolution and concurrent build
//! dispatch.

pub mod build;
pub mod config;
pub mod driver;
pub mod error;
pub mod observability;
pub mod paths;
pub mod platform;
pub mod progress;
pub mod util;

// Re-export commonly used items
pub use build::{Dispatcher, InputStream, Inputs, Options};
pub use config::Config;
pub use driver::container::{DockerContainerDriver, DockerEngine, DriverOptions};
pub use driver::{BuildClient, ClientConnector, Driver, DriverInfo, DriverStatus};
pub use error::{BrigError, Result};
pub use observability::init as init_observability;
pub use platform::Platform;
pub use progress::{ProgressWriter, Printer};
