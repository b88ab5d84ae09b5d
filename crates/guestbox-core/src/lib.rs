pub mod config;
pub mod env_vars;
pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use config::{Config, ConfigPaths, ContainerConfig, DriveMapping, ExecutionMode, Preferences};
pub use env_vars::EnvVarSet;
pub use error::GuestBoxError;
pub use ids::LaunchId;
pub use paths::ImageFs;
pub use types::{HostContext, LaunchRecord};
