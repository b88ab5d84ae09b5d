use std::path::PathBuf;

use anyhow::{Context, Result};

use guestbox_core::config::{Config, ConfigPaths};

pub mod config;
pub mod env;
pub mod recover;
pub mod run;

/// Command-line values that take precedence over the config file.
pub struct LaunchOverrides {
    pub config_path: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub executable: Option<String>,
}

impl LaunchOverrides {
    pub fn load(&self) -> Result<(ConfigPaths, Config)> {
        let (paths, mut config) = load_config(self.config_path.clone())?;
        if let Some(root) = &self.root {
            config.sandbox.image_root = root.clone();
        }
        if let Some(executable) = &self.executable {
            config.launch.executable = executable.clone();
        }
        Ok((paths, config))
    }
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<(ConfigPaths, Config)> {
    let paths = ConfigPaths::resolve()?;
    let config_path = config_path.unwrap_or_else(|| paths.config_path.clone());
    let config = Config::load(&config_path).with_context(|| {
        format!(
            "load config at {} (run `guestbox init` if missing)",
            config_path.display()
        )
    })?;
    Ok((paths, config))
}
