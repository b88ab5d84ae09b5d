use std::path::PathBuf;

use anyhow::Result;

use guestbox_core::config::{Config, ConfigPaths};

pub fn init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let paths = ConfigPaths::resolve()?;
    let config_path = path.unwrap_or_else(|| paths.config_path.clone());
    if config_path.exists() && !force {
        return Err(anyhow::anyhow!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        ));
    }
    let config = Config::default_config(&paths);
    config.save(&config_path)?;
    println!("Config written to {}", config_path.display());
    Ok(())
}

pub fn print_effective(config_path: Option<PathBuf>) -> Result<()> {
    let (_, config) = super::load_config(config_path)?;
    let output = config.to_toml_string()?;
    println!("{}", output);
    Ok(())
}
