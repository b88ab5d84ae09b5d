use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::GuestBoxError;

pub const DEFAULT_BOX64_VERSION: &str = "0.3.6";
pub const DEFAULT_WOWBOX64_VERSION: &str = "0.3.6";
pub const DEFAULT_FEXCORE_VERSION: &str = "2508";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub host: HostConfig,
    pub container: ContainerConfig,
    pub preferences: Preferences,
    pub launch: LaunchConfig,
    pub elevation: ElevationConfig,
    pub audio: ServiceConfig,
    pub shm: ServiceConfig,
    #[serde(default)]
    pub presets: PresetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub image_root: PathBuf,
    pub user: String,
    pub wine_dir: Option<PathBuf>,
    pub assets_dir: PathBuf,
    pub contents_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub system_bin: PathBuf,
    pub system_lib: PathBuf,
    pub app_data_dir: PathBuf,
    pub app_uid: Option<u32>,
    pub gpu_renderer: Option<String>,
    pub resolv_conf: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Guest binaries run through the box64 translator.
    Translated,
    /// Guest binaries run directly, translation happens inside shim DLLs.
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub root_dir: PathBuf,
    pub execution_mode: ExecutionMode,
    pub emulator: String,
    pub box64_version: String,
    pub box64_preset: String,
    pub wowbox64_version: String,
    pub fexcore_version: String,
    pub fexcore_preset: String,
    pub wow64_mode: bool,
    pub run_as_root: bool,
    #[serde(default)]
    pub drives: Vec<DriveMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriveMapping {
    pub letter: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub enable_box64_logs: bool,
    pub debug_output: bool,
    pub open_with_host_browser: bool,
    pub share_clipboard: bool,
    pub enable_peb_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub executable: String,
    pub working_dir: Option<PathBuf>,
    /// `KEY=VALUE` assignments merged over the assembled environment.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub binding_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationConfig {
    pub helper: PathBuf,
    pub mount: PathBuf,
    pub umount: PathBuf,
    pub chown: PathBuf,
    pub pkill: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub enabled: bool,
}

/// User-defined translator presets, each a list of `KEY=VALUE` assignments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetConfig {
    #[serde(default)]
    pub box64: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub fexcore: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub audio_scratch_dir: PathBuf,
}

impl ContainerConfig {
    pub fn wine_prefix(&self) -> PathBuf {
        self.root_dir.join(".wine")
    }

    pub fn uses_fexcore(&self) -> bool {
        self.emulator.eq_ignore_ascii_case("fexcore")
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enable_box64_logs: true,
            debug_output: false,
            open_with_host_browser: false,
            share_clipboard: false,
            enable_peb_logs: false,
        }
    }
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            helper: PathBuf::from("su"),
            mount: PathBuf::from("/system/bin/mount"),
            umount: PathBuf::from("/system/bin/umount"),
            chown: PathBuf::from("/system/bin/chown"),
            pkill: PathBuf::from("pkill"),
        }
    }
}

impl Config {
    pub fn default_config(paths: &ConfigPaths) -> Self {
        let data_dir = &paths.data_dir;
        Self {
            sandbox: SandboxConfig {
                image_root: data_dir.join("imagefs"),
                user: crate::paths::DEFAULT_USER.to_string(),
                wine_dir: None,
                assets_dir: data_dir.join("assets"),
                contents_dir: data_dir.join("contents"),
            },
            host: HostConfig {
                system_bin: PathBuf::from("/system/bin"),
                system_lib: PathBuf::from("/system/lib64"),
                app_data_dir: data_dir.clone(),
                app_uid: None,
                gpu_renderer: None,
                resolv_conf: PathBuf::from("/etc/resolv.conf"),
            },
            container: ContainerConfig {
                name: "default".to_string(),
                root_dir: data_dir.join("containers/default"),
                execution_mode: ExecutionMode::Translated,
                emulator: "box64".to_string(),
                box64_version: DEFAULT_BOX64_VERSION.to_string(),
                box64_preset: "COMPATIBILITY".to_string(),
                wowbox64_version: DEFAULT_WOWBOX64_VERSION.to_string(),
                fexcore_version: DEFAULT_FEXCORE_VERSION.to_string(),
                fexcore_preset: "INTERMEDIATE".to_string(),
                wow64_mode: true,
                run_as_root: false,
                drives: vec![DriveMapping {
                    letter: "D".to_string(),
                    path: data_dir.join("downloads"),
                }],
            },
            preferences: Preferences::default(),
            launch: LaunchConfig {
                executable: "wine explorer /desktop=shell,1280x720 winecfg".to_string(),
                working_dir: None,
                env: Vec::new(),
                binding_paths: Vec::new(),
            },
            elevation: ElevationConfig::default(),
            audio: ServiceConfig { enabled: true },
            shm: ServiceConfig { enabled: true },
            presets: PresetConfig::default(),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let output = toml::to_string_pretty(self).context("render config TOML")?;
        Ok(output)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let contents = self.to_toml_string()?;
        fs::write(path, contents).with_context(|| format!("write config at {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sandbox.user.trim().is_empty() {
            return Err(GuestBoxError::InvalidConfig("sandbox user is empty".to_string()).into());
        }
        for drive in &self.container.drives {
            let valid = drive.letter.len() == 1
                && drive.letter.chars().all(|c| c.is_ascii_alphabetic());
            if !valid {
                return Err(GuestBoxError::InvalidConfig(format!(
                    "drive letter must be a single letter: {:?}",
                    drive.letter
                ))
                .into());
            }
        }
        for assignment in &self.launch.env {
            if !assignment.contains('=') {
                return Err(GuestBoxError::InvalidConfig(format!(
                    "environment override is not KEY=VALUE: {assignment}"
                ))
                .into());
            }
        }
        Ok(())
    }
}

impl ConfigPaths {
    pub fn resolve() -> Result<Self> {
        let project_dirs = ProjectDirs::from("io", "guestbox", "guestbox")
            .ok_or_else(|| anyhow::anyhow!("unable to determine project directories"))?;
        let config_dir = project_dirs.config_dir();
        let data_dir = project_dirs.data_dir();
        Ok(Self::with_dirs(config_dir, data_dir))
    }

    pub fn with_dirs(config_dir: &Path, data_dir: &Path) -> Self {
        Self {
            config_path: config_dir.join("config.toml"),
            data_dir: data_dir.to_path_buf(),
            scratch_dir: data_dir.join("tmp"),
            audio_scratch_dir: data_dir.join("pulseaudio"),
        }
    }
}
