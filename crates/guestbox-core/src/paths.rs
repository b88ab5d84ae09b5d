use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::SandboxConfig;

pub const DEFAULT_USER: &str = "xuser";
pub const TEMP_DIR_MODE: u32 = 0o771;

pub const AUDIO_SOCKET_PATH: &str = "tmp/.sound/AS0";
pub const SYSVSHM_SOCKET_PATH: &str = "tmp/.sysvshm/SM0";

/// Layout of the sandbox tree the guest runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFs {
    root: PathBuf,
    user: String,
    wine_dir: PathBuf,
}

impl ImageFs {
    pub fn new(root: PathBuf) -> Self {
        let wine_dir = root.join("opt/wine");
        Self {
            root,
            user: DEFAULT_USER.to_string(),
            wine_dir,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        let mut image_fs = Self::new(config.image_root.clone()).with_user(&config.user);
        if let Some(wine_dir) = &config.wine_dir {
            image_fs = image_fs.with_wine_dir(wine_dir.clone());
        }
        image_fs
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn with_wine_dir(mut self, wine_dir: PathBuf) -> Self {
        self.wine_dir = wine_dir;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("usr/bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("usr/lib")
    }

    pub fn usr_dir(&self) -> PathBuf {
        self.root.join("usr")
    }

    pub fn home_dir(&self) -> PathBuf {
        self.root.join("home").join(&self.user)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn usr_tmp_dir(&self) -> PathBuf {
        self.root.join("usr/tmp")
    }

    pub fn mnt_dir(&self) -> PathBuf {
        self.root.join("mnt")
    }

    pub fn rc_file(&self, translator: &str) -> PathBuf {
        self.root.join("etc").join(format!("config.{translator}rc"))
    }

    pub fn wine_dir(&self) -> &Path {
        &self.wine_dir
    }

    pub fn wine_bin_dir(&self) -> PathBuf {
        self.wine_dir.join("bin")
    }

    pub fn wineserver_path(&self) -> PathBuf {
        self.wine_bin_dir().join("wineserver")
    }

    pub fn system32_dir(&self) -> PathBuf {
        self.home_dir().join(".wine/drive_c/windows/system32")
    }

    pub fn translator_binary(&self) -> PathBuf {
        self.bin_dir().join("box64")
    }

    pub fn audio_socket_path(&self) -> PathBuf {
        self.root.join(AUDIO_SOCKET_PATH)
    }

    pub fn sysvshm_socket_path(&self) -> PathBuf {
        self.root.join(SYSVSHM_SOCKET_PATH)
    }

    pub fn input_shm_path(&self) -> PathBuf {
        self.tmp_dir().join("gamepad.mem")
    }

    pub fn ensure_temp_dirs(&self) -> Result<()> {
        ensure_dir_with_mode(&self.tmp_dir(), TEMP_DIR_MODE)?;
        ensure_dir_with_mode(&self.usr_tmp_dir(), TEMP_DIR_MODE)?;
        Ok(())
    }
}

/// Creates `path` (and parents) if missing and applies `mode` to the leaf.
pub fn ensure_dir_with_mode(path: &Path, mode: u32) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).with_context(|| format!("create dir {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {:o} {}", mode, path.display()))?;
    Ok(())
}
