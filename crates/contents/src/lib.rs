use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use guestbox_core::config::{ContainerConfig, ExecutionMode, SandboxConfig};
use guestbox_core::error::GuestBoxError;
use guestbox_core::paths::ImageFs;

pub mod archive;
pub mod marker;
pub mod profile;
pub mod scratch;

pub use marker::InstalledContents;
pub use profile::{find_profile, ContentKind, ContentProfile};
pub use scratch::clear_dir;

pub const TRANSLATOR_MODE: u32 = 0o755;

/// Installs the per-launch assets a container needs before its guest runs.
pub trait ContentInstaller: Send + Sync + fmt::Debug {
    /// Installs whatever the container's execution mode requires; a version
    /// already recorded as installed is skipped.
    fn ensure_assets(&self, image_fs: &ImageFs, container: &ContainerConfig) -> Result<()>;
}

/// Resolves assets from user content profiles first, then from bundled
/// archives.
#[derive(Debug, Clone)]
pub struct ContentsManager {
    pub contents_dir: PathBuf,
    pub assets_dir: PathBuf,
}

impl ContentsManager {
    pub fn new(contents_dir: PathBuf, assets_dir: PathBuf) -> Self {
        Self {
            contents_dir,
            assets_dir,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.contents_dir.clone(), config.assets_dir.clone())
    }

    pub fn archive_path(&self, kind: ContentKind, version: &str) -> PathBuf {
        match kind {
            ContentKind::Box64 => self
                .assets_dir
                .join("box86_64")
                .join(format!("box64-{version}-bionic.tzst")),
            ContentKind::Wowbox64 => self
                .assets_dir
                .join("wowbox64")
                .join(format!("wowbox64-{version}.tzst")),
            ContentKind::Fexcore => self
                .assets_dir
                .join("fexcore")
                .join(format!("fexcore-{version}.tzst")),
        }
    }

    /// Installs one content version into `dest`.
    pub fn install(&self, kind: ContentKind, version: &str, dest: &Path) -> Result<()> {
        if version.trim().is_empty() {
            return Err(GuestBoxError::InvalidConfig(format!("{} version is empty", kind.as_str())).into());
        }
        match find_profile(&self.contents_dir, kind, version) {
            Some(profile) => {
                profile.apply(dest)?;
            }
            None => archive::extract_archive(&self.archive_path(kind, version), dest)?,
        }
        tracing::info!(content = %kind.entry_name(version), dest = %dest.display(), "installed content");
        Ok(())
    }

    /// Installs the box64 runtime into the sandbox tree and marks the
    /// translator binary executable. Returns whether anything was installed.
    pub fn ensure_translator_runtime(&self, image_fs: &ImageFs, container: &ContainerConfig) -> Result<bool> {
        let mut marker = InstalledContents::load(&container.root_dir);
        let translator = image_fs.translator_binary();
        let version = &container.box64_version;
        let installed = marker.box64_version.as_deref() == Some(version.as_str()) && translator.is_file();
        if !installed {
            self.install(ContentKind::Box64, version, image_fs.root_dir())?;
            marker.box64_version = Some(version.clone());
            marker.save(&container.root_dir)?;
        }
        if !translator.is_file() {
            return Err(GuestBoxError::MissingAsset(translator.display().to_string()).into());
        }
        fs::set_permissions(&translator, fs::Permissions::from_mode(TRANSLATOR_MODE))
            .with_context(|| format!("chmod {}", translator.display()))?;
        Ok(!installed)
    }

    /// Installs the wowbox64 and FEXCore shim DLLs into system32. Returns
    /// whether anything was installed.
    pub fn ensure_shim_dlls(&self, image_fs: &ImageFs, container: &ContainerConfig) -> Result<bool> {
        let mut marker = InstalledContents::load(&container.root_dir);
        let system32 = image_fs.system32_dir();
        let mut changed = false;

        if marker.wowbox64_version.as_deref() != Some(container.wowbox64_version.as_str()) {
            self.install(ContentKind::Wowbox64, &container.wowbox64_version, &system32)?;
            marker.wowbox64_version = Some(container.wowbox64_version.clone());
            changed = true;
        }
        if marker.fexcore_version.as_deref() != Some(container.fexcore_version.as_str()) {
            self.install(ContentKind::Fexcore, &container.fexcore_version, &system32)?;
            marker.fexcore_version = Some(container.fexcore_version.clone());
            changed = true;
        }
        if changed {
            marker.save(&container.root_dir)?;
        }
        Ok(changed)
    }
}

impl ContentInstaller for ContentsManager {
    fn ensure_assets(&self, image_fs: &ImageFs, container: &ContainerConfig) -> Result<()> {
        match container.execution_mode {
            ExecutionMode::Translated => self.ensure_translator_runtime(image_fs, container)?,
            ExecutionMode::Native => self.ensure_shim_dlls(image_fs, container)?,
        };
        Ok(())
    }
}
