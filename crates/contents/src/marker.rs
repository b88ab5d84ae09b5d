use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const MARKER_FILE: &str = ".guestbox-contents.json";

/// Versions already installed for one container.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledContents {
    #[serde(default)]
    pub box64_version: Option<String>,
    #[serde(default)]
    pub wowbox64_version: Option<String>,
    #[serde(default)]
    pub fexcore_version: Option<String>,
}

impl InstalledContents {
    pub fn path_in(container_dir: &Path) -> PathBuf {
        container_dir.join(MARKER_FILE)
    }

    /// A missing or unreadable marker means nothing is installed.
    pub fn load(container_dir: &Path) -> Self {
        let path = Self::path_in(container_dir);
        let Ok(contents) = fs::read_to_string(&path) else {
            return Self::default();
        };
        match serde_json::from_str(&contents) {
            Ok(marker) => marker,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt contents marker");
                Self::default()
            }
        }
    }

    pub fn save(&self, container_dir: &Path) -> Result<()> {
        fs::create_dir_all(container_dir)
            .with_context(|| format!("create container dir {}", container_dir.display()))?;
        let path = Self::path_in(container_dir);
        let contents = serde_json::to_string_pretty(self).context("render contents marker JSON")?;
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
