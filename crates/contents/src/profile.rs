//! User-installed content profiles.
//!
//! A profile lives in `<contents>/<kind>/<version>/` with a `profile.json`
//! and a `files/` tree that is copied over the install destination.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

pub const PROFILE_FILE: &str = "profile.json";
pub const FILES_DIR: &str = "files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Box64,
    Wowbox64,
    Fexcore,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Box64 => "box64",
            ContentKind::Wowbox64 => "wowbox64",
            ContentKind::Fexcore => "fexcore",
        }
    }

    pub fn entry_name(self, version: &str) -> String {
        format!("{}-{version}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentProfile {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub version_name: String,
    #[serde(default)]
    pub version_code: u32,
    #[serde(default)]
    pub description: String,
    #[serde(skip)]
    pub dir: PathBuf,
}

impl ContentProfile {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PROFILE_FILE);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read profile {}", path.display()))?;
        let mut profile: ContentProfile =
            serde_json::from_str(&contents).context("parse profile JSON")?;
        profile.dir = dir.to_path_buf();
        Ok(profile)
    }

    pub fn entry_name(&self) -> String {
        self.kind.entry_name(&self.version_name)
    }

    /// Copies the profile's files over `dest`, returning how many files were
    /// written.
    pub fn apply(&self, dest: &Path) -> Result<usize> {
        let source_root = self.dir.join(FILES_DIR);
        let mut copied = 0;
        for entry in WalkDir::new(&source_root).min_depth(1) {
            let entry = entry?;
            let relative = entry
                .path()
                .strip_prefix(&source_root)
                .context("profile entry outside files dir")?;
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .with_context(|| format!("create {}", target.display()))?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
                fs::copy(entry.path(), &target)
                    .with_context(|| format!("copy {}", entry.path().display()))?;
                copied += 1;
            }
        }
        tracing::debug!(profile = %self.entry_name(), copied, "applied content profile");
        Ok(copied)
    }
}

/// Finds the profile for `kind`/`version` under `contents_dir`, if installed.
pub fn find_profile(contents_dir: &Path, kind: ContentKind, version: &str) -> Option<ContentProfile> {
    let dir = contents_dir.join(kind.as_str()).join(version);
    if !dir.join(PROFILE_FILE).is_file() {
        return None;
    }
    match ContentProfile::load(&dir) {
        Ok(profile) if profile.kind == kind && profile.version_name == version => Some(profile),
        Ok(profile) => {
            tracing::warn!(
                dir = %dir.display(),
                found = %profile.entry_name(),
                "content profile does not match its location"
            );
            None
        }
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "unreadable content profile");
            None
        }
    }
}
