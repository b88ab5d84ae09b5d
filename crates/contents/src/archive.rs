//! Bundled `.tzst` archives and their optional checksum sidecars.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tar::Archive;

use guestbox_core::error::GuestBoxError;

pub const CHECKSUM_EXTENSION: &str = "sha256";

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open archive {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("read archive {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

fn sidecar_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".");
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// Checks `archive` against `<archive>.sha256` when that file exists.
/// Returns whether a sidecar was found.
pub fn verify_checksum(archive: &Path) -> Result<bool> {
    let sidecar = sidecar_path(archive);
    if !sidecar.exists() {
        return Ok(false);
    }
    let contents = fs::read_to_string(&sidecar)
        .with_context(|| format!("read checksum {}", sidecar.display()))?;
    let expected = contents
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let actual = sha256_file(archive)?;
    if expected != actual {
        return Err(GuestBoxError::MissingAsset(format!(
            "checksum mismatch for {}: expected {expected}, found {actual}",
            archive.display()
        ))
        .into());
    }
    Ok(true)
}

/// Unpacks a zstd-compressed tarball into `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(GuestBoxError::MissingAsset(archive.display().to_string()).into());
    }
    verify_checksum(archive)?;
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;

    let file = File::open(archive).with_context(|| format!("open archive {}", archive.display()))?;
    let decoder = zstd::stream::read::Decoder::new(file)
        .with_context(|| format!("init zstd decoder for {}", archive.display()))?;
    let mut tarball = Archive::new(decoder);
    tarball.set_preserve_permissions(true);
    tarball
        .unpack(dest)
        .with_context(|| format!("extract {}", archive.display()))?;
    tracing::debug!(archive = %archive.display(), dest = %dest.display(), "extracted archive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checksum_sidecar_is_optional_and_enforced() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("box64-0.3.6-bionic.tzst");
        fs::write(&archive, b"payload").unwrap();
        assert!(!verify_checksum(&archive).unwrap());

        let digest = sha256_file(&archive).unwrap();
        fs::write(sidecar_path(&archive), format!("{digest}  box64-0.3.6-bionic.tzst\n")).unwrap();
        assert!(verify_checksum(&archive).unwrap());

        fs::write(sidecar_path(&archive), "00ff\n").unwrap();
        let err = verify_checksum(&archive).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GuestBoxError>(),
            Some(GuestBoxError::MissingAsset(_))
        ));
    }

    #[test]
    fn test_missing_archive_is_missing_asset() {
        let temp = TempDir::new().unwrap();
        let err = extract_archive(&temp.path().join("absent.tzst"), temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GuestBoxError>(),
            Some(GuestBoxError::MissingAsset(_))
        ));
    }

    fn pack_zstd(staging: &Path, archive: &Path) {
        let encoder = zstd::stream::write::Encoder::new(File::create(archive).unwrap(), 0).unwrap();
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("usr", staging.join("usr")).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_extracts_zstd_tarball_in_process() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("staging");
        fs::create_dir_all(staging.join("usr/bin")).unwrap();
        let binary = staging.join("usr/bin/box64");
        fs::write(&binary, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
        let archive = temp.path().join("box64.tzst");
        pack_zstd(&staging, &archive);

        let dest = temp.path().join("imagefs");
        extract_archive(&archive, &dest).unwrap();
        let extracted = dest.join("usr/bin/box64");
        assert_eq!(fs::read(&extracted).unwrap(), b"#!/bin/sh\n");
        assert_eq!(fs::metadata(&extracted).unwrap().permissions().mode() & 0o111, 0o111);
    }

    #[test]
    fn test_corrupt_archive_fails_to_extract() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.tzst");
        fs::write(&archive, b"not zstd at all").unwrap();
        assert!(extract_archive(&archive, &temp.path().join("dest")).is_err());
    }
}
