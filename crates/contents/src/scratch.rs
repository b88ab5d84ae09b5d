use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use guestbox_core::paths::{ensure_dir_with_mode, TEMP_DIR_MODE};

/// Empties `dir` but keeps the directory itself, creating it when missing.
/// Returns how many entries were removed.
pub fn clear_dir(dir: &Path) -> Result<usize> {
    ensure_dir_with_mode(dir, TEMP_DIR_MODE)?;
    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        }
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_clear_keeps_directory() {
        let temp = TempDir::new().unwrap();
        let scratch = temp.path().join("tmp");
        fs::create_dir_all(scratch.join("nested/deeper")).unwrap();
        fs::write(scratch.join("nested/deeper/file"), b"x").unwrap();
        fs::write(scratch.join("top"), b"y").unwrap();

        assert_eq!(clear_dir(&scratch).unwrap(), 4);
        assert!(scratch.is_dir());
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_clear_creates_missing_dir_with_temp_mode() {
        let temp = TempDir::new().unwrap();
        let scratch = temp.path().join("fresh");
        assert_eq!(clear_dir(&scratch).unwrap(), 0);
        let mode = fs::metadata(&scratch).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, TEMP_DIR_MODE);
    }
}
