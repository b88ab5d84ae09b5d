//! Undo mounts and root-owned files left by a privileged run that never
//! reached its teardown.

use std::fs;
use std::path::{Path, PathBuf};

use guestbox_core::paths::ImageFs;

use crate::script::{PrivilegedScript, ShellOp, ToolPaths};
use crate::Elevation;

#[derive(Debug, Clone)]
pub struct RecoveryTargets {
    pub image_fs: ImageFs,
    pub audio_scratch_dir: Option<PathBuf>,
    pub app_uid: u32,
}

pub fn plan_recovery(targets: &RecoveryTargets, tools: &ToolPaths) -> PrivilegedScript {
    let mut script = PrivilegedScript::new(tools.clone());
    for mount_point in list_dir_sorted(&targets.image_fs.mnt_dir()) {
        script.push(ShellOp::Unmount {
            target: mount_point,
            quiet: true,
        });
    }

    let mut owned_dirs = vec![
        targets.image_fs.home_dir(),
        targets.image_fs.tmp_dir(),
        targets.image_fs.usr_tmp_dir(),
    ];
    owned_dirs.extend(targets.audio_scratch_dir.clone());
    for dir in owned_dirs.into_iter().filter(|dir| dir.exists()) {
        script.push(ShellOp::Chown {
            path: dir,
            uid: targets.app_uid,
            gid: targets.app_uid,
            quiet: false,
        });
    }
    script
}

/// Runs recovery through the elevated helper. Never fails: a missing helper
/// or a failing script is only logged.
pub fn recover_stale_session(elevation: &Elevation, targets: &RecoveryTargets) -> Option<i32> {
    tracing::debug!("attempting stale session recovery");
    let script = plan_recovery(targets, elevation.tools());
    match elevation.run(&script) {
        Ok(status) => {
            tracing::debug!(status, "stale session recovery finished");
            Some(status)
        }
        Err(err) => {
            tracing::warn!(error = %err, "skipping stale session recovery");
            None
        }
    }
}

fn list_dir_sorted(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
    paths.sort();
    paths
}
