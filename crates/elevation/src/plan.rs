//! Scripts for a privileged guest launch and its teardown.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use guestbox_core::config::DriveMapping;
use guestbox_core::env_vars::EnvVarSet;
use guestbox_core::paths::ImageFs;

use crate::mounts::MountLedger;
use crate::script::{PrivilegedScript, ShellOp, ToolPaths};

pub const TRANSLATOR_SERVER: &str = "wineserver";

#[derive(Debug, Clone, Copy)]
pub struct PrivilegedLaunch<'a> {
    pub image_fs: &'a ImageFs,
    pub wine_prefix: &'a Path,
    pub drives: &'a [DriveMapping],
    pub binding_paths: &'a [PathBuf],
    pub app_data_dir: &'a Path,
    pub host_system_bin: &'a Path,
    pub env: &'a EnvVarSet,
    pub argv: &'a [String],
}

/// Builds the launch script, creating mount point directories and recording
/// each bind mount in `ledger`.
pub fn plan_launch(
    request: &PrivilegedLaunch<'_>,
    tools: &ToolPaths,
    ledger: &mut MountLedger,
) -> Result<PrivilegedScript> {
    let image_fs = request.image_fs;
    let root = image_fs.root_dir();
    let mnt_dir = image_fs.mnt_dir();
    fs::create_dir_all(&mnt_dir).with_context(|| format!("create {}", mnt_dir.display()))?;

    let mut script = PrivilegedScript::new(tools.clone());
    script
        .push(ShellOp::ChangeDir {
            path: root.to_path_buf(),
            exit_on_failure: true,
        })
        .push(ShellOp::Run {
            argv: vec![
                image_fs.wineserver_path().to_string_lossy().into_owned(),
                "-k".to_string(),
            ],
            quiet: false,
        })
        .push(ShellOp::KillByName {
            name: TRANSLATOR_SERVER.to_string(),
        });

    for drive in request.drives {
        if !is_external_dir(&drive.path, request.app_data_dir) {
            tracing::debug!(letter = %drive.letter, path = %drive.path.display(), "drive not bind-mounted");
            continue;
        }
        let mount_point = mnt_dir.join(&drive.letter);
        add_bind_mount(&mut script, ledger, &drive.path, mount_point)?;
    }

    for binding in request.binding_paths {
        if !is_external_dir(binding, request.app_data_dir) {
            continue;
        }
        let relative = binding.strip_prefix("/").unwrap_or(binding);
        add_bind_mount(&mut script, ledger, binding, root.join(relative))?;
    }

    script
        .push(ShellOp::Chown {
            path: request.wine_prefix.to_path_buf(),
            uid: 0,
            gid: 0,
            quiet: false,
        })
        .push(ShellOp::Chown {
            path: image_fs.usr_tmp_dir(),
            uid: 0,
            gid: 0,
            quiet: true,
        })
        .push(ShellOp::Chown {
            path: image_fs.tmp_dir(),
            uid: 0,
            gid: 0,
            quiet: true,
        });

    let mut env = request.env.clone();
    let system_bin = request.host_system_bin.to_string_lossy();
    if let Some(path) = env.get("PATH").map(str::to_string) {
        if !path.split(':').any(|segment| segment == system_bin) {
            env.put("PATH", format!("{path}:{system_bin}"));
        }
    }
    for (key, value) in env.iter() {
        script.export(key, value);
    }

    script.push(ShellOp::Exec {
        argv: request.argv.to_vec(),
    });
    Ok(script)
}

/// Unmounts everything in `ledger` (leaving it empty) and hands the prefix
/// back to the application uid.
pub fn plan_teardown(
    ledger: &mut MountLedger,
    wine_prefix: &Path,
    app_uid: u32,
    tools: &ToolPaths,
) -> PrivilegedScript {
    let mut script = PrivilegedScript::new(tools.clone());
    for target in ledger.drain() {
        script.push(ShellOp::Unmount {
            target,
            quiet: false,
        });
    }
    script.push(ShellOp::Chown {
        path: wine_prefix.to_path_buf(),
        uid: app_uid,
        gid: app_uid,
        quiet: false,
    });
    script
}

fn add_bind_mount(
    script: &mut PrivilegedScript,
    ledger: &mut MountLedger,
    source: &Path,
    mount_point: PathBuf,
) -> Result<()> {
    fs::create_dir_all(&mount_point)
        .with_context(|| format!("create mount point {}", mount_point.display()))?;
    script
        .push(ShellOp::Unmount {
            target: mount_point.clone(),
            quiet: true,
        })
        .push(ShellOp::BindMount {
            source: source.to_path_buf(),
            target: mount_point.clone(),
        });
    ledger.record(mount_point);
    Ok(())
}

/// Only existing directories outside the application's private data need a
/// bind mount; the sandbox can already reach the rest.
fn is_external_dir(path: &Path, app_data_dir: &Path) -> bool {
    !path.as_os_str().is_empty() && !path.starts_with(app_data_dir) && path.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        image_fs: ImageFs,
        app_data: PathBuf,
        external: PathBuf,
        prefix: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let app_data = temp.path().join("app");
        let image_fs = ImageFs::new(app_data.join("imagefs"));
        let external = temp.path().join("sdcard/Games");
        fs::create_dir_all(&external).unwrap();
        fs::create_dir_all(app_data.join("downloads")).unwrap();
        let prefix = app_data.join("containers/1/.wine");
        Fixture {
            _temp: temp,
            image_fs,
            app_data,
            external,
            prefix,
        }
    }

    #[test]
    fn test_launch_mounts_only_external_drives_and_teardown_reverses_them() {
        let fx = fixture();
        let drives = vec![
            DriveMapping {
                letter: "D".to_string(),
                path: fx.app_data.join("downloads"),
            },
            DriveMapping {
                letter: "E".to_string(),
                path: fx.external.clone(),
            },
            DriveMapping {
                letter: "F".to_string(),
                path: PathBuf::from("/nonexistent/drive"),
            },
        ];
        let env = EnvVarSet::from_assignments(["PATH=/r/usr/bin", "HOME=/r/home/xuser"]);
        let argv = vec!["/r/usr/bin/box64".to_string(), "game.exe".to_string()];
        let request = PrivilegedLaunch {
            image_fs: &fx.image_fs,
            wine_prefix: &fx.prefix,
            drives: &drives,
            binding_paths: &[],
            app_data_dir: &fx.app_data,
            host_system_bin: Path::new("/system/bin"),
            env: &env,
            argv: &argv,
        };
        let mut ledger = MountLedger::new();
        let script = plan_launch(&request, &ToolPaths::default(), &mut ledger).unwrap();

        let mount_point = fx.image_fs.mnt_dir().join("E");
        assert_eq!(ledger.points(), [mount_point.clone()]);
        assert!(mount_point.is_dir());
        assert!(!fx.image_fs.mnt_dir().join("e").exists());

        let rendered = script.render();
        assert!(rendered.contains("export PATH='/r/usr/bin:/system/bin'"));
        assert!(rendered.contains("exec '/r/usr/bin/box64' 'game.exe'\nexit\n"));
        assert!(!rendered.contains("downloads"));

        let created = ledger.points().to_vec();
        let teardown = plan_teardown(&mut ledger, &fx.prefix, 10123, &ToolPaths::default());
        for point in &created {
            let count = teardown
                .unmount_targets()
                .iter()
                .filter(|target| **target == point.as_path())
                .count();
            assert_eq!(count, 1);
        }
        assert!(ledger.is_empty());
        assert!(teardown.render().contains("-R 10123:10123"));
    }

    #[test]
    fn test_binding_paths_mount_at_same_location_inside_tree() {
        let fx = fixture();
        let env = EnvVarSet::new();
        let argv = vec!["game.exe".to_string()];
        let bindings = vec![fx.external.clone()];
        let request = PrivilegedLaunch {
            image_fs: &fx.image_fs,
            wine_prefix: &fx.prefix,
            drives: &[],
            binding_paths: &bindings,
            app_data_dir: &fx.app_data,
            host_system_bin: Path::new("/system/bin"),
            env: &env,
            argv: &argv,
        };
        let mut ledger = MountLedger::new();
        plan_launch(&request, &ToolPaths::default(), &mut ledger).unwrap();

        let relative = fx.external.strip_prefix("/").unwrap();
        assert_eq!(ledger.points(), [fx.image_fs.root_dir().join(relative)]);
    }
}
