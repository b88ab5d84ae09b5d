//! Structured privileged shell scripts.
//!
//! Call sites describe operations; only [`PrivilegedScript::render`] turns
//! them into shell text, and every interpolated value goes through [`quote`].

use std::path::{Path, PathBuf};

use guestbox_core::config::ElevationConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub mount: PathBuf,
    pub umount: PathBuf,
    pub chown: PathBuf,
    pub pkill: PathBuf,
}

impl ToolPaths {
    pub fn from_config(config: &ElevationConfig) -> Self {
        Self {
            mount: config.mount.clone(),
            umount: config.umount.clone(),
            chown: config.chown.clone(),
            pkill: config.pkill.clone(),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::from_config(&ElevationConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOp {
    ChangeDir { path: PathBuf, exit_on_failure: bool },
    Run { argv: Vec<String>, quiet: bool },
    KillByName { name: String },
    Unmount { target: PathBuf, quiet: bool },
    BindMount { source: PathBuf, target: PathBuf },
    Chown { path: PathBuf, uid: u32, gid: u32, quiet: bool },
    Export { key: String, value: String },
    Exec { argv: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct PrivilegedScript {
    tools: ToolPaths,
    ops: Vec<ShellOp>,
}

impl PrivilegedScript {
    pub fn new(tools: ToolPaths) -> Self {
        Self {
            tools,
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: ShellOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Adds an `export`, skipping names the shell would not accept.
    pub fn export(&mut self, key: &str, value: &str) -> bool {
        if !is_valid_name(key) {
            tracing::warn!(key, "skipping environment variable with invalid name");
            return false;
        }
        self.ops.push(ShellOp::Export {
            key: key.to_string(),
            value: value.to_string(),
        });
        true
    }

    pub fn ops(&self) -> &[ShellOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn unmount_targets(&self) -> Vec<&Path> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ShellOp::Unmount { target, .. } => Some(target.as_path()),
                _ => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut script = String::new();
        for op in &self.ops {
            if let Some(line) = self.render_op(op) {
                script.push_str(&line);
                script.push('\n');
            }
        }
        script.push_str("exit\n");
        script
    }

    fn render_op(&self, op: &ShellOp) -> Option<String> {
        let line = match op {
            ShellOp::ChangeDir {
                path,
                exit_on_failure,
            } => {
                let mut line = format!("cd {}", quote_path(path));
                if *exit_on_failure {
                    line.push_str(" || exit 1");
                }
                line
            }
            ShellOp::Run { argv, quiet } => {
                let mut line = quote_argv(argv);
                if *quiet {
                    line.push_str(" >/dev/null 2>&1");
                }
                line
            }
            ShellOp::KillByName { name } => {
                format!("{} -9 {}", quote_path(&self.tools.pkill), quote(name))
            }
            ShellOp::Unmount { target, quiet } => {
                let mut line = format!("{} -l {}", quote_path(&self.tools.umount), quote_path(target));
                if *quiet {
                    line.push_str(" >/dev/null 2>&1");
                }
                line
            }
            ShellOp::BindMount { source, target } => format!(
                "{} -o bind {} {}",
                quote_path(&self.tools.mount),
                quote_path(source),
                quote_path(target)
            ),
            ShellOp::Chown {
                path,
                uid,
                gid,
                quiet,
            } => {
                let mut line = format!(
                    "{} -R {uid}:{gid} {}",
                    quote_path(&self.tools.chown),
                    quote_path(path)
                );
                if *quiet {
                    line.push_str(" 2>/dev/null");
                }
                line
            }
            ShellOp::Export { key, value } => {
                if !is_valid_name(key) {
                    return None;
                }
                format!("export {key}={}", quote(value))
            }
            ShellOp::Exec { argv } => format!("exec {}", quote_argv(argv)),
        };
        Some(line)
    }
}

/// Single-quotes `value` for a POSIX shell.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

pub fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

fn quote_argv(argv: &[String]) -> String {
    argv.iter().map(|arg| quote(arg)).collect::<Vec<_>>().join(" ")
}

pub fn is_valid_name(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_render_ends_with_exit() {
        let script = PrivilegedScript::new(ToolPaths::default());
        assert_eq!(script.render(), "exit\n");
    }

    #[test]
    fn test_render_operations() {
        let mut script = PrivilegedScript::new(ToolPaths::default());
        script
            .push(ShellOp::ChangeDir {
                path: PathBuf::from("/r"),
                exit_on_failure: true,
            })
            .push(ShellOp::Unmount {
                target: PathBuf::from("/r/mnt/d"),
                quiet: true,
            })
            .push(ShellOp::BindMount {
                source: PathBuf::from("/sdcard/Games O'Brien"),
                target: PathBuf::from("/r/mnt/d"),
            })
            .push(ShellOp::Chown {
                path: PathBuf::from("/r/tmp"),
                uid: 0,
                gid: 0,
                quiet: true,
            })
            .push(ShellOp::KillByName {
                name: "wineserver".to_string(),
            })
            .push(ShellOp::Exec {
                argv: vec!["/r/usr/bin/box64".to_string(), "game.exe".to_string()],
            });
        script.export("WINEDEBUG", "-all");

        let rendered = script.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "cd '/r' || exit 1",
                "'/system/bin/umount' -l '/r/mnt/d' >/dev/null 2>&1",
                r"'/system/bin/mount' -o bind '/sdcard/Games O'\''Brien' '/r/mnt/d'",
                "'/system/bin/chown' -R 0:0 '/r/tmp' 2>/dev/null",
                "'pkill' -9 'wineserver'",
                "exec '/r/usr/bin/box64' 'game.exe'",
                "export WINEDEBUG='-all'",
                "exit",
            ]
        );
    }

    #[test]
    fn test_export_rejects_invalid_names() {
        let mut script = PrivilegedScript::new(ToolPaths::default());
        assert!(!script.export("BAD;rm", "x"));
        assert!(!script.export("1ABC", "x"));
        assert!(script.export("_OK1", "x"));
        assert_eq!(script.ops().len(), 1);
    }
}
