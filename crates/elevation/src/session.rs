use std::env;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use guestbox_core::error::GuestBoxError;
use host_probe::process::exit_code;

use crate::script::PrivilegedScript;

/// A program that reads a shell script on stdin and runs it elevated.
pub trait ElevatedHelper: Send + Sync + fmt::Debug {
    fn available(&self) -> bool;
    fn spawn(&self) -> io::Result<Child>;
}

/// Runs `program args...` with piped stdio; `su` in production.
#[derive(Debug, Clone)]
pub struct CommandHelper {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandHelper {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|arg| arg.to_string()).collect();
        self
    }
}

impl ElevatedHelper for CommandHelper {
    fn available(&self) -> bool {
        resolve_program(&self.program).is_some()
    }

    fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

/// Looks `program` up the way `execvp` would.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// One script submitted to an elevated helper.
pub struct PrivilegedSession {
    child: Child,
    forwarders: Vec<JoinHandle<()>>,
}

impl PrivilegedSession {
    pub fn submit(helper: &dyn ElevatedHelper, script: &PrivilegedScript) -> Result<Self> {
        if !helper.available() {
            return Err(GuestBoxError::PrivilegeUnavailable(format!("{helper:?}")).into());
        }
        let mut child = helper.spawn().context("spawn elevated helper")?;

        let rendered = script.render();
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin
                .write_all(rendered.as_bytes())
                .and_then(|_| stdin.flush()),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "helper stdin closed")),
        };
        if let Err(err) = written {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err).context("write privileged script");
        }

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward_lines(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward_lines(stderr, true));
        }
        tracing::debug!(pid = child.id(), ops = script.ops().len(), "privileged script submitted");
        Ok(Self { child, forwarders })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Blocks until the helper exits.
    pub fn wait(mut self) -> Result<i32> {
        let status = self.child.wait().context("wait for elevated helper")?;
        for forwarder in self.forwarders.drain(..) {
            let _ = forwarder.join();
        }
        Ok(exit_code(status))
    }

    pub fn run(helper: &dyn ElevatedHelper, script: &PrivilegedScript) -> Result<i32> {
        Self::submit(helper, script)?.wait()
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, is_stderr: bool) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(|line| line.ok()) {
            if is_stderr {
                tracing::warn!(target: "elevation::stderr", "{line}");
            } else {
                tracing::info!(target: "elevation::stdout", "{line}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ShellOp, ToolPaths};

    fn shell() -> CommandHelper {
        CommandHelper::new("sh")
    }

    #[test]
    fn test_shell_helper_is_available() {
        assert!(shell().available());
        assert!(!CommandHelper::new("/nonexistent/su").available());
    }

    #[test]
    fn test_run_reports_exit_code() {
        let mut script = PrivilegedScript::new(ToolPaths::default());
        script.push(ShellOp::Exec {
            argv: vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()],
        });
        assert_eq!(PrivilegedSession::run(&shell(), &script).unwrap(), 7);
    }

    #[test]
    fn test_exports_reach_exec_target() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("out");
        let mut script = PrivilegedScript::new(ToolPaths::default());
        script.export("GUESTBOX_VALUE", "it's quoted");
        script.push(ShellOp::Exec {
            argv: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("printf '%s' \"$GUESTBOX_VALUE\" > '{}'", out.display()),
            ],
        });

        assert_eq!(PrivilegedSession::run(&shell(), &script).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(out).unwrap(), "it's quoted");
    }

    #[test]
    fn test_unavailable_helper_is_privilege_error() {
        let script = PrivilegedScript::new(ToolPaths::default());
        let err = PrivilegedSession::submit(&CommandHelper::new("/nonexistent/su"), &script)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<GuestBoxError>(),
            Some(GuestBoxError::PrivilegeUnavailable(_))
        ));
    }
}
