//! Host process table access: descendant enumeration and signal delivery.

use std::collections::HashMap;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Parent links for every process visible under `/proc`.
pub fn parent_map() -> HashMap<u32, u32> {
    let mut parents = HashMap::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return parents;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if let Some(ppid) = read_stat(pid).map(|stat| stat.ppid) {
            parents.insert(pid, ppid);
        }
    }
    parents
}

/// All descendants of `root`, parents before children.
pub fn descendants(root: u32) -> Vec<u32> {
    descendants_in(root, &parent_map())
}

pub fn descendants_in(root: u32, parents: &HashMap<u32, u32>) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, &ppid) in parents {
        children.entry(ppid).or_default().push(pid);
    }
    for list in children.values_mut() {
        list.sort_unstable();
    }

    let mut found = Vec::new();
    let mut queue = vec![root];
    let mut cursor = 0;
    while cursor < queue.len() {
        let pid = queue[cursor];
        cursor += 1;
        if let Some(list) = children.get(&pid) {
            for &child in list {
                if child != root && !found.contains(&child) {
                    found.push(child);
                    queue.push(child);
                }
            }
        }
    }
    found
}

pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let raw = i32::try_from(pid).context("pid out of range")?;
    kill(Pid::from_raw(raw), signal).with_context(|| format!("send {signal:?} to {pid}"))?;
    Ok(())
}

/// Kills `root` and then its descendants. The descendants are listed before
/// the root dies, so reparented children are still reached. Returns how many
/// signals were delivered.
pub fn kill_tree(root: u32) -> usize {
    let mut targets = vec![root];
    targets.extend(descendants(root));

    let mut delivered = 0;
    for pid in targets {
        match send_signal(pid, Signal::SIGKILL) {
            Ok(()) => delivered += 1,
            Err(err) => tracing::debug!(pid, error = %err, "kill failed"),
        }
    }
    delivered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    pub state: char,
    pub ppid: u32,
}

pub fn read_stat(pid: u32) -> Option<ProcStat> {
    let contents = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat(&contents)
}

/// Parses `/proc/<pid>/stat`; the command name may itself contain spaces and
/// parentheses, so fields are read after the last `)`.
pub fn parse_stat(contents: &str) -> Option<ProcStat> {
    let rest = &contents[contents.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some(ProcStat { state, ppid })
}

pub fn is_alive(pid: u32) -> bool {
    matches!(read_stat(pid), Some(stat) if stat.state != 'Z' && stat.state != 'X')
}

/// Shell-style status: the exit code, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
