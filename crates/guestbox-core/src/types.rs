use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::LaunchId;

/// Facts about the host collected once per environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostContext {
    pub gpu_renderer: String,
    pub dns_servers: Vec<IpAddr>,
    pub app_data_dir: PathBuf,
    pub app_uid: u32,
    pub system_bin: PathBuf,
    pub system_lib: PathBuf,
}

impl HostContext {
    pub fn primary_dns(&self) -> Option<IpAddr> {
        self.dns_servers.first().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub launch_id: LaunchId,
    pub argv: Vec<String>,
    pub pid: Option<u32>,
    pub privileged: bool,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub exit_status: Option<i32>,
}

impl LaunchRecord {
    pub fn new(argv: Vec<String>, privileged: bool) -> Self {
        Self {
            launch_id: LaunchId::new(),
            argv,
            pid: None,
            privileged,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            exit_status: None,
        }
    }

    pub fn finish(&mut self, exit_status: i32) {
        self.ended_at = Some(OffsetDateTime::now_utc());
        self.exit_status = Some(exit_status);
    }
}
