use std::path::PathBuf;

use guestbox_core::config::HostConfig;
use guestbox_core::types::HostContext;
use nix::unistd::getuid;

pub mod dns;
pub mod gpu;
pub mod process;

use gpu::GpuProbe;

/// Collects the host facts environment assembly depends on.
#[derive(Debug, Clone)]
pub struct HostProbe {
    pub resolv_conf: PathBuf,
    pub gpu: GpuProbe,
    pub renderer_override: Option<String>,
}

impl HostProbe {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            resolv_conf: config.resolv_conf.clone(),
            gpu: GpuProbe::default(),
            renderer_override: config.gpu_renderer.clone(),
        }
    }

    pub fn probe(&self, config: &HostConfig) -> HostContext {
        let gpu_renderer = match &self.renderer_override {
            Some(renderer) => renderer.clone(),
            None => self.gpu.renderer(),
        };
        let dns_servers = dns::read_nameservers(&self.resolv_conf);
        let app_uid = config.app_uid.unwrap_or_else(|| getuid().as_raw());
        tracing::debug!(
            renderer = %gpu_renderer,
            dns = dns_servers.len(),
            uid = app_uid,
            "probed host"
        );
        HostContext {
            gpu_renderer,
            dns_servers,
            app_data_dir: config.app_data_dir.clone(),
            app_uid,
            system_bin: config.system_bin.clone(),
            system_lib: config.system_lib.clone(),
        }
    }
}
