use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use elevation::{CommandHelper, ElevatedHelper, Elevation, ToolPaths};
use guestbox_core::config::{Config, ConfigPaths};
use guestbox_core::paths::ImageFs;
use guestbox_core::types::HostContext;
use tempfile::TempDir;

use crate::context::EnvironmentContext;
use crate::dispatch::{controller_queue, ControllerQueue};
use crate::launcher::{GuestProgramLauncher, LaunchSettings};
use crate::registry::Environment;

pub struct Fixture {
    _temp: TempDir,
    pub config: Config,
    pub image_fs: ImageFs,
    pub environment: Environment,
    pub queue: ControllerQueue,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Privileged scripts run through `sh` with no-op system tools.
    pub fn with_shell_elevation() -> Self {
        let tools = ToolPaths {
            mount: PathBuf::from("true"),
            umount: PathBuf::from("true"),
            chown: PathBuf::from("true"),
            pkill: PathBuf::from("true"),
        };
        Self::with_elevation(Arc::new(CommandHelper::new("sh")), tools)
    }

    pub fn with_elevation(helper: Arc<dyn ElevatedHelper>, tools: ToolPaths) -> Self {
        Self::build(Some(Elevation::with_helper(helper, tools)))
    }

    /// A directory under the fixture root but outside the app data dir.
    pub fn external_dir(&self, name: &str) -> PathBuf {
        let dir = self._temp.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn build(elevation: Option<Elevation>) -> Self {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::with_dirs(&temp.path().join("config"), &temp.path().join("data"));
        let mut config = Config::default_config(&paths);
        config.host.system_bin = PathBuf::from("/bin");
        config.host.system_lib = PathBuf::from("/lib");

        let image_fs = ImageFs::from_config(&config.sandbox);
        fs::create_dir_all(image_fs.root_dir()).unwrap();
        let host = HostContext {
            gpu_renderer: "Adreno (TM) 740".to_string(),
            dns_servers: Vec::new(),
            app_data_dir: paths.data_dir.clone(),
            app_uid: 10123,
            system_bin: config.host.system_bin.clone(),
            system_lib: config.host.system_lib.clone(),
        };

        let (dispatcher, queue) = controller_queue();
        let mut context = EnvironmentContext::new(image_fs.clone(), host, paths.scratch_dir.clone(), dispatcher)
            .with_audio_scratch_dir(paths.audio_scratch_dir.clone());
        if let Some(elevation) = elevation {
            context = context.with_elevation(elevation);
        }

        Self {
            _temp: temp,
            config,
            image_fs,
            environment: Environment::new(context),
            queue,
        }
    }

    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings::from_config(&self.config)
    }

    pub fn add_launcher(&mut self) -> Arc<GuestProgramLauncher> {
        let launcher = Arc::new(GuestProgramLauncher::new(self.launch_settings()));
        self.environment.add_component(launcher.clone()).unwrap();
        launcher
    }

    pub fn install_wine_tool(&self, name: &str, script: &str) {
        let dir = self.image_fs.wine_bin_dir();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// System tool stand-ins that append `<tool> <args>` to a shared log.
pub struct ToolLog {
    _dir: TempDir,
    log: PathBuf,
    pub tools: ToolPaths,
}

impl ToolLog {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("calls.log");
        let tool = |name: &str| -> PathBuf {
            let path = dir.path().join(name);
            let script = format!("#!/bin/sh\necho \"{name} $*\" >> '{}'\n", log.display());
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        let tools = ToolPaths {
            mount: tool("mount"),
            umount: tool("umount"),
            chown: tool("chown"),
            pkill: tool("pkill"),
        };
        Self {
            _dir: dir,
            log,
            tools,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, line: &str) -> usize {
        self.lines().iter().filter(|logged| *logged == line).count()
    }
}

pub fn unmount_line(target: &Path) -> String {
    format!("umount -l {}", target.display())
}

pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
