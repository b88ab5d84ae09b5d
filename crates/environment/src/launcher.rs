//! The guest program launcher: one guest process at a time, started
//! normally or through a privileged session.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use anyhow::{Context, Result};
use nix::sys::signal::Signal;

use contents::ContentInstaller;
use elevation::{plan_launch, plan_teardown, Elevation, MountLedger, PrivilegedLaunch, PrivilegedScript};
use guestbox_core::config::{Config, ContainerConfig, PresetConfig, Preferences};
use guestbox_core::env_vars::EnvVarSet;
use guestbox_core::error::GuestBoxError;
use guestbox_core::ids::LaunchId;
use guestbox_core::paths::ImageFs;
use guestbox_core::types::LaunchRecord;
use host_probe::process::{exit_code, kill_tree, send_signal};
use runner::{Assembly, AssemblyInputs, EnvironmentAssembler, SandboxLibraries};

use crate::component::{Binding, ComponentKind, EnvironmentComponent, ProcessHost};
use crate::context::EnvironmentContext;

/// Exit status reported when the guest could not be spawned at all.
pub const SPAWN_FAILED_STATUS: i32 = -1;
pub const INPUT_SHM_SIZE: u64 = 64;
pub const SERVER_SHUTDOWN_COMMAND: &str = "wineserver -k";

pub type CompletionCallback = Arc<dyn Fn(i32) + Send + Sync>;
pub type PreLaunchHook = Arc<dyn Fn(&ImageFs) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LauncherState {
    #[default]
    Idle,
    Starting,
    Running,
    Suspended,
    Terminated,
}

/// What to launch and how.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub executable: String,
    pub working_dir: Option<PathBuf>,
    pub env_overrides: EnvVarSet,
    pub binding_paths: Vec<PathBuf>,
    pub container: ContainerConfig,
    pub preferences: Preferences,
    pub presets: PresetConfig,
}

impl LaunchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            executable: config.launch.executable.clone(),
            working_dir: config.launch.working_dir.clone(),
            env_overrides: EnvVarSet::from_assignments(&config.launch.env),
            binding_paths: config.launch.binding_paths.clone(),
            container: config.container.clone(),
            preferences: config.preferences.clone(),
            presets: config.presets.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedProcess {
    pid: u32,
    generation: u64,
}

#[derive(Debug, Default)]
struct Tracking {
    state: LauncherState,
    tracked: Option<TrackedProcess>,
    generation: u64,
    last_launch: Option<LaunchRecord>,
}

pub struct GuestProgramLauncher {
    binding: Binding,
    settings: Mutex<LaunchSettings>,
    tracking: Arc<Mutex<Tracking>>,
    callback: Mutex<Option<CompletionCallback>>,
    pre_launch: Mutex<Option<PreLaunchHook>>,
    installer: Option<Arc<dyn ContentInstaller>>,
    assembler: EnvironmentAssembler,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GuestProgramLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self {
            binding: Binding::new(),
            settings: Mutex::new(settings),
            tracking: Arc::new(Mutex::new(Tracking::default())),
            callback: Mutex::new(None),
            pre_launch: Mutex::new(None),
            installer: None,
            assembler: EnvironmentAssembler::new(),
        }
    }

    pub fn with_installer(mut self, installer: Arc<dyn ContentInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn configure(&self, update: impl FnOnce(&mut LaunchSettings)) {
        update(&mut lock(&self.settings));
    }

    pub fn settings(&self) -> LaunchSettings {
        lock(&self.settings).clone()
    }

    /// Called with the exit status of each launched process, at most once
    /// per launch, on the controller's queue.
    pub fn set_completion_callback(&self, callback: impl Fn(i32) + Send + Sync + 'static) {
        *lock(&self.callback) = Some(Arc::new(callback));
    }

    pub fn set_pre_launch_hook(&self, hook: impl Fn(&ImageFs) -> Result<()> + Send + Sync + 'static) {
        *lock(&self.pre_launch) = Some(Arc::new(hook));
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.tracking).tracked.map(|tracked| tracked.pid)
    }

    pub fn state(&self) -> LauncherState {
        lock(&self.tracking).state
    }

    pub fn last_launch(&self) -> Option<LaunchRecord> {
        lock(&self.tracking).last_launch.clone()
    }

    /// Starts the guest program and returns its pid. `Ok(None)` means the
    /// process could not be spawned; the completion callback then receives
    /// [`SPAWN_FAILED_STATUS`].
    pub fn launch(&self) -> Result<Option<u32>> {
        let context = self.binding.require()?;
        let mut tracking = lock(&self.tracking);
        if let Some(previous) = tracking.tracked {
            tracing::warn!(pid = previous.pid, "replacing tracked guest process");
        }
        let previous_state = tracking.state;
        tracking.state = LauncherState::Starting;
        let result = self.launch_locked(&context, &mut tracking);
        if result.is_err() {
            tracking.state = if tracking.tracked.is_some() {
                previous_state
            } else {
                LauncherState::Idle
            };
        }
        result
    }

    fn launch_locked(&self, context: &Arc<EnvironmentContext>, tracking: &mut Tracking) -> Result<Option<u32>> {
        let settings = self.settings();
        let image_fs = context.image_fs();

        if let Some(installer) = &self.installer {
            installer.ensure_assets(image_fs, &settings.container)?;
        }
        let hook = lock(&self.pre_launch).clone();
        if let Some(hook) = hook {
            hook(image_fs).context("pre-launch hook")?;
        }
        image_fs.ensure_temp_dirs()?;
        create_input_shm(&image_fs.input_shm_path())?;

        let assembly = self.assemble(context, &settings, &settings.executable, false)?;
        if assembly.command.argv.is_empty() {
            return Err(GuestBoxError::InvalidConfig("guest command is empty".to_string()).into());
        }

        let privileged = settings.container.run_as_root;
        let privileged_plan = if privileged {
            let elevation = context
                .available_elevation()
                .cloned()
                .ok_or_else(|| GuestBoxError::PrivilegeUnavailable("no elevated helper for run_as_root".to_string()))?;
            let wine_prefix = settings.container.wine_prefix();
            let mut ledger = MountLedger::new();
            let request = PrivilegedLaunch {
                image_fs,
                wine_prefix: &wine_prefix,
                drives: &settings.container.drives,
                binding_paths: &settings.binding_paths,
                app_data_dir: &context.host().app_data_dir,
                host_system_bin: &context.host().system_bin,
                env: &assembly.env,
                argv: &assembly.command.argv,
            };
            let script = plan_launch(&request, elevation.tools(), &mut ledger)?;
            let teardown = Teardown {
                elevation,
                wine_prefix,
                app_uid: context.host().app_uid,
            };
            Some((script, ledger, teardown))
        } else {
            if !settings.binding_paths.is_empty() {
                tracing::info!(
                    count = settings.binding_paths.len(),
                    "binding paths need a privileged launch, skipping"
                );
            }
            None
        };

        tracking.generation += 1;
        let mut record = LaunchRecord::new(assembly.command.argv.clone(), privileged);
        let waiter = Waiter {
            tracking: Arc::clone(&self.tracking),
            context: Arc::clone(context),
            generation: tracking.generation,
            launch_id: record.launch_id,
            callback: lock(&self.callback).clone(),
        };

        let spawned = match privileged_plan {
            Some((script, ledger, teardown)) => spawn_privileged(&script, ledger, teardown, waiter.clone()),
            None => {
                let working_dir = settings
                    .working_dir
                    .clone()
                    .unwrap_or_else(|| image_fs.root_dir().to_path_buf());
                spawn_normal(&assembly, &working_dir, settings.preferences.debug_output, waiter.clone())
            }
        };

        match spawned {
            Ok(pid) => {
                record.pid = Some(pid);
                tracing::info!(
                    pid,
                    launch_id = %record.launch_id,
                    privileged,
                    command = %assembly.command.render(),
                    "guest process started"
                );
                tracking.tracked = Some(TrackedProcess {
                    pid,
                    generation: tracking.generation,
                });
                tracking.state = LauncherState::Running;
                tracking.last_launch = Some(record);
                Ok(Some(pid))
            }
            Err(err) => {
                tracing::error!(launch_id = %record.launch_id, error = %format!("{err:#}"), "guest process failed to start");
                record.finish(SPAWN_FAILED_STATUS);
                tracking.tracked = None;
                tracking.state = LauncherState::Idle;
                tracking.last_launch = Some(record);
                waiter.post(SPAWN_FAILED_STATUS);
                Ok(None)
            }
        }
    }

    fn assemble(
        &self,
        context: &EnvironmentContext,
        settings: &LaunchSettings,
        command_line: &str,
        server_shell: bool,
    ) -> Result<Assembly> {
        let image_fs = context.image_fs();
        let libraries = SandboxLibraries::probe(image_fs);
        let inputs = AssemblyInputs {
            image_fs,
            container: &settings.container,
            preferences: &settings.preferences,
            host: context.host(),
            presets: &settings.presets,
            libraries: &libraries,
            overrides: &settings.env_overrides,
        };
        if server_shell {
            self.assembler.server_shell(&inputs, command_line)
        } else {
            self.assembler.assemble(&inputs, command_line)
        }
    }

    /// Runs a translator-server maintenance command with the reduced
    /// server-shell environment and returns its combined output.
    pub fn exec_shell_command(&self, command_line: &str) -> Result<String> {
        let context = self.binding.require()?;
        let settings = self.settings();
        let assembly = self.assemble(&context, &settings, command_line, true)?;
        let program = assembly
            .command
            .program()
            .ok_or_else(|| GuestBoxError::InvalidConfig("shell command is empty".to_string()))?;

        let output = Command::new(program)
            .args(assembly.command.args())
            .env_clear()
            .envs(assembly.env.iter())
            .current_dir(context.image_fs().root_dir())
            .stdin(Stdio::null())
            .output()
            .map_err(|err| GuestBoxError::Process(format!("run {command_line}: {err}")))?;
        tracing::debug!(command = command_line, status = exit_code(output.status), "shell command finished");

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    /// Kills the guest tree and launches the guest program again.
    pub fn restart_translator_server(&self) -> Result<Option<u32>> {
        self.stop()?;
        self.launch()
    }

    fn signal_tracked(&self, signal: Signal, next: LauncherState) {
        let mut tracking = lock(&self.tracking);
        let Some(tracked) = tracking.tracked else {
            return;
        };
        match send_signal(tracked.pid, signal) {
            Ok(()) => tracking.state = next,
            Err(err) => tracing::warn!(pid = tracked.pid, error = %err, "signal delivery failed"),
        }
    }
}

impl EnvironmentComponent for GuestProgramLauncher {
    fn kind(&self) -> ComponentKind {
        ComponentKind::GuestProgramLauncher
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    fn start(&self) -> Result<()> {
        self.launch().map(|_| ())
    }

    fn stop(&self) -> Result<()> {
        let mut tracking = lock(&self.tracking);
        if let Some(tracked) = tracking.tracked.take() {
            let signalled = kill_tree(tracked.pid);
            tracing::info!(pid = tracked.pid, signalled, "stopped guest process tree");
        }
        tracking.state = LauncherState::Idle;
        if self.binding.context().is_some() {
            if let Err(err) = self.exec_shell_command(SERVER_SHUTDOWN_COMMAND) {
                tracing::debug!(error = %format!("{err:#}"), "translator server shutdown failed");
            }
        }
        Ok(())
    }

    fn as_process_host(&self) -> Option<&dyn ProcessHost> {
        Some(self)
    }
}

impl ProcessHost for GuestProgramLauncher {
    fn suspend_process(&self) {
        self.signal_tracked(Signal::SIGSTOP, LauncherState::Suspended);
    }

    fn resume_process(&self) {
        self.signal_tracked(Signal::SIGCONT, LauncherState::Running);
    }
}

/// Completion path of one launch.
#[derive(Clone)]
struct Waiter {
    tracking: Arc<Mutex<Tracking>>,
    context: Arc<EnvironmentContext>,
    generation: u64,
    launch_id: LaunchId,
    callback: Option<CompletionCallback>,
}

impl Waiter {
    fn finish(self, status: i32) {
        {
            let mut tracking = lock(&self.tracking);
            if tracking.tracked.is_some_and(|tracked| tracked.generation == self.generation) {
                tracking.tracked = None;
                tracking.state = LauncherState::Terminated;
            }
            if let Some(record) = tracking
                .last_launch
                .as_mut()
                .filter(|record| record.launch_id == self.launch_id)
            {
                record.finish(status);
            }
        }
        tracing::info!(launch_id = %self.launch_id, status, "guest process exited");
        self.post(status);

        let mut tracking = lock(&self.tracking);
        if tracking.generation == self.generation && tracking.state == LauncherState::Terminated {
            tracking.state = LauncherState::Idle;
        }
    }

    fn post(&self, status: i32) {
        if self.context.is_winetricks_running() {
            tracing::debug!(launch_id = %self.launch_id, status, "winetricks running, completion suppressed");
            return;
        }
        let Some(callback) = self.callback.clone() else {
            return;
        };
        if !self.context.dispatcher().post(move || callback(status)) {
            tracing::debug!(launch_id = %self.launch_id, "controller queue closed");
        }
    }
}

/// Undoes a privileged launch: unmounts and gives the prefix back.
struct Teardown {
    elevation: Elevation,
    wine_prefix: PathBuf,
    app_uid: u32,
}

impl Teardown {
    fn run(self, ledger: &mut MountLedger) {
        let mounts = ledger.len();
        let script = plan_teardown(ledger, &self.wine_prefix, self.app_uid, self.elevation.tools());
        match self.elevation.run(&script) {
            Ok(0) => tracing::debug!(mounts, "privileged teardown finished"),
            Ok(status) => tracing::warn!(mounts, status, "privileged teardown exited with failure"),
            Err(err) => tracing::warn!(mounts, error = %format!("{err:#}"), "privileged teardown failed"),
        }
    }
}

fn spawn_normal(assembly: &Assembly, working_dir: &Path, debug_output: bool, waiter: Waiter) -> Result<u32> {
    let program = assembly
        .command
        .program()
        .ok_or_else(|| GuestBoxError::InvalidConfig("guest command is empty".to_string()))?;
    let mut command = Command::new(program);
    command
        .args(assembly.command.args())
        .env_clear()
        .envs(assembly.env.iter())
        .current_dir(working_dir)
        .stdin(Stdio::null());
    if !debug_output {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    let mut child = command
        .spawn()
        .map_err(|err| GuestBoxError::Process(format!("spawn {program}: {err}")))?;
    let pid = child.id();

    thread::Builder::new()
        .name(format!("guest-wait-{pid}"))
        .spawn(move || {
            let status = match child.wait() {
                Ok(status) => exit_code(status),
                Err(err) => {
                    tracing::warn!(pid, error = %err, "waiting for guest process failed");
                    SPAWN_FAILED_STATUS
                }
            };
            waiter.finish(status);
        })
        .context("spawn guest waiter")?;
    Ok(pid)
}

fn spawn_privileged(
    script: &PrivilegedScript,
    mut ledger: MountLedger,
    teardown: Teardown,
    waiter: Waiter,
) -> Result<u32> {
    let session = match teardown.elevation.submit(script) {
        Ok(session) => session,
        Err(err) => {
            teardown.run(&mut ledger);
            return Err(err);
        }
    };
    let pid = session.pid();

    // Taken by whichever side runs teardown: the waiter, or this thread when
    // the waiter never starts.
    let pending = Arc::new(Mutex::new(Some((teardown, ledger))));
    let spawned = {
        let pending = Arc::clone(&pending);
        thread::Builder::new()
            .name(format!("guest-wait-{pid}"))
            .spawn(move || {
                let status = session.wait().unwrap_or_else(|err| {
                    tracing::warn!(pid, error = %format!("{err:#}"), "waiting for privileged session failed");
                    SPAWN_FAILED_STATUS
                });
                waiter.finish(status);
                run_pending_teardown(&pending);
            })
    };
    if let Err(err) = spawned {
        tracing::warn!(pid, "privileged session left without a waiter");
        run_pending_teardown(&pending);
        return Err(err).context("spawn privileged waiter");
    }
    Ok(pid)
}

fn run_pending_teardown(pending: &Mutex<Option<(Teardown, MountLedger)>>) {
    if let Some((teardown, mut ledger)) = lock(pending).take() {
        teardown.run(&mut ledger);
    }
}

fn create_input_shm(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.set_len(INPUT_SHM_SIZE)
        .with_context(|| format!("size {}", path.display()))?;
    Ok(())
}
