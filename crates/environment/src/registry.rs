use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use elevation::{recover_stale_session, RecoveryTargets};

use crate::component::{ComponentKind, EnvironmentComponent};
use crate::context::EnvironmentContext;
use crate::error::{ComponentFailure, ComponentFailures};
use crate::hotplug::{self, HotplugCoordinator, HotplugEvent, SoundDeviceWatcher};

struct Hotplug {
    coordinator: HotplugCoordinator,
    watcher: Option<SoundDeviceWatcher>,
}

/// Ordered set of components sharing one sandbox tree and host context.
pub struct Environment {
    context: Arc<EnvironmentContext>,
    components: Vec<Arc<dyn EnvironmentComponent>>,
    hotplug: Mutex<Option<Hotplug>>,
}

impl Environment {
    pub fn new(context: EnvironmentContext) -> Self {
        Self {
            context: Arc::new(context),
            components: Vec::new(),
            hotplug: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<EnvironmentContext> {
        &self.context
    }

    /// Binds `component` to this environment and appends it to the start
    /// order.
    pub fn add_component(&mut self, component: Arc<dyn EnvironmentComponent>) -> Result<()> {
        component.binding().bind(&self.context)?;
        tracing::debug!(component = %component.kind(), position = self.components.len(), "component added");
        self.components.push(component);
        Ok(())
    }

    /// First registered component of `kind`.
    pub fn component(&self, kind: ComponentKind) -> Option<Arc<dyn EnvironmentComponent>> {
        self.components
            .iter()
            .find(|component| component.kind() == kind)
            .cloned()
    }

    pub fn components(&self) -> &[Arc<dyn EnvironmentComponent>] {
        &self.components
    }

    pub fn set_winetricks_running(&self, running: bool) {
        self.context.set_winetricks_running(running);
    }

    pub fn is_winetricks_running(&self) -> bool {
        self.context.is_winetricks_running()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.context.scratch_dir()
    }

    /// Recovers from a stale privileged session, clears the scratch area and
    /// starts every component in order. A failing component does not stop
    /// the sweep.
    pub fn start_environment_components(&self) -> Result<(), ComponentFailures> {
        if let Some(elevation) = self.context.available_elevation() {
            let targets = RecoveryTargets {
                image_fs: self.context.image_fs().clone(),
                audio_scratch_dir: self.context.audio_scratch_dir().map(Path::to_path_buf),
                app_uid: self.context.host().app_uid,
            };
            recover_stale_session(elevation, &targets);
        }
        match contents::clear_dir(self.context.scratch_dir()) {
            Ok(removed) => tracing::debug!(removed, "scratch dir cleared"),
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "clearing scratch dir failed"),
        }
        if let Err(err) = self.context.image_fs().ensure_temp_dirs() {
            tracing::warn!(error = %format!("{err:#}"), "sandbox temp dirs unavailable");
        }

        self.sweep("start", |component| component.start())
    }

    pub fn stop_environment_components(&self) -> Result<(), ComponentFailures> {
        self.stop_hotplug();
        self.sweep("stop", |component| component.stop())
    }

    fn sweep(
        &self,
        action: &str,
        run: impl Fn(&dyn EnvironmentComponent) -> Result<()>,
    ) -> Result<(), ComponentFailures> {
        let mut failures = Vec::new();
        for component in &self.components {
            match run(component.as_ref()) {
                Ok(()) => tracing::debug!(component = %component.kind(), action, "component done"),
                Err(error) => {
                    tracing::error!(component = %component.kind(), action, error = %format!("{error:#}"), "component failed");
                    failures.push(ComponentFailure {
                        kind: component.kind(),
                        error,
                    });
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ComponentFailures { failures })
        }
    }

    /// Pauses audio before suspending guest processes; hotplug restarts are
    /// ignored until [`Environment::on_resume`].
    pub fn on_pause(&self) {
        self.context.set_hotplug_enabled(false);
        for bridge in self.components.iter().filter_map(|c| c.as_audio_bridge()) {
            if let Err(err) = bridge.pause() {
                tracing::warn!(error = %format!("{err:#}"), "audio pause failed");
            }
        }
        for host in self.components.iter().filter_map(|c| c.as_process_host()) {
            host.suspend_process();
        }
    }

    /// Resumes audio first so it is ready when the guest wakes.
    pub fn on_resume(&self) {
        for bridge in self.components.iter().filter_map(|c| c.as_audio_bridge()) {
            if let Err(err) = bridge.resume() {
                tracing::warn!(error = %format!("{err:#}"), "audio resume failed");
            }
        }
        for host in self.components.iter().filter_map(|c| c.as_process_host()) {
            host.resume_process();
        }
        self.context.set_hotplug_enabled(true);
    }

    /// Restarts the first audio bridge in place. Returns false when there is
    /// none.
    pub fn restart_audio_bridge(&self) -> bool {
        match self.component(ComponentKind::AudioBridge) {
            Some(bridge) => {
                hotplug::restart_audio_bridge(&self.context, bridge.as_ref());
                true
            }
            None => false,
        }
    }

    /// Starts the hotplug coordinator for the first audio bridge, watching
    /// `device_dir` when given. Returns false when there is no audio bridge.
    pub fn start_hotplug(&self, device_dir: Option<&Path>) -> Result<bool> {
        let Some(bridge) = self.component(ComponentKind::AudioBridge) else {
            tracing::debug!("no audio bridge, hotplug disabled");
            return Ok(false);
        };
        let mut hotplug = self.hotplug.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if hotplug.is_some() {
            return Ok(true);
        }
        let coordinator = HotplugCoordinator::spawn(Arc::clone(&self.context), bridge)?;
        let watcher = match device_dir {
            Some(dir) => Some(SoundDeviceWatcher::new(dir, coordinator.sender())?),
            None => None,
        };
        *hotplug = Some(Hotplug { coordinator, watcher });
        Ok(true)
    }

    /// Feeds a topology change to the coordinator, if running.
    pub fn notify_audio_topology_changed(&self, event: HotplugEvent) -> bool {
        let hotplug = self.hotplug.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match hotplug.as_ref() {
            Some(hotplug) => {
                hotplug.coordinator.notify(event);
                true
            }
            None => false,
        }
    }

    pub fn stop_hotplug(&self) {
        let hotplug = self
            .hotplug
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(Hotplug { coordinator, watcher }) = hotplug {
            drop(watcher);
            coordinator.shutdown();
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.stop_hotplug();
    }
}
