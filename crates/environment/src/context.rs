use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use elevation::Elevation;
use guestbox_core::paths::ImageFs;
use guestbox_core::types::HostContext;

use crate::dispatch::CallbackDispatcher;

/// State shared between an environment and the components bound to it.
#[derive(Debug)]
pub struct EnvironmentContext {
    image_fs: ImageFs,
    host: HostContext,
    scratch_dir: PathBuf,
    audio_scratch_dir: Option<PathBuf>,
    elevation: Option<Elevation>,
    dispatcher: CallbackDispatcher,
    winetricks_running: Mutex<bool>,
    hotplug_enabled: AtomicBool,
    audio_restart: Mutex<()>,
}

impl EnvironmentContext {
    pub fn new(
        image_fs: ImageFs,
        host: HostContext,
        scratch_dir: PathBuf,
        dispatcher: CallbackDispatcher,
    ) -> Self {
        Self {
            image_fs,
            host,
            scratch_dir,
            audio_scratch_dir: None,
            elevation: None,
            dispatcher,
            winetricks_running: Mutex::new(false),
            hotplug_enabled: AtomicBool::new(true),
            audio_restart: Mutex::new(()),
        }
    }

    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_audio_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.audio_scratch_dir = Some(dir);
        self
    }

    pub fn image_fs(&self) -> &ImageFs {
        &self.image_fs
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn audio_scratch_dir(&self) -> Option<&Path> {
        self.audio_scratch_dir.as_deref()
    }

    pub fn elevation(&self) -> Option<&Elevation> {
        self.elevation.as_ref()
    }

    /// The elevation helper, only when it can actually be reached.
    pub fn available_elevation(&self) -> Option<&Elevation> {
        self.elevation.as_ref().filter(|elevation| elevation.available())
    }

    pub fn dispatcher(&self) -> &CallbackDispatcher {
        &self.dispatcher
    }

    pub fn set_winetricks_running(&self, running: bool) {
        *self
            .winetricks_running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = running;
    }

    pub fn is_winetricks_running(&self) -> bool {
        *self
            .winetricks_running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn hotplug_enabled(&self) -> bool {
        self.hotplug_enabled.load(Ordering::SeqCst)
    }

    pub fn set_hotplug_enabled(&self, enabled: bool) {
        self.hotplug_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Held for the duration of an audio bridge restart.
    pub fn lock_audio_restart(&self) -> MutexGuard<'_, ()> {
        self.audio_restart
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
