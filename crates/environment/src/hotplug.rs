//! Audio device hotplug: restart the audio bridge when sinks come and go.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::component::EnvironmentComponent;
use crate::context::EnvironmentContext;

pub const SOUND_DEVICE_DIR: &str = "/dev/snd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    SinkAdded(PathBuf),
    SinkRemoved(PathBuf),
}

/// Serializes audio bridge restarts on one thread. Events that queue up
/// while a restart runs are folded into a single follow-up restart.
pub struct HotplugCoordinator {
    sender: Sender<HotplugEvent>,
    thread: JoinHandle<()>,
}

impl HotplugCoordinator {
    pub fn spawn(context: Arc<EnvironmentContext>, bridge: Arc<dyn EnvironmentComponent>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("audio-hotplug".to_string())
            .spawn(move || coordinate(receiver, &context, bridge.as_ref()))
            .context("spawn hotplug coordinator")?;
        Ok(Self { sender, thread })
    }

    pub fn sender(&self) -> Sender<HotplugEvent> {
        self.sender.clone()
    }

    pub fn notify(&self, event: HotplugEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("hotplug coordinator already stopped");
        }
    }

    /// Stops once every other sender (such as a device watcher) is gone.
    pub fn shutdown(self) {
        drop(self.sender);
        if self.thread.join().is_err() {
            tracing::warn!("hotplug coordinator panicked");
        }
    }
}

fn coordinate(receiver: Receiver<HotplugEvent>, context: &EnvironmentContext, bridge: &dyn EnvironmentComponent) {
    while let Ok(event) = receiver.recv() {
        let coalesced = receiver.try_iter().count();
        if !context.hotplug_enabled() {
            tracing::debug!(?event, coalesced, "hotplug ignored while paused");
            continue;
        }
        tracing::info!(?event, coalesced, "audio topology changed, restarting audio bridge");
        restart_audio_bridge(context, bridge);
    }
}

/// Stops and starts `bridge` under the environment's restart lock; the
/// guest process is left alone.
pub fn restart_audio_bridge(context: &EnvironmentContext, bridge: &dyn EnvironmentComponent) {
    let _guard = context.lock_audio_restart();
    if let Err(err) = bridge.stop() {
        tracing::warn!(component = %bridge.kind(), error = %format!("{err:#}"), "stop during restart failed");
    }
    if let Err(err) = bridge.start() {
        tracing::error!(component = %bridge.kind(), error = %format!("{err:#}"), "restart failed");
    }
}

/// Watches the host sound device directory for playback devices.
pub struct SoundDeviceWatcher {
    _watcher: RecommendedWatcher,
}

impl SoundDeviceWatcher {
    pub fn new(dir: &Path, sender: Sender<HotplugEvent>) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else {
                    return;
                };
                for hotplug in convert_event(event) {
                    if sender.send(hotplug).is_err() {
                        return;
                    }
                }
            },
            notify::Config::default(),
        )
        .context("create sound device watcher")?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", dir.display()))?;
        Ok(Self { _watcher: watcher })
    }
}

fn convert_event(event: Event) -> Vec<HotplugEvent> {
    let make: fn(PathBuf) -> HotplugEvent = match event.kind {
        EventKind::Create(_) => HotplugEvent::SinkAdded,
        EventKind::Remove(_) => HotplugEvent::SinkRemoved,
        _ => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .filter(|path| is_playback_device(path))
        .map(make)
        .collect()
}

/// ALSA playback nodes look like `pcmC0D0p`.
pub fn is_playback_device(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("pcm") && name.ends_with('p'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_only_playback_nodes_become_events() {
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/dev/snd/pcmC0D0p"))
            .add_path(PathBuf::from("/dev/snd/pcmC0D0c"))
            .add_path(PathBuf::from("/dev/snd/controlC0"));
        assert_eq!(
            convert_event(created),
            vec![HotplugEvent::SinkAdded(PathBuf::from("/dev/snd/pcmC0D0p"))]
        );

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/dev/snd/pcmC1D0p"));
        assert_eq!(
            convert_event(removed),
            vec![HotplugEvent::SinkRemoved(PathBuf::from("/dev/snd/pcmC1D0p"))]
        );

        let modified = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/dev/snd/pcmC0D0p"));
        assert!(convert_event(modified).is_empty());
    }
}
