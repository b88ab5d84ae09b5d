use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use contents::ContentsManager;
use elevation::Elevation;
use environment::{
    controller_queue, AudioBridgeComponent, DiscardHandler, Environment, EnvironmentContext,
    GuestProgramLauncher, LaunchSettings, SharedMemoryServerComponent, SOUND_DEVICE_DIR,
};
use guestbox_core::paths::ImageFs;
use host_probe::HostProbe;

use super::LaunchOverrides;

const QUEUE_POLL: Duration = Duration::from_millis(250);

pub fn execute(overrides: LaunchOverrides, hotplug: bool) -> Result<()> {
    let (paths, config) = overrides.load()?;
    let image_fs = ImageFs::from_config(&config.sandbox);
    let host = HostProbe::from_config(&config.host).probe(&config.host);

    let (dispatcher, queue) = controller_queue();
    let context = EnvironmentContext::new(image_fs, host, paths.scratch_dir.clone(), dispatcher)
        .with_audio_scratch_dir(paths.audio_scratch_dir.clone())
        .with_elevation(Elevation::from_config(&config.elevation));

    let mut environment = Environment::new(context);
    if config.shm.enabled {
        environment.add_component(Arc::new(SharedMemoryServerComponent::new(Arc::new(DiscardHandler))))?;
    }
    if config.audio.enabled {
        environment.add_component(Arc::new(AudioBridgeComponent::new(Arc::new(DiscardHandler))))?;
    }

    let installer = Arc::new(ContentsManager::from_config(&config.sandbox));
    let launcher = Arc::new(GuestProgramLauncher::new(LaunchSettings::from_config(&config)).with_installer(installer));
    let (status_tx, status_rx) = mpsc::channel();
    launcher.set_completion_callback(move |status| {
        let _ = status_tx.send(status);
    });
    environment.add_component(launcher)?;

    if let Err(failures) = environment.start_environment_components() {
        stop(&environment);
        return Err(failures.into());
    }
    if hotplug {
        start_hotplug(&environment);
    }

    let status = loop {
        queue.run_next(QUEUE_POLL);
        if let Ok(status) = status_rx.try_recv() {
            break status;
        }
    };
    tracing::info!(status, "guest process exited");
    stop(&environment);
    println!("Guest exited with status {status}.");
    Ok(())
}

fn start_hotplug(environment: &Environment) {
    let device_dir = Path::new(SOUND_DEVICE_DIR);
    let watched = device_dir.is_dir().then_some(device_dir);
    if let Err(err) = environment.start_hotplug(watched) {
        tracing::warn!(error = %format!("{err:#}"), "audio hotplug unavailable");
    }
}

fn stop(environment: &Environment) {
    if let Err(failures) = environment.stop_environment_components() {
        tracing::warn!(error = %failures, "environment shutdown incomplete");
    }
}
