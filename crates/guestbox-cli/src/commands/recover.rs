use std::path::PathBuf;

use anyhow::Result;

use elevation::{recover_stale_session, Elevation, RecoveryTargets};
use guestbox_core::paths::ImageFs;
use host_probe::HostProbe;

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let (paths, config) = super::load_config(config_path)?;
    let elevation = Elevation::from_config(&config.elevation);
    if !elevation.available() {
        println!(
            "Elevated helper {} not found, nothing to recover.",
            config.elevation.helper.display()
        );
        return Ok(());
    }

    let host = HostProbe::from_config(&config.host).probe(&config.host);
    let targets = RecoveryTargets {
        image_fs: ImageFs::from_config(&config.sandbox),
        audio_scratch_dir: Some(paths.audio_scratch_dir),
        app_uid: host.app_uid,
    };
    match recover_stale_session(&elevation, &targets) {
        Some(status) => println!("Recovery finished with status {status}."),
        None => println!("Recovery skipped, see log for details."),
    }
    Ok(())
}
