pub mod audio;
pub mod component;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hotplug;
pub mod launcher;
pub mod registry;
pub mod shm;
pub mod socket;

#[cfg(test)]
mod test_support;

pub use audio::AudioBridgeComponent;
pub use component::{AudioBridge, Binding, ComponentKind, EnvironmentComponent, ProcessHost};
pub use context::EnvironmentContext;
pub use dispatch::{controller_queue, CallbackDispatcher, ControllerQueue};
pub use error::{ComponentFailure, ComponentFailures};
pub use hotplug::{HotplugEvent, SOUND_DEVICE_DIR};
pub use launcher::{GuestProgramLauncher, LaunchSettings, LauncherState};
pub use registry::Environment;
pub use shm::SharedMemoryServerComponent;
pub use socket::{ConnectionHandler, DiscardHandler};
