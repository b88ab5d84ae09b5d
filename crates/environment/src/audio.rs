use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::component::{AudioBridge, Binding, ComponentKind, EnvironmentComponent};
use crate::socket::{ConnectionHandler, SocketServer};

/// Listens on `R/tmp/.sound/AS0` for the guest's audio client.
#[derive(Debug)]
pub struct AudioBridgeComponent {
    binding: Binding,
    server: SocketServer,
    paused: AtomicBool,
}

impl AudioBridgeComponent {
    pub fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            binding: Binding::new(),
            server: SocketServer::new(ComponentKind::AudioBridge.as_str(), handler),
            paused: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl EnvironmentComponent for AudioBridgeComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::AudioBridge
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    fn start(&self) -> Result<()> {
        let context = self.binding.require()?;
        self.server.start(&context.image_fs().audio_socket_path())?;
        self.server.handler().set_paused(self.is_paused());
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.server.stop();
        Ok(())
    }

    fn as_audio_bridge(&self) -> Option<&dyn AudioBridge> {
        Some(self)
    }
}

impl AudioBridge for AudioBridgeComponent {
    fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        self.server.handler().set_paused(true);
        tracing::debug!(component = %ComponentKind::AudioBridge, "paused");
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        self.server.handler().set_paused(false);
        tracing::debug!(component = %ComponentKind::AudioBridge, "resumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedMemoryServerComponent;
    use crate::socket::DiscardHandler;
    use crate::test_support::Fixture;

    #[test]
    fn test_socket_components_listen_inside_sandbox() {
        let mut fx = Fixture::new();
        let shm = Arc::new(SharedMemoryServerComponent::new(Arc::new(DiscardHandler)));
        let audio = Arc::new(AudioBridgeComponent::new(Arc::new(DiscardHandler)));
        fx.environment.add_component(shm.clone()).unwrap();
        fx.environment.add_component(audio.clone()).unwrap();

        fx.environment.start_environment_components().unwrap();
        assert!(shm.is_running());
        assert!(fx.image_fs.sysvshm_socket_path().exists());
        assert!(fx.image_fs.audio_socket_path().exists());

        audio.pause().unwrap();
        assert!(fx.environment.restart_audio_bridge());
        assert!(audio.is_running());
        assert!(audio.is_paused());
        audio.resume().unwrap();
        assert!(!audio.is_paused());

        fx.environment.stop_environment_components().unwrap();
        assert!(!audio.is_running());
        assert!(!fx.image_fs.audio_socket_path().exists());
    }

    #[test]
    fn test_unbound_bridge_cannot_start_but_can_stop() {
        let audio = AudioBridgeComponent::new(Arc::new(DiscardHandler));
        assert!(audio.start().is_err());
        audio.stop().unwrap();
    }
}
