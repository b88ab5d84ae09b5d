use std::sync::Arc;

use anyhow::Result;

use crate::component::{Binding, ComponentKind, EnvironmentComponent};
use crate::socket::{ConnectionHandler, SocketServer};

/// Listens on `R/tmp/.sysvshm/SM0` for System V shared-memory requests.
#[derive(Debug)]
pub struct SharedMemoryServerComponent {
    binding: Binding,
    server: SocketServer,
}

impl SharedMemoryServerComponent {
    pub fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            binding: Binding::new(),
            server: SocketServer::new(ComponentKind::SharedMemoryServer.as_str(), handler),
        }
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }
}

impl EnvironmentComponent for SharedMemoryServerComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::SharedMemoryServer
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    fn start(&self) -> Result<()> {
        let context = self.binding.require()?;
        self.server.start(&context.image_fs().sysvshm_socket_path())
    }

    fn stop(&self) -> Result<()> {
        self.server.stop();
        Ok(())
    }
}
