use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use anyhow::Result;

use guestbox_core::error::GuestBoxError;

use crate::context::EnvironmentContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    GuestProgramLauncher,
    AudioBridge,
    SharedMemoryServer,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::GuestProgramLauncher => "guest-program-launcher",
            ComponentKind::AudioBridge => "audio-bridge",
            ComponentKind::SharedMemoryServer => "shared-memory-server",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Back-reference from a component to the environment it was added to.
/// Set once on registration.
#[derive(Debug, Default)]
pub struct Binding {
    context: OnceLock<Weak<EnvironmentContext>>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, context: &Arc<EnvironmentContext>) -> Result<(), GuestBoxError> {
        self.context
            .set(Arc::downgrade(context))
            .map_err(|_| GuestBoxError::AlreadyBound)
    }

    pub fn is_bound(&self) -> bool {
        self.context.get().is_some()
    }

    /// The owning environment, if bound and still alive.
    pub fn context(&self) -> Option<Arc<EnvironmentContext>> {
        self.context.get().and_then(Weak::upgrade)
    }

    pub fn require(&self) -> Result<Arc<EnvironmentContext>> {
        self.context().ok_or_else(|| {
            GuestBoxError::InvalidConfig("component is not bound to an environment".to_string()).into()
        })
    }
}

pub trait EnvironmentComponent: Send + Sync {
    fn kind(&self) -> ComponentKind;

    fn binding(&self) -> &Binding;

    /// Must tolerate a previous run that stopped half way.
    fn start(&self) -> Result<()>;

    /// Must be safe on a component that never started.
    fn stop(&self) -> Result<()>;

    fn as_process_host(&self) -> Option<&dyn ProcessHost> {
        None
    }

    fn as_audio_bridge(&self) -> Option<&dyn AudioBridge> {
        None
    }
}

/// Components that own a guest process.
pub trait ProcessHost {
    fn suspend_process(&self);
    fn resume_process(&self);
}

pub trait AudioBridge {
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
}
