pub mod mounts;
pub mod plan;
pub mod recovery;
pub mod script;
pub mod session;

use std::sync::Arc;

use anyhow::Result;

use guestbox_core::config::ElevationConfig;

pub use mounts::MountLedger;
pub use plan::{plan_launch, plan_teardown, PrivilegedLaunch};
pub use recovery::{plan_recovery, recover_stale_session, RecoveryTargets};
pub use script::{PrivilegedScript, ShellOp, ToolPaths};
pub use session::{CommandHelper, ElevatedHelper, PrivilegedSession};

/// Entry point for running privileged scripts through one helper.
#[derive(Clone, Debug)]
pub struct Elevation {
    helper: Arc<dyn ElevatedHelper>,
    tools: ToolPaths,
}

impl Elevation {
    pub fn from_config(config: &ElevationConfig) -> Self {
        Self {
            helper: Arc::new(CommandHelper::new(config.helper.clone())),
            tools: ToolPaths::from_config(config),
        }
    }

    pub fn with_helper(helper: Arc<dyn ElevatedHelper>, tools: ToolPaths) -> Self {
        Self { helper, tools }
    }

    pub fn available(&self) -> bool {
        self.helper.available()
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub fn submit(&self, script: &PrivilegedScript) -> Result<PrivilegedSession> {
        PrivilegedSession::submit(self.helper.as_ref(), script)
    }

    pub fn run(&self, script: &PrivilegedScript) -> Result<i32> {
        PrivilegedSession::run(self.helper.as_ref(), script)
    }
}
