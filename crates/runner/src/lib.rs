use anyhow::Result;

pub mod command;
pub mod env;
pub mod presets;

pub use command::{CommandSource, GuestCommand, OVERRIDE_COMMAND_VAR};
pub use env::{Assembly, AssemblyInputs, SandboxLibraries};

/// Entry point for building guest invocations.
pub struct EnvironmentAssembler;

impl EnvironmentAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, inputs: &AssemblyInputs<'_>, executable: &str) -> Result<Assembly> {
        env::assemble(inputs, executable)
    }

    pub fn server_shell(&self, inputs: &AssemblyInputs<'_>, command_line: &str) -> Result<Assembly> {
        env::assemble_server_shell(inputs, command_line)
    }
}

impl Default for EnvironmentAssembler {
    fn default() -> Self {
        Self::new()
    }
}
