use anyhow::{Context, Result};

use guestbox_core::env_vars::EnvVarSet;
use guestbox_core::paths::ImageFs;
use host_probe::HostProbe;
use runner::{Assembly, AssemblyInputs, EnvironmentAssembler, SandboxLibraries};

use super::LaunchOverrides;

pub fn execute(overrides: LaunchOverrides, json: bool) -> Result<()> {
    let (_, config) = overrides.load()?;
    let image_fs = ImageFs::from_config(&config.sandbox);
    let host = HostProbe::from_config(&config.host).probe(&config.host);
    let libraries = SandboxLibraries::probe(&image_fs);
    let env_overrides = EnvVarSet::from_assignments(&config.launch.env);
    let inputs = AssemblyInputs {
        image_fs: &image_fs,
        container: &config.container,
        preferences: &config.preferences,
        host: &host,
        presets: &config.presets,
        libraries: &libraries,
        overrides: &env_overrides,
    };
    let assembly = EnvironmentAssembler::new().assemble(&inputs, &config.launch.executable)?;

    if json {
        let output = serde_json::to_string_pretty(&assembly).context("render assembly JSON")?;
        println!("{}", output);
    } else {
        print!("{}", render_text(&assembly));
    }
    Ok(())
}

fn render_text(assembly: &Assembly) -> String {
    let mut output = String::new();
    for (key, value) in assembly.env.iter() {
        output.push_str(&format!("{key}={value}\n"));
    }
    output.push('\n');
    output.push_str(&format!(
        "# command ({:?}): {}\n",
        assembly.command.source,
        assembly.command.render()
    ));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use runner::{CommandSource, GuestCommand};

    #[test]
    fn test_render_text_lists_env_then_command() {
        let mut env = EnvVarSet::new();
        env.put("HOME", "/imagefs/home/xuser");
        env.put("DISPLAY", ":0");
        let assembly = Assembly {
            env,
            preload: Vec::new(),
            command: GuestCommand::new(
                vec!["notepad.exe".to_string(), "/arg1".to_string()],
                CommandSource::Override,
            ),
        };

        let text = render_text(&assembly);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "HOME=/imagefs/home/xuser");
        assert_eq!(lines[1], "DISPLAY=:0");
        assert_eq!(lines[3], "# command (Override): notepad.exe /arg1");
    }
}
