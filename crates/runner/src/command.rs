use std::path::Path;

use serde::{Deserialize, Serialize};

use guestbox_core::config::ExecutionMode;
use guestbox_core::env_vars::EnvVarSet;
use guestbox_core::paths::ImageFs;

pub const OVERRIDE_COMMAND_VAR: &str = "GUEST_PROGRAM_LAUNCHER_COMMAND";
pub const SHIM_DLL_VAR: &str = "HODLL";
pub const FEXCORE_SHIM_DLL: &str = "libwow64fex.dll";
pub const BOX64_SHIM_DLL: &str = "wowbox64.dll";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    Override,
    Native,
    Translated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCommand {
    pub argv: Vec<String>,
    pub source: CommandSource,
}

impl GuestCommand {
    pub fn new(argv: Vec<String>, source: CommandSource) -> Self {
        Self { argv, source }
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    pub fn render(&self) -> String {
        self.argv.join(" ")
    }
}

/// Builds the command from the `;`-separated override channel, if set.
pub fn override_command(value: Option<&str>) -> Option<GuestCommand> {
    let argv: Vec<String> = value?
        .split(';')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect();
    if argv.is_empty() {
        return None;
    }
    Some(GuestCommand::new(argv, CommandSource::Override))
}

/// Derives the command for `executable`.
///
/// Native mode runs the sandbox binary directly. Translated mode runs it
/// under the translator and selects the shim DLL through `HODLL`, unless
/// `env` already carries a caller-supplied `HODLL`.
pub fn derive_command(
    mode: ExecutionMode,
    emulator_is_fexcore: bool,
    image_fs: &ImageFs,
    executable: &str,
    env: &mut EnvVarSet,
) -> GuestCommand {
    match mode {
        ExecutionMode::Native => {
            let line = format!("{}/{}", image_fs.wine_bin_dir().display(), executable.trim());
            GuestCommand::new(split_command_line(&line), CommandSource::Native)
        }
        ExecutionMode::Translated => {
            let shim = if emulator_is_fexcore {
                FEXCORE_SHIM_DLL
            } else {
                BOX64_SHIM_DLL
            };
            if !env.contains(SHIM_DLL_VAR) {
                env.put(SHIM_DLL_VAR, shim);
            }
            let mut argv = vec![path_string(&image_fs.translator_binary())];
            argv.extend(split_command_line(executable));
            GuestCommand::new(argv, CommandSource::Translated)
        }
    }
}

/// Splits a command line on whitespace; double quotes group a token.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_override_command_tokens() {
        let command = override_command(Some("notepad.exe;/arg1;/arg2")).unwrap();
        assert_eq!(command.render(), "notepad.exe /arg1 /arg2");
        assert_eq!(command.program(), Some("notepad.exe"));
        assert_eq!(command.args(), ["/arg1", "/arg2"]);
        assert_eq!(command.source, CommandSource::Override);
    }

    #[test]
    fn test_empty_override_is_ignored() {
        assert!(override_command(None).is_none());
        assert!(override_command(Some("")).is_none());
        assert!(override_command(Some(" ; ")).is_none());
    }

    #[test]
    fn test_split_command_line_quotes() {
        let tokens = split_command_line(r#"wine explorer "/desktop=shell,800x600" "C:\My Game\game.exe""#);
        assert_eq!(
            tokens,
            vec!["wine", "explorer", "/desktop=shell,800x600", r"C:\My Game\game.exe"]
        );
        assert_eq!(split_command_line(r#"a "" b"#), vec!["a", "", "b"]);
    }

    #[test]
    fn test_native_command_has_no_shim() {
        let image_fs = ImageFs::new(PathBuf::from("/r"));
        let mut env = EnvVarSet::new();
        let command = derive_command(ExecutionMode::Native, false, &image_fs, "game.exe", &mut env);

        assert_eq!(command.render(), "/r/opt/wine/bin/game.exe");
        assert!(!env.contains(SHIM_DLL_VAR));
    }

    #[test]
    fn test_translated_command_selects_shim() {
        let image_fs = ImageFs::new(PathBuf::from("/r"));
        let mut env = EnvVarSet::new();
        let command =
            derive_command(ExecutionMode::Translated, true, &image_fs, "game.exe", &mut env);
        assert_eq!(command.argv, vec!["/r/usr/bin/box64", "game.exe"]);
        assert_eq!(env.get(SHIM_DLL_VAR), Some(FEXCORE_SHIM_DLL));

        let mut env = EnvVarSet::new();
        derive_command(ExecutionMode::Translated, false, &image_fs, "game.exe", &mut env);
        assert_eq!(env.get(SHIM_DLL_VAR), Some(BOX64_SHIM_DLL));
    }
}
