use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use guestbox_core::config::{ContainerConfig, ExecutionMode, PresetConfig, Preferences};
use guestbox_core::env_vars::EnvVarSet;
use guestbox_core::paths::ImageFs;
use guestbox_core::types::HostContext;

use crate::command::{self, path_string, GuestCommand, OVERRIDE_COMMAND_VAR};
use crate::presets::{preset_env, Translator};

pub const MAX_PLAYERS: u32 = 1;
pub const FALLBACK_DNS: &str = "8.8.4.4";
pub const INPUT_SHM_NAME: &str = "controller-shm0";

/// Renderer substring of the GPU family that breaks 32-bit mmap placement.
pub const INCOMPATIBLE_RENDERER_MARKER: &str = "Mali";
pub const MMAP32_VAR: &str = "BOX64_MMAP32";

pub const SYSVSHM_LIBRARY: &str = "libandroid-sysvshm.so";
pub const INPUT_SHIM_LIBRARY: &str = "libevshim.so";
pub const REDIRECT_LIBRARY: &str = "libredirect-bionic.so";

/// Preload libraries shipped in the sandbox tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLibraries {
    pub sysvshm: Option<PathBuf>,
    pub input_shim: PathBuf,
    pub redirect: PathBuf,
}

impl SandboxLibraries {
    /// The shared-memory bridge is optional; the other two are always listed.
    pub fn probe(image_fs: &ImageFs) -> Self {
        let lib_dir = image_fs.lib_dir();
        let sysvshm = lib_dir.join(SYSVSHM_LIBRARY);
        Self {
            sysvshm: sysvshm.exists().then_some(sysvshm),
            input_shim: lib_dir.join(INPUT_SHIM_LIBRARY),
            redirect: lib_dir.join(REDIRECT_LIBRARY),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssemblyInputs<'a> {
    pub image_fs: &'a ImageFs,
    pub container: &'a ContainerConfig,
    pub preferences: &'a Preferences,
    pub host: &'a HostContext,
    pub presets: &'a PresetConfig,
    pub libraries: &'a SandboxLibraries,
    pub overrides: &'a EnvVarSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assembly {
    pub env: EnvVarSet,
    pub preload: Vec<PathBuf>,
    pub command: GuestCommand,
}

/// Builds the full environment, preload list and command for launching
/// `executable`.
pub fn assemble(inputs: &AssemblyInputs<'_>, executable: &str) -> Result<Assembly> {
    let AssemblyInputs {
        image_fs,
        container,
        preferences,
        host,
        libraries,
        overrides,
        ..
    } = *inputs;
    let root = image_fs.root_dir();
    let mut env = EnvVarSet::new();

    env.put("EVSHIM_MAX_PLAYERS", MAX_PLAYERS.to_string());
    env.put("EVSHIM_SHM_ID", "1");
    put_translator_vars(&mut env, inputs, preferences.enable_box64_logs)?;
    env.put_all(&preset_env(Translator::FexCore, &container.fexcore_preset, inputs.presets)?);
    apply_gpu_quirks(&mut env, &host.gpu_renderer, container.execution_mode);

    env.put("HOME", path_string(&image_fs.home_dir()));
    env.put("USER", image_fs.user());
    env.put("TMPDIR", path_string(&image_fs.usr_tmp_dir()));
    env.put("DISPLAY", ":0");
    env.put(
        "PATH",
        join_paths(&[image_fs.wine_bin_dir(), image_fs.bin_dir(), host.system_bin.clone()]),
    );
    env.put("LD_LIBRARY_PATH", join_paths(&[image_fs.lib_dir(), host.system_lib.clone()]));
    env.put("ANDROID_SYSVSHM_SERVER", path_string(&image_fs.sysvshm_socket_path()));
    env.put("FONTCONFIG_PATH", under(root, "usr/etc/fonts"));
    env.put("XDG_DATA_DIRS", under(root, "usr/share"));
    env.put("XDG_CONFIG_DIRS", under(root, "usr/etc/xdg"));
    env.put("GST_PLUGIN_PATH", under(root, "usr/lib/gstreamer-1.0"));
    env.put(
        "VK_LAYER_PATH",
        join_paths(&[
            root.join("usr/share/vulkan/implicit_layer.d"),
            root.join("usr/share/vulkan/explicit_layer.d"),
        ]),
    );
    env.put("WINE_NO_DUPLICATE_EXPLORER", "1");
    env.put("PREFIX", path_string(&image_fs.usr_dir()));
    env.put("WINE_DISABLE_FULLSCREEN_HACK", "1");
    env.put("ENABLE_UTIL_LAYER", "1");
    env.put("GST_PLUGIN_FEATURE_RANK", "ximagesink:3000");
    env.put(
        "ALSA_CONFIG_PATH",
        join_paths(&[
            root.join("usr/share/alsa/alsa.conf"),
            root.join("usr/etc/alsa/conf.d/android_aserver.conf"),
        ]),
    );
    env.put("ALSA_PLUGIN_DIR", under(root, "usr/lib/alsa-lib"));
    env.put("OPENSSL_CONF", under(root, "usr/etc/tls/openssl.cnf"));
    env.put("SSL_CERT_FILE", under(root, "usr/etc/tls/cert.pem"));
    env.put("SSL_CERT_DIR", under(root, "usr/etc/tls/certs"));
    env.put("WINE_X11FORCEGLX", "1");
    env.put("WINE_GST_NO_GL", "1");
    env.put("SteamGameId", "0");

    let dns = host
        .primary_dns()
        .map(|address| address.to_string())
        .unwrap_or_else(|| FALLBACK_DNS.to_string());
    env.put("ANDROID_RESOLV_DNS", dns);
    env.put("WINE_NEW_NDIS", "1");

    let preload = preload_list(libraries, true);
    env.put("LD_PRELOAD", join_paths(&preload));
    env.put("EVSHIM_SHM_NAME", INPUT_SHM_NAME);

    if preferences.open_with_host_browser {
        env.put("WINE_OPEN_WITH_ANDROID_BROWSER", "1");
    }
    if preferences.share_clipboard {
        env.put("WINE_FROM_ANDROID_CLIPBOARD", "1");
        env.put("WINE_TO_ANDROID_CLIPBOARD", "1");
    }
    if preferences.enable_peb_logs {
        env.put("WINE_LOG_PEB_DATA", "1");
    }

    env.put_all(overrides);
    if host.gpu_renderer.contains(INCOMPATIBLE_RENDERER_MARKER) {
        env.put(MMAP32_VAR, "0");
    }

    let command = finish_command(&mut env, inputs, executable);
    Ok(Assembly {
        env,
        preload,
        command,
    })
}

/// Reduced environment for translator-server maintenance commands such as
/// `wineserver -k`.
pub fn assemble_server_shell(inputs: &AssemblyInputs<'_>, command_line: &str) -> Result<Assembly> {
    let AssemblyInputs {
        image_fs,
        container,
        host,
        libraries,
        overrides,
        ..
    } = *inputs;
    let mut env = EnvVarSet::new();
    put_translator_vars(&mut env, inputs, false)?;

    env.put("HOME", path_string(&image_fs.home_dir()));
    env.put("USER", image_fs.user());
    env.put("TMPDIR", path_string(&image_fs.tmp_dir()));
    env.put("DISPLAY", ":0");
    env.put("PATH", join_paths(&[image_fs.wine_bin_dir(), image_fs.bin_dir()]));
    env.put("LD_LIBRARY_PATH", join_paths(&[image_fs.lib_dir(), host.system_lib.clone()]));
    env.put("ANDROID_SYSVSHM_SERVER", path_string(&image_fs.sysvshm_socket_path()));
    env.put("WINE_NO_DUPLICATE_EXPLORER", "1");
    env.put("PREFIX", path_string(&image_fs.usr_dir()));
    env.put("WINE_DISABLE_FULLSCREEN_HACK", "1");
    env.put("SteamGameId", "0");

    let preload = preload_list(libraries, false);
    env.put("LD_PRELOAD", join_paths(&preload));
    env.put_all(overrides);

    let command = command::derive_command(
        container.execution_mode,
        container.uses_fexcore(),
        image_fs,
        command_line,
        &mut env,
    );
    Ok(Assembly {
        env,
        preload,
        command,
    })
}

fn put_translator_vars(env: &mut EnvVarSet, inputs: &AssemblyInputs<'_>, enable_logs: bool) -> Result<()> {
    let banner = if inputs.preferences.debug_output && enable_logs {
        "0"
    } else {
        "1"
    };
    env.put("BOX64_NOBANNER", banner);
    env.put("BOX64_DYNAREC", "1");
    if enable_logs {
        env.put("BOX64_LOG", "1");
        env.put("BOX64_DYNAREC_MISSING", "1");
    }
    env.put_all(&preset_env(Translator::Box64, &inputs.container.box64_preset, inputs.presets)?);
    env.put("BOX64_X11GLX", "1");
    env.put("BOX64_RCFILE", path_string(&inputs.image_fs.rc_file("box64")));
    Ok(())
}

fn apply_gpu_quirks(env: &mut EnvVarSet, renderer: &str, mode: ExecutionMode) {
    if renderer.contains(INCOMPATIBLE_RENDERER_MARKER) {
        env.put(MMAP32_VAR, "0");
    }
    if env.get(MMAP32_VAR) == Some("1") && mode == ExecutionMode::Translated {
        env.put("WRAPPER_DISABLE_PLACED", "1");
    }
}

fn finish_command(env: &mut EnvVarSet, inputs: &AssemblyInputs<'_>, executable: &str) -> GuestCommand {
    if let Some(command) = command::override_command(env.get(OVERRIDE_COMMAND_VAR)) {
        tracing::debug!(command = %command.render(), "using override command");
        return command;
    }
    command::derive_command(
        inputs.container.execution_mode,
        inputs.container.uses_fexcore(),
        inputs.image_fs,
        executable,
        env,
    )
}

fn preload_list(libraries: &SandboxLibraries, with_input_shim: bool) -> Vec<PathBuf> {
    let mut preload = Vec::new();
    if let Some(sysvshm) = &libraries.sysvshm {
        preload.push(sysvshm.clone());
    }
    if with_input_shim {
        preload.push(libraries.input_shim.clone());
    }
    preload.push(libraries.redirect.clone());
    preload
}

/// Colon-joins paths, skipping empty segments.
pub fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path_string(path))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

fn under(root: &Path, relative: &str) -> String {
    path_string(&root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSource, SHIM_DLL_VAR};
    use guestbox_core::config::{Config, ConfigPaths};

    struct Fixture {
        image_fs: ImageFs,
        container: ContainerConfig,
        preferences: Preferences,
        host: HostContext,
        presets: PresetConfig,
        libraries: SandboxLibraries,
        overrides: EnvVarSet,
    }

    impl Fixture {
        fn new() -> Self {
            let paths = ConfigPaths::with_dirs(Path::new("/cfg"), Path::new("/data"));
            let config = Config::default_config(&paths);
            let image_fs = ImageFs::new(PathBuf::from("/r"));
            let libraries = SandboxLibraries {
                sysvshm: Some(PathBuf::from("/r/usr/lib/libandroid-sysvshm.so")),
                input_shim: PathBuf::from("/r/usr/lib/libevshim.so"),
                redirect: PathBuf::from("/r/usr/lib/libredirect-bionic.so"),
            };
            Self {
                image_fs,
                container: config.container,
                preferences: config.preferences,
                host: HostContext {
                    gpu_renderer: "Adreno (TM) 740".to_string(),
                    dns_servers: vec!["192.168.1.1".parse().unwrap()],
                    app_data_dir: PathBuf::from("/data"),
                    app_uid: 10123,
                    system_bin: PathBuf::from("/system/bin"),
                    system_lib: PathBuf::from("/system/lib64"),
                },
                presets: PresetConfig::default(),
                libraries,
                overrides: EnvVarSet::new(),
            }
        }

        fn inputs(&self) -> AssemblyInputs<'_> {
            AssemblyInputs {
                image_fs: &self.image_fs,
                container: &self.container,
                preferences: &self.preferences,
                host: &self.host,
                presets: &self.presets,
                libraries: &self.libraries,
                overrides: &self.overrides,
            }
        }
    }

    #[test]
    fn test_path_like_variables_concatenate_sandbox_then_host() {
        let fixture = Fixture::new();
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(
            assembly.env.get("PATH"),
            Some("/r/opt/wine/bin:/r/usr/bin:/system/bin")
        );
        assert_eq!(assembly.env.get("LD_LIBRARY_PATH"), Some("/r/usr/lib:/system/lib64"));
        assert_eq!(
            assembly.env.get("LD_PRELOAD"),
            Some("/r/usr/lib/libandroid-sysvshm.so:/r/usr/lib/libevshim.so:/r/usr/lib/libredirect-bionic.so")
        );
        assert_eq!(assembly.env.get("ANDROID_RESOLV_DNS"), Some("192.168.1.1"));
        assert_eq!(assembly.env.get("TMPDIR"), Some("/r/usr/tmp"));
        assert_eq!(assembly.env.get("BOX64_RCFILE"), Some("/r/etc/config.box64rc"));
    }

    #[test]
    fn test_preload_skips_missing_bridge_library() {
        let mut fixture = Fixture::new();
        fixture.libraries.sysvshm = None;
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(
            assembly.env.get("LD_PRELOAD"),
            Some("/r/usr/lib/libevshim.so:/r/usr/lib/libredirect-bionic.so")
        );
        assert_eq!(assembly.preload.len(), 2);
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let fixture = Fixture::new();
        let first = assemble(&fixture.inputs(), "game.exe").unwrap();
        let second = assemble(&fixture.inputs(), "game.exe").unwrap();

        for key in ["PATH", "LD_PRELOAD", "LD_LIBRARY_PATH"] {
            assert_eq!(first.env.get(key), second.env.get(key));
        }
        assert_eq!(first.env, second.env);
    }

    #[test]
    fn test_incompatible_gpu_disables_mmap32_even_when_overridden() {
        let mut fixture = Fixture::new();
        fixture.host.gpu_renderer = "Mali-G78".to_string();
        fixture.overrides.put(MMAP32_VAR, "1");
        fixture.container.box64_preset = "PERFORMANCE".to_string();
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(assembly.env.get(MMAP32_VAR), Some("0"));
        assert!(!assembly.env.contains("WRAPPER_DISABLE_PLACED"));
    }

    #[test]
    fn test_mmap32_in_translated_mode_disables_placed_wrapper() {
        let fixture = Fixture::new();
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();
        assert_eq!(assembly.env.get(MMAP32_VAR), Some("1"));
        assert_eq!(assembly.env.get("WRAPPER_DISABLE_PLACED"), Some("1"));
    }

    #[test]
    fn test_overrides_win_and_keep_position() {
        let mut fixture = Fixture::new();
        fixture.overrides.put("DISPLAY", ":1");
        fixture.overrides.put("WINEDEBUG", "-all");
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(assembly.env.get("DISPLAY"), Some(":1"));
        let keys: Vec<&str> = assembly.env.iter().map(|(key, _)| key).collect();
        assert_eq!(keys.last(), Some(&"WINEDEBUG"));
        assert!(keys.iter().position(|key| *key == "DISPLAY") < keys.iter().position(|key| *key == "PATH"));
    }

    #[test]
    fn test_native_mode_runs_sandbox_binary_directly() {
        let mut fixture = Fixture::new();
        fixture.container.execution_mode = ExecutionMode::Native;
        fixture.container.emulator = "direct".to_string();
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(assembly.command.render(), "/r/opt/wine/bin/game.exe");
        assert_eq!(assembly.command.source, CommandSource::Native);
        assert!(!assembly.env.contains(SHIM_DLL_VAR));
    }

    #[test]
    fn test_translated_mode_selects_shim_by_emulator() {
        let mut fixture = Fixture::new();
        fixture.container.emulator = "fexcore".to_string();
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();
        assert_eq!(assembly.env.get(SHIM_DLL_VAR), Some("libwow64fex.dll"));
        assert_eq!(assembly.command.render(), "/r/usr/bin/box64 game.exe");

        fixture.container.emulator = "box64".to_string();
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();
        assert_eq!(assembly.env.get(SHIM_DLL_VAR), Some("wowbox64.dll"));
    }

    #[test]
    fn test_caller_shim_dll_wins_over_derived_one() {
        let mut fixture = Fixture::new();
        fixture.overrides.put(SHIM_DLL_VAR, "custom.dll");
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(assembly.env.get(SHIM_DLL_VAR), Some("custom.dll"));
        assert_eq!(assembly.command.render(), "/r/usr/bin/box64 game.exe");
    }

    #[test]
    fn test_override_command_bypasses_derivation() {
        let mut fixture = Fixture::new();
        fixture
            .overrides
            .put(OVERRIDE_COMMAND_VAR, "notepad.exe;/arg1;/arg2");
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(assembly.command.render(), "notepad.exe /arg1 /arg2");
        assert!(!assembly.env.contains(SHIM_DLL_VAR));
    }

    #[test]
    fn test_dns_fallback() {
        let mut fixture = Fixture::new();
        fixture.host.dns_servers.clear();
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();
        assert_eq!(assembly.env.get("ANDROID_RESOLV_DNS"), Some(FALLBACK_DNS));
    }

    #[test]
    fn test_preference_toggles() {
        let mut fixture = Fixture::new();
        fixture.preferences.share_clipboard = true;
        fixture.preferences.enable_box64_logs = false;
        let assembly = assemble(&fixture.inputs(), "game.exe").unwrap();

        assert_eq!(assembly.env.get("WINE_FROM_ANDROID_CLIPBOARD"), Some("1"));
        assert_eq!(assembly.env.get("WINE_TO_ANDROID_CLIPBOARD"), Some("1"));
        assert!(!assembly.env.contains("WINE_OPEN_WITH_ANDROID_BROWSER"));
        assert!(!assembly.env.contains("BOX64_LOG"));
    }

    #[test]
    fn test_unknown_preset_is_a_configuration_error() {
        let mut fixture = Fixture::new();
        fixture.container.fexcore_preset = "TURBO".to_string();
        assert!(assemble(&fixture.inputs(), "game.exe").is_err());
    }

    #[test]
    fn test_server_shell_environment() {
        let fixture = Fixture::new();
        let assembly = assemble_server_shell(&fixture.inputs(), "wineserver -k").unwrap();

        assert_eq!(assembly.command.argv, vec!["/r/usr/bin/box64", "wineserver", "-k"]);
        assert_eq!(assembly.env.get("PATH"), Some("/r/opt/wine/bin:/r/usr/bin"));
        assert_eq!(assembly.env.get("TMPDIR"), Some("/r/tmp"));
        assert!(!assembly.env.contains("BOX64_LOG"));
        assert!(!assembly.env.get("LD_PRELOAD").unwrap().contains(INPUT_SHIM_LIBRARY));
    }
}
