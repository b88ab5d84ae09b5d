//! Translator tuning presets.

use guestbox_core::config::PresetConfig;
use guestbox_core::env_vars::EnvVarSet;
use guestbox_core::error::GuestBoxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translator {
    Box64,
    FexCore,
}

pub const STABILITY: &str = "STABILITY";
pub const COMPATIBILITY: &str = "COMPATIBILITY";
pub const INTERMEDIATE: &str = "INTERMEDIATE";
pub const PERFORMANCE: &str = "PERFORMANCE";

const BOX64_STABILITY: &[(&str, &str)] = &[
    ("BOX64_DYNAREC_SAFEFLAGS", "2"),
    ("BOX64_DYNAREC_FASTNAN", "0"),
    ("BOX64_DYNAREC_FASTROUND", "0"),
    ("BOX64_DYNAREC_X87DOUBLE", "1"),
    ("BOX64_DYNAREC_BIGBLOCK", "0"),
    ("BOX64_DYNAREC_STRONGMEM", "2"),
    ("BOX64_DYNAREC_FORWARD", "128"),
    ("BOX64_DYNAREC_CALLRET", "0"),
    ("BOX64_DYNAREC_WAIT", "0"),
    ("BOX64_MMAP32", "0"),
];

const BOX64_COMPATIBILITY: &[(&str, &str)] = &[
    ("BOX64_DYNAREC_SAFEFLAGS", "2"),
    ("BOX64_DYNAREC_FASTNAN", "0"),
    ("BOX64_DYNAREC_FASTROUND", "0"),
    ("BOX64_DYNAREC_X87DOUBLE", "1"),
    ("BOX64_DYNAREC_BIGBLOCK", "0"),
    ("BOX64_DYNAREC_STRONGMEM", "1"),
    ("BOX64_DYNAREC_FORWARD", "128"),
    ("BOX64_DYNAREC_CALLRET", "0"),
    ("BOX64_DYNAREC_WAIT", "1"),
    ("BOX64_MMAP32", "1"),
];

const BOX64_INTERMEDIATE: &[(&str, &str)] = &[
    ("BOX64_DYNAREC_SAFEFLAGS", "2"),
    ("BOX64_DYNAREC_FASTNAN", "1"),
    ("BOX64_DYNAREC_FASTROUND", "0"),
    ("BOX64_DYNAREC_X87DOUBLE", "1"),
    ("BOX64_DYNAREC_BIGBLOCK", "1"),
    ("BOX64_DYNAREC_STRONGMEM", "0"),
    ("BOX64_DYNAREC_FORWARD", "128"),
    ("BOX64_DYNAREC_CALLRET", "0"),
    ("BOX64_DYNAREC_WAIT", "1"),
    ("BOX64_MMAP32", "1"),
];

const BOX64_PERFORMANCE: &[(&str, &str)] = &[
    ("BOX64_DYNAREC_SAFEFLAGS", "1"),
    ("BOX64_DYNAREC_FASTNAN", "1"),
    ("BOX64_DYNAREC_FASTROUND", "1"),
    ("BOX64_DYNAREC_X87DOUBLE", "0"),
    ("BOX64_DYNAREC_BIGBLOCK", "3"),
    ("BOX64_DYNAREC_STRONGMEM", "0"),
    ("BOX64_DYNAREC_FORWARD", "512"),
    ("BOX64_DYNAREC_CALLRET", "1"),
    ("BOX64_DYNAREC_WAIT", "1"),
    ("BOX64_MMAP32", "1"),
];

const FEX_STABILITY: &[(&str, &str)] = &[
    ("FEX_TSOENABLED", "1"),
    ("FEX_VECTORTSOENABLED", "1"),
    ("FEX_MEMCPYSETTSOENABLED", "1"),
    ("FEX_HALFBARRIERTSOENABLED", "1"),
    ("FEX_X87REDUCEDPRECISION", "0"),
    ("FEX_MULTIBLOCK", "0"),
];

const FEX_COMPATIBILITY: &[(&str, &str)] = &[
    ("FEX_TSOENABLED", "1"),
    ("FEX_VECTORTSOENABLED", "1"),
    ("FEX_MEMCPYSETTSOENABLED", "1"),
    ("FEX_HALFBARRIERTSOENABLED", "1"),
    ("FEX_X87REDUCEDPRECISION", "0"),
    ("FEX_MULTIBLOCK", "1"),
];

const FEX_INTERMEDIATE: &[(&str, &str)] = &[
    ("FEX_TSOENABLED", "1"),
    ("FEX_VECTORTSOENABLED", "0"),
    ("FEX_MEMCPYSETTSOENABLED", "0"),
    ("FEX_HALFBARRIERTSOENABLED", "1"),
    ("FEX_X87REDUCEDPRECISION", "1"),
    ("FEX_MULTIBLOCK", "1"),
];

const FEX_PERFORMANCE: &[(&str, &str)] = &[
    ("FEX_TSOENABLED", "0"),
    ("FEX_VECTORTSOENABLED", "0"),
    ("FEX_MEMCPYSETTSOENABLED", "0"),
    ("FEX_HALFBARRIERTSOENABLED", "0"),
    ("FEX_X87REDUCEDPRECISION", "1"),
    ("FEX_MULTIBLOCK", "1"),
];

fn builtin(translator: Translator, id: &str) -> Option<&'static [(&'static str, &'static str)]> {
    let table = match (translator, id) {
        (Translator::Box64, STABILITY) => BOX64_STABILITY,
        (Translator::Box64, COMPATIBILITY) => BOX64_COMPATIBILITY,
        (Translator::Box64, INTERMEDIATE) => BOX64_INTERMEDIATE,
        (Translator::Box64, PERFORMANCE) => BOX64_PERFORMANCE,
        (Translator::FexCore, STABILITY) => FEX_STABILITY,
        (Translator::FexCore, COMPATIBILITY) => FEX_COMPATIBILITY,
        (Translator::FexCore, INTERMEDIATE) => FEX_INTERMEDIATE,
        (Translator::FexCore, PERFORMANCE) => FEX_PERFORMANCE,
        _ => return None,
    };
    Some(table)
}

/// Resolves a preset id to its variables. Built-in ids win over custom ones
/// with the same name.
pub fn preset_env(
    translator: Translator,
    id: &str,
    custom: &PresetConfig,
) -> Result<EnvVarSet, GuestBoxError> {
    if let Some(table) = builtin(translator, id) {
        let mut env = EnvVarSet::new();
        for (key, value) in table {
            env.put(*key, *value);
        }
        return Ok(env);
    }

    let custom_table = match translator {
        Translator::Box64 => custom.box64.get(id),
        Translator::FexCore => custom.fexcore.get(id),
    };
    custom_table
        .map(EnvVarSet::from_assignments)
        .ok_or_else(|| GuestBoxError::InvalidConfig(format!("unknown {translator:?} preset: {id}")))
}
