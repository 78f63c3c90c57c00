use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::EffectError;
use super::format::EffectDef;
use crate::gpu::pipeline::with_uniform_block;

/// Resolve the assets directory once (CWD-relative → exe-relative → macOS bundle).
pub fn assets_dir() -> &'static Path {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        // 1. CWD-relative (dev workflow)
        let cwd = PathBuf::from("assets");
        if cwd.join("effects").is_dir() {
            log::info!("Assets: CWD-relative ({})", cwd.display());
            return cwd;
        }

        // 2. Exe-relative (installed binary)
        if let Ok(exe) = std::env::current_exe() {
            if let Some(exe_dir) = exe.parent() {
                let beside = exe_dir.join("assets");
                if beside.join("effects").is_dir() {
                    log::info!("Assets: exe-relative ({})", beside.display());
                    return beside;
                }

                // 3. macOS .app bundle: exe is in Foo.app/Contents/MacOS/
                let bundle = exe_dir.join("../Resources/assets");
                if bundle.join("effects").is_dir() {
                    let canonical = bundle.canonicalize().unwrap_or(bundle);
                    log::info!("Assets: macOS bundle ({})", canonical.display());
                    return canonical;
                }
            }
        }

        // Embedded builtins still work without an assets directory
        log::debug!("Assets directory not found; using embedded effects only");
        cwd
    })
}

/// `.pfx` definitions compiled into the binary.
const BUILTIN_EFFECTS: &[(&str, &str)] = &[
    ("passthrough.pfx", include_str!("../../../../assets/effects/passthrough.pfx")),
    ("invert.pfx", include_str!("../../../../assets/effects/invert.pfx")),
    ("hue_shift.pfx", include_str!("../../../../assets/effects/hue_shift.pfx")),
    ("mirror.pfx", include_str!("../../../../assets/effects/mirror.pfx")),
    ("scanlines.pfx", include_str!("../../../../assets/effects/scanlines.pfx")),
    ("feedback.pfx", include_str!("../../../../assets/effects/feedback.pfx")),
];

/// Shader sources for the builtin effects, keyed by path under `assets/shaders`.
const BUILTIN_SHADERS: &[(&str, &str)] = &[
    (
        "effects/passthrough.wgsl",
        include_str!("../../../../assets/shaders/effects/passthrough.wgsl"),
    ),
    (
        "effects/invert.wgsl",
        include_str!("../../../../assets/shaders/effects/invert.wgsl"),
    ),
    (
        "effects/hue_shift.wgsl",
        include_str!("../../../../assets/shaders/effects/hue_shift.wgsl"),
    ),
    (
        "effects/mirror.wgsl",
        include_str!("../../../../assets/shaders/effects/mirror.wgsl"),
    ),
    (
        "effects/scanlines.wgsl",
        include_str!("../../../../assets/shaders/effects/scanlines.wgsl"),
    ),
];

pub fn parse_effect(json: &str, source_path: Option<PathBuf>) -> Result<EffectDef, serde_json::Error> {
    let mut def: EffectDef = serde_json::from_str(json)?;
    def.source_path = source_path;
    Ok(def)
}

/// Definitions embedded in the binary. A malformed builtin is logged and skipped.
pub fn builtin_effects() -> Vec<EffectDef> {
    BUILTIN_EFFECTS
        .iter()
        .filter_map(|(name, json)| match parse_effect(json, None) {
            Ok(def) => Some(def),
            Err(e) => {
                log::error!("Builtin effect {name} is malformed: {e}");
                None
            }
        })
        .collect()
}

/// Parse every `.pfx` in `dir`, sorted by file name. Unreadable or
/// malformed files are logged and skipped.
pub fn scan_effects_directory(dir: &Path) -> Vec<EffectDef> {
    if !dir.is_dir() {
        log::debug!("Effects directory not found: {}", dir.display());
        return Vec::new();
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "pfx"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut effects = Vec::new();
    for entry in entries {
        let path = entry.path();
        match std::fs::read_to_string(&path) {
            Ok(json) => match parse_effect(&json, Some(path.clone())) {
                Ok(effect) => {
                    log::info!("Found effect: {} ({})", effect.name, path.display());
                    effects.push(effect);
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {e}", path.display());
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {e}", path.display());
            }
        }
    }
    effects
}

fn builtin_shader(shader_rel: &str) -> Option<&'static str> {
    BUILTIN_SHADERS
        .iter()
        .find(|(rel, _)| *rel == shader_rel)
        .map(|(_, src)| *src)
}

/// Fragment source for an effect, with the uniform block prepended. The
/// file on disk wins so edits hot-reload; embedded builtins cover a missing
/// assets directory.
pub fn load_effect_source(shader_rel: &str) -> Result<String, EffectError> {
    load_effect_source_from(&assets_dir().join("shaders"), shader_rel)
}

pub fn load_effect_source_from(shaders_dir: &Path, shader_rel: &str) -> Result<String, EffectError> {
    let path = shaders_dir.join(shader_rel);
    match std::fs::read_to_string(&path) {
        Ok(source) => Ok(with_uniform_block(&source)),
        Err(e) => match builtin_shader(shader_rel) {
            Some(source) => Ok(with_uniform_block(source)),
            None => Err(EffectError::ShaderLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        },
    }
}
