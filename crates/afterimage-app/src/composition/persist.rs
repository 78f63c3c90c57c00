//! Saved sets: layer stack, effect chains and parameter values as JSON.
//! Only parameter values persist; schema metadata comes from the effect
//! definitions at load time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gpu::compositor::BlendMode;
use crate::media::types::LoopMode;
use crate::media::webcam_manager::WebcamConstraints;
use crate::params::PersistedParam;

pub const SET_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionState {
    pub version: u32,
    pub layers: Vec<LayerState>,
}

impl Default for CompositionState {
    fn default() -> Self {
        Self {
            version: SET_VERSION,
            layers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub opacity: f32,
    #[serde(default)]
    pub blend_mode: BlendMode,
    /// Layer-level controls (`enabled`, `mirror`) in `{name: {value}}` form.
    #[serde(default)]
    pub params: BTreeMap<String, PersistedParam>,
    #[serde(default)]
    pub effects: Vec<EffectState>,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default)]
    pub source: SourceState,
}

impl LayerState {
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(|p| p.value.as_bool())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectState {
    pub id: u64,
    pub key: String,
    #[serde(default)]
    pub params: BTreeMap<String, PersistedParam>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceState {
    #[default]
    None,
    Media {
        path: PathBuf,
    },
    Webcam {
        #[serde(default)]
        constraints: WebcamConstraints,
    },
    Shared {
        name: String,
    },
}

pub fn flag_param(value: bool) -> PersistedParam {
    PersistedParam {
        value: serde_json::Value::Bool(value),
    }
}

/// `<config dir>/afterimage/sets`
pub fn sets_dir() -> Option<PathBuf> {
    crate::settings::config_root().map(|d| d.join("sets"))
}

/// Keep set names usable as file names.
pub fn sanitize_set_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

pub fn save_to(path: &Path, state: &CompositionState) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(state)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Saved set to {}", path.display());
    Ok(())
}

pub fn load_from(path: &Path) -> Result<CompositionState> {
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let state: CompositionState =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
    if state.version > SET_VERSION {
        log::warn!(
            "Set {} has newer version {} (supported {SET_VERSION}); loading anyway",
            path.display(),
            state.version
        );
    }
    Ok(state)
}

pub fn save_set(name: &str, state: &CompositionState) -> Result<PathBuf> {
    let dir = sets_dir().context("no config directory on this platform")?;
    let path = dir.join(format!("{}.json", sanitize_set_name(name)));
    save_to(&path, state)?;
    Ok(path)
}

/// Load by set name, or by path when `name_or_path` points at a file.
pub fn load_set(name_or_path: &str) -> Result<CompositionState> {
    let direct = Path::new(name_or_path);
    if direct.is_file() {
        return load_from(direct);
    }
    let dir = sets_dir().context("no config directory on this platform")?;
    load_from(&dir.join(format!("{}.json", sanitize_set_name(name_or_path))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompositionState {
        let mut effect_params = BTreeMap::new();
        effect_params.insert(
            "amount".to_string(),
            PersistedParam {
                value: serde_json::json!(0.5),
            },
        );
        let mut layer_params = BTreeMap::new();
        layer_params.insert("enabled".to_string(), flag_param(true));
        CompositionState {
            version: SET_VERSION,
            layers: vec![LayerState {
                id: 3,
                name: "Clip".into(),
                kind: "media".into(),
                opacity: 0.75,
                blend_mode: BlendMode::Screen,
                params: layer_params,
                effects: vec![EffectState {
                    id: 7,
                    key: "invert".into(),
                    params: effect_params,
                }],
                loop_mode: LoopMode::PingPong,
                source: SourceState::Media {
                    path: PathBuf::from("/clips/a.gif"),
                },
            }],
        }
    }

    #[test]
    fn wire_shape_uses_documented_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let layer = &json["layers"][0];
        assert_eq!(layer["type"], "media");
        assert_eq!(layer["blendMode"], "screen");
        assert_eq!(layer["loopMode"], "ping-pong");
        assert_eq!(layer["params"]["enabled"]["value"], true);
        assert_eq!(layer["effects"][0]["params"]["amount"]["value"], 0.5);
        assert_eq!(layer["source"]["kind"], "media");
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sets/live.json");
        save_to(&path, &sample()).unwrap();
        assert_eq!(load_from(&path).unwrap(), sample());
    }

    #[test]
    fn minimal_layer_fills_defaults() {
        let json = r#"{"version":1,"layers":[{"id":1,"name":"L","type":"effect","opacity":1}]}"#;
        let state: CompositionState = serde_json::from_str(json).unwrap();
        let layer = &state.layers[0];
        assert_eq!(layer.blend_mode, BlendMode::Normal);
        assert_eq!(layer.loop_mode, LoopMode::None);
        assert_eq!(layer.source, SourceState::None);
        assert!(layer.effects.is_empty());
        assert_eq!(layer.flag("enabled"), None);
    }

    #[test]
    fn webcam_source_round_trips_constraints() {
        let json = r#"{"kind":"webcam","constraints":{"deviceId":"1","fps":60}}"#;
        let source: SourceState = serde_json::from_str(json).unwrap();
        let SourceState::Webcam { constraints } = source else {
            panic!("expected webcam source");
        };
        assert_eq!(constraints.device_id.as_deref(), Some("1"));
        assert_eq!(constraints.fps, Some(60));
        assert_eq!(constraints.width, None);
    }

    #[test]
    fn load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn set_names_are_sanitized() {
        assert_eq!(sanitize_set_name("my/set:1"), "my_set_1");
        assert_eq!(sanitize_set_name("   "), "untitled");
    }
}
