use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::params::ParamDef;

/// How an effect renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKind {
    /// Single fullscreen fragment shader.
    #[default]
    Shader,
    /// Built-in ping-pong feedback compositor.
    Feedback,
}

/// A .pfx effect definition (JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectDef {
    /// Canonical lookup key.
    pub key: String,
    pub name: String,
    /// Alternative names resolved through the registry's alias table.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Fragment shader path relative to `assets/shaders`. Unused for feedback.
    #[serde(default)]
    pub shader: String,
    #[serde(default)]
    pub kind: EffectKind,
    /// Consume a capture of the whole scene instead of the upstream texture.
    #[serde(default)]
    pub global: bool,
    /// Downstream stages see this effect's output as the video.
    #[serde(default)]
    pub replaces_video: bool,
    #[serde(default)]
    pub inputs: Vec<ParamDef>,
    /// Path to the .pfx file on disk (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl EffectDef {
    /// A definition is usable when it names a shader or is a feedback effect.
    pub fn is_renderable(&self) -> bool {
        self.kind == EffectKind::Feedback || !self.shader.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_def_serde_minimal() {
        let json = r#"{"key":"invert","name":"Invert","shader":"effects/invert.wgsl"}"#;
        let def: EffectDef = serde_json::from_str(json).unwrap();
        assert_eq!(def.key, "invert");
        assert_eq!(def.kind, EffectKind::Shader);
        assert!(!def.global);
        assert!(!def.replaces_video);
        assert!(def.aliases.is_empty());
        assert!(def.inputs.is_empty());
        assert!(def.is_renderable());
    }

    #[test]
    fn effect_def_serde_full() {
        let json = r#"{
            "key": "feedback",
            "name": "Feedback",
            "aliases": ["trails"],
            "kind": "feedback",
            "global": true,
            "replaces_video": true,
            "inputs": [{"type":"number","name":"amount","value":0.8}]
        }"#;
        let def: EffectDef = serde_json::from_str(json).unwrap();
        assert_eq!(def.kind, EffectKind::Feedback);
        assert!(def.global);
        assert!(def.replaces_video);
        assert_eq!(def.aliases, vec!["trails".to_string()]);
        assert_eq!(def.inputs.len(), 1);
        assert!(def.is_renderable());
    }

    #[test]
    fn shader_kind_without_shader_is_not_renderable() {
        let def: EffectDef = serde_json::from_str(r#"{"key":"k","name":"K"}"#).unwrap();
        assert!(!def.is_renderable());
    }
}
