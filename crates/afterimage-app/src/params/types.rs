use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_max() -> f32 {
    1.0
}

fn default_step() -> f32 {
    0.01
}

/// One entry of an effect's parameter schema, as written in `.pfx` files.
/// Bounds and options are static metadata; only values are instance state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ParamDef {
    Number {
        name: String,
        #[serde(default)]
        value: f32,
        #[serde(default)]
        min: f32,
        #[serde(default = "default_max")]
        max: f32,
        #[serde(default = "default_step")]
        step: f32,
    },
    Boolean {
        name: String,
        #[serde(default)]
        value: bool,
    },
    Color {
        name: String,
        value: [f32; 4],
    },
    Select {
        name: String,
        value: String,
        options: Vec<String>,
    },
    String {
        name: String,
        #[serde(default)]
        value: String,
    },
    ColorArray {
        name: String,
        #[serde(default)]
        value: Vec<[f32; 4]>,
    },
    NumberArray {
        name: String,
        #[serde(default)]
        value: Vec<f32>,
        #[serde(default)]
        min: f32,
        #[serde(default = "default_max")]
        max: f32,
    },
    Vector2 {
        name: String,
        #[serde(default)]
        value: [f32; 2],
        #[serde(default)]
        min: Option<[f32; 2]>,
        #[serde(default)]
        max: Option<[f32; 2]>,
    },
    Text {
        name: String,
        #[serde(default)]
        value: String,
    },
}

impl ParamDef {
    pub fn name(&self) -> &str {
        match self {
            ParamDef::Number { name, .. }
            | ParamDef::Boolean { name, .. }
            | ParamDef::Color { name, .. }
            | ParamDef::Select { name, .. }
            | ParamDef::String { name, .. }
            | ParamDef::ColorArray { name, .. }
            | ParamDef::NumberArray { name, .. }
            | ParamDef::Vector2 { name, .. }
            | ParamDef::Text { name, .. } => name,
        }
    }

    pub fn default_value(&self) -> ParamValue {
        match self {
            ParamDef::Number { value, .. } => ParamValue::Number(*value),
            ParamDef::Boolean { value, .. } => ParamValue::Boolean(*value),
            ParamDef::Color { value, .. } => ParamValue::Color(*value),
            ParamDef::Select { value, .. } => ParamValue::Select(value.clone()),
            ParamDef::String { value, .. } | ParamDef::Text { value, .. } => {
                ParamValue::Text(value.clone())
            }
            ParamDef::ColorArray { value, .. } => ParamValue::ColorArray(value.clone()),
            ParamDef::NumberArray { value, .. } => ParamValue::NumberArray(value.clone()),
            ParamDef::Vector2 { value, .. } => ParamValue::Vector2(*value),
        }
    }

    /// Bring `value` inside this definition's bounds. Returns `None` when the
    /// value has the wrong shape for this definition.
    pub fn coerce(&self, value: ParamValue) -> Option<ParamValue> {
        match (self, value) {
            (ParamDef::Number { min, max, .. }, ParamValue::Number(v)) => {
                Some(ParamValue::Number(v.clamp(*min, *max)))
            }
            (ParamDef::Boolean { .. }, v @ ParamValue::Boolean(_)) => Some(v),
            (ParamDef::Color { .. }, ParamValue::Color(c)) => {
                Some(ParamValue::Color(c.map(|x| x.clamp(0.0, 1.0))))
            }
            (ParamDef::Select { options, .. }, ParamValue::Select(s)) => {
                options.contains(&s).then_some(ParamValue::Select(s))
            }
            (ParamDef::String { .. } | ParamDef::Text { .. }, v @ ParamValue::Text(_)) => Some(v),
            (ParamDef::ColorArray { .. }, v @ ParamValue::ColorArray(_)) => Some(v),
            (ParamDef::NumberArray { min, max, .. }, ParamValue::NumberArray(vs)) => Some(
                ParamValue::NumberArray(vs.into_iter().map(|v| v.clamp(*min, *max)).collect()),
            ),
            (ParamDef::Vector2 { min, max, .. }, ParamValue::Vector2(mut v)) => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    v = [v[0].clamp(lo[0], hi[0]), v[1].clamp(lo[1], hi[1])];
                }
                Some(ParamValue::Vector2(v))
            }
            _ => None,
        }
    }

    /// Parse a persisted JSON value according to this definition's type.
    pub fn value_from_json(&self, json: &Value) -> Option<ParamValue> {
        let parsed = match self {
            ParamDef::Number { .. } => ParamValue::Number(json.as_f64()? as f32),
            ParamDef::Boolean { .. } => ParamValue::Boolean(json.as_bool()?),
            ParamDef::Color { .. } => ParamValue::Color(serde_json::from_value(json.clone()).ok()?),
            ParamDef::Select { .. } => ParamValue::Select(json.as_str()?.to_string()),
            ParamDef::String { .. } | ParamDef::Text { .. } => {
                ParamValue::Text(json.as_str()?.to_string())
            }
            ParamDef::ColorArray { .. } => {
                ParamValue::ColorArray(serde_json::from_value(json.clone()).ok()?)
            }
            ParamDef::NumberArray { .. } => {
                ParamValue::NumberArray(serde_json::from_value(json.clone()).ok()?)
            }
            ParamDef::Vector2 { .. } => {
                ParamValue::Vector2(serde_json::from_value(json.clone()).ok()?)
            }
        };
        self.coerce(parsed)
    }

    /// Floats this parameter contributes to the uniform block. Strings and
    /// text are CPU-only; selects pack as their option index.
    pub fn gpu_floats(&self, value: &ParamValue) -> Vec<f32> {
        match (self, value) {
            (ParamDef::Select { options, .. }, ParamValue::Select(s)) => {
                let index = options.iter().position(|o| o == s).unwrap_or(0);
                vec![index as f32]
            }
            (_, ParamValue::Number(v)) => vec![*v],
            (_, ParamValue::Boolean(b)) => vec![if *b { 1.0 } else { 0.0 }],
            (_, ParamValue::Color(c)) => c.to_vec(),
            (_, ParamValue::Vector2(v)) => v.to_vec(),
            (_, ParamValue::NumberArray(vs)) => vs.clone(),
            (_, ParamValue::ColorArray(cs)) => cs.iter().flatten().copied().collect(),
            (_, ParamValue::Select(_) | ParamValue::Text(_)) => Vec::new(),
        }
    }
}

/// A live parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f32),
    Boolean(bool),
    Color([f32; 4]),
    Select(String),
    Text(String),
    ColorArray(Vec<[f32; 4]>),
    NumberArray(Vec<f32>),
    Vector2([f32; 2]),
}

impl ParamValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<[f32; 2]> {
        match self {
            ParamValue::Vector2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Number(v) => serde_json::json!(v),
            ParamValue::Boolean(b) => Value::Bool(*b),
            ParamValue::Color(c) => serde_json::json!(c),
            ParamValue::Select(s) | ParamValue::Text(s) => Value::String(s.clone()),
            ParamValue::ColorArray(cs) => serde_json::json!(cs),
            ParamValue::NumberArray(vs) => serde_json::json!(vs),
            ParamValue::Vector2(v) => serde_json::json!(v),
        }
    }
}
