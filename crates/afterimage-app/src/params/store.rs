use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::types::{ParamDef, ParamValue};

/// Number of f32 slots available to user parameters in the uniform block.
pub const PARAM_SLOTS: usize = 16;

/// Values for one effect instance, validated against its schema.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    pub defs: Vec<ParamDef>,
    values: FxHashMap<String, ParamValue>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defs(defs: &[ParamDef]) -> Self {
        let mut store = Self::new();
        store.load_from_defs(defs);
        store
    }

    pub fn load_from_defs(&mut self, defs: &[ParamDef]) {
        self.defs = defs.to_vec();
        self.values.clear();
        for def in defs {
            self.values.insert(def.name().to_string(), def.default_value());
        }
    }

    fn def(&self, name: &str) -> Option<&ParamDef> {
        self.defs.iter().find(|d| d.name() == name)
    }

    /// Set a value. Unknown names and wrongly shaped values are ignored.
    /// Returns whether the value was accepted.
    #[cfg(test)]
    pub fn set(&mut self, name: &str, value: ParamValue) -> bool {
        let Some(coerced) = self.def(name).and_then(|d| d.coerce(value)) else {
            log::warn!("Ignoring invalid value for parameter '{name}'");
            return false;
        };
        self.values.insert(name.to_string(), coerced);
        true
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(ParamValue::as_f32)
    }

    /// Pack all param values into a fixed-size f32 array in definition order.
    /// A value that doesn't fit in the remaining slots is skipped.
    pub fn pack_to_buffer(&self) -> [f32; PARAM_SLOTS] {
        let mut buf = [0.0f32; PARAM_SLOTS];
        let mut offset = 0;
        for def in &self.defs {
            let Some(value) = self.values.get(def.name()) else {
                continue;
            };
            let floats = def.gpu_floats(value);
            if offset + floats.len() <= PARAM_SLOTS {
                buf[offset..offset + floats.len()].copy_from_slice(&floats);
                offset += floats.len();
            }
        }
        buf
    }

    /// Persisted form: `{name: {"value": ...}}`. Only values are saved.
    pub fn to_persisted(&self) -> BTreeMap<String, PersistedParam> {
        self.defs
            .iter()
            .filter_map(|def| {
                let value = self.values.get(def.name())?;
                Some((
                    def.name().to_string(),
                    PersistedParam {
                        value: value.to_json(),
                    },
                ))
            })
            .collect()
    }

    /// Apply persisted values. Entries that no longer match the schema keep
    /// their defaults.
    pub fn apply_persisted(&mut self, params: &BTreeMap<String, PersistedParam>) {
        for (name, persisted) in params {
            match self.def(name).and_then(|d| d.value_from_json(&persisted.value)) {
                Some(value) => {
                    self.values.insert(name.clone(), value);
                }
                None => log::warn!("Dropping persisted value for unknown or mismatched '{name}'"),
            }
        }
    }
}

/// Wire shape of one persisted parameter.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersistedParam {
    pub value: Value,
}
