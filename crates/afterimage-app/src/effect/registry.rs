//! Effect lookup by canonical key, with an explicit alias table.
//!
//! Lookup is exact: the canonical key first, then the alias table. Nothing
//! is guessed from case or punctuation.

use std::path::Path;

use rustc_hash::FxHashMap;

use super::format::EffectDef;
use super::loader;

#[derive(Debug, Default)]
pub struct EffectRegistry {
    defs: FxHashMap<String, EffectDef>,
    /// alias → canonical key
    aliases: FxHashMap<String, String>,
    /// Canonical keys in registration order.
    order: Vec<String>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the embedded builtin effects.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for def in loader::builtin_effects() {
            registry.register(def);
        }
        registry
    }

    /// Add a definition. Rejected (with a warning) when its key is already a
    /// key or alias. Aliases that collide are dropped individually.
    pub fn register(&mut self, def: EffectDef) -> bool {
        if def.key.is_empty() {
            log::warn!("Rejecting effect '{}' with an empty key", def.name);
            return false;
        }
        if self.defs.contains_key(&def.key) || self.aliases.contains_key(&def.key) {
            log::warn!("Rejecting duplicate effect key '{}'", def.key);
            return false;
        }
        if !def.is_renderable() {
            log::warn!("Rejecting effect '{}': no shader and not a feedback effect", def.key);
            return false;
        }
        self.insert(def);
        true
    }

    /// Replace the definition under an existing key (e.g. an on-disk copy of a
    /// builtin), or register it when new.
    pub fn register_or_replace(&mut self, def: EffectDef) -> bool {
        if self.defs.contains_key(&def.key) {
            if !def.is_renderable() {
                log::warn!("Ignoring unrenderable replacement for '{}'", def.key);
                return false;
            }
            let key = def.key.clone();
            self.aliases.retain(|_, canonical| *canonical != key);
            log::debug!("Effect '{key}' replaced by {:?}", def.source_path);
            self.insert(def);
            return true;
        }
        self.register(def)
    }

    fn insert(&mut self, def: EffectDef) {
        let key = def.key.clone();
        for alias in &def.aliases {
            if alias == &key {
                continue;
            }
            if self.defs.contains_key(alias) {
                log::warn!("Alias '{alias}' of '{key}' collides with an effect key; dropped");
                continue;
            }
            if let Some(owner) = self.aliases.get(alias) {
                log::warn!("Alias '{alias}' of '{key}' already points to '{owner}'; dropped");
                continue;
            }
            self.aliases.insert(alias.clone(), key.clone());
        }
        if !self.order.contains(&key) {
            self.order.push(key.clone());
        }
        self.defs.insert(key, def);
    }

    /// Canonical key for a key or alias.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.defs.get_key_value(name) {
            return Some(key.as_str());
        }
        self.aliases.get(name).map(String::as_str)
    }

    pub fn lookup(&self, name: &str) -> Option<&EffectDef> {
        self.resolve(name).and_then(|key| self.defs.get(key))
    }

    /// Register every `.pfx` in `dir`; files override same-keyed entries.
    /// Returns how many were accepted.
    pub fn load_directory(&mut self, dir: &Path) -> usize {
        let mut accepted = 0;
        for def in loader::scan_effects_directory(dir) {
            if self.register_or_replace(def) {
                accepted += 1;
            }
        }
        log::info!("Registered {accepted} effects from {}", dir.display());
        accepted
    }

    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
