//! Name → live texture map for sharing textures between components.
//!
//! Producers publish under a stable name; consumers look the name up every
//! frame and compare the binding id with what they saw last time to notice
//! swaps. The registry holds a clone of the handle, so a producer that is
//! torn down or stops rendering should `remove` its entry.

use rustc_hash::FxHashMap;

/// Registry of named textures, generic over the handle type so it can be
/// exercised without a GPU.
#[derive(Debug)]
pub struct TextureRegistry<T> {
    entries: FxHashMap<String, T>,
}

impl<T> Default for TextureRegistry<T> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }
}

impl<T: Clone> TextureRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `texture` under `name`, replacing any previous entry.
    pub fn publish(&mut self, name: &str, texture: T) {
        if self.entries.insert(name.to_string(), texture).is_none() {
            log::debug!("Texture source '{name}' registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.entries.get(name).cloned()
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let removed = self.entries.remove(name);
        if removed.is_some() {
            log::debug!("Texture source '{name}' removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_get() {
        let mut reg = TextureRegistry::new();
        reg.publish("webcam", 7u32);
        assert_eq!(reg.get("webcam"), Some(7));
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn republish_replaces() {
        let mut reg = TextureRegistry::new();
        reg.publish("feed", 1u32);
        reg.publish("feed", 2u32);
        assert_eq!(reg.get("feed"), Some(2));
    }

    #[test]
    fn remove_forgets_entry() {
        let mut reg = TextureRegistry::new();
        reg.publish("a", 1u32);
        assert_eq!(reg.remove("a"), Some(1));
        assert!(reg.get("a").is_none());
        assert!(reg.remove("a").is_none());
    }

    #[test]
    fn registries_are_independent() {
        let mut preview = TextureRegistry::new();
        let output: TextureRegistry<u32> = TextureRegistry::new();
        preview.publish("shared", 1u32);
        assert!(output.get("shared").is_none());
    }
}
