use std::path::{Path, PathBuf};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};

use crate::effect::loader::assets_dir;

/// Watches `assets/shaders` and reports edited `.wgsl` files.
pub struct ShaderWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    receiver: Receiver<PathBuf>,
}

impl ShaderWatcher {
    pub fn new() -> Result<Self> {
        Self::watching(&assets_dir().join("shaders"))
    }

    pub fn watching(shader_dir: &Path) -> Result<Self> {
        let (tx, rx): (Sender<PathBuf>, Receiver<PathBuf>) = crossbeam_channel::unbounded();

        let mut debouncer = new_debouncer(
            std::time::Duration::from_millis(100),
            move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                if let Ok(events) = res {
                    for event in events {
                        if event.kind == DebouncedEventKind::Any {
                            let path = event.path.clone();
                            if path.extension().is_some_and(|ext| ext == "wgsl") {
                                let _ = tx.send(path);
                            }
                        }
                    }
                }
            },
        )?;

        if shader_dir.exists() {
            debouncer
                .watcher()
                .watch(shader_dir, notify::RecursiveMode::Recursive)?;
            log::info!("Watching {} for shader changes", shader_dir.display());
        } else {
            log::debug!("No shader directory at {}; hot reload off", shader_dir.display());
        }

        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
        })
    }

    /// Drain all pending change events and return the unique paths.
    pub fn drain_changes(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        while let Ok(path) = self.receiver.try_recv() {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }
}

/// Whether any changed path is the shader at `shader_rel` (relative to
/// `assets/shaders`).
pub fn touches_shader(changes: &[PathBuf], shader_rel: &str) -> bool {
    !shader_rel.is_empty() && changes.iter().any(|p| p.ends_with(shader_rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_by_relative_suffix() {
        let changes = vec![PathBuf::from("/home/vj/assets/shaders/effects/invert.wgsl")];
        assert!(touches_shader(&changes, "effects/invert.wgsl"));
        assert!(!touches_shader(&changes, "effects/mirror.wgsl"));
        assert!(!touches_shader(&changes, ""));
    }

    #[test]
    fn suffix_match_is_per_component() {
        let changes = vec![PathBuf::from("assets/shaders/effects/my_invert.wgsl")];
        assert!(!touches_shader(&changes, "invert.wgsl"));
    }

    #[test]
    fn watcher_starts_with_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = ShaderWatcher::watching(dir.path()).unwrap();
        assert!(watcher.drain_changes().is_empty());
    }
}
