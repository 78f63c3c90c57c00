//! Full-scene capture for global effects.
//!
//! A global effect samples everything composited so far instead of one
//! upstream texture. Capturing means: hide the effect's own output node,
//! composite every visible node into a canvas-sized target, restore
//! visibility. [`HiddenNode`] owns the hide/restore half so visibility comes
//! back on every exit path.

use std::sync::Arc;

use wgpu::{CommandEncoder, Device, Queue};

use super::compositor::{BlendMode, CompositeInput, CompositePipelines, Compositor};
use super::render_target::{CanvasSize, TextureBinding};

/// Identifies a node in the scene (one per layer output).
pub type NodeId = u64;

/// A drawable entry in the scene: the latest output of a layer.
#[derive(Debug, Clone)]
pub struct SceneNode<T> {
    pub id: NodeId,
    pub texture: T,
    pub blend_mode: BlendMode,
    pub opacity: f32,
    pub visible: bool,
}

/// Ordered (bottom to top) list of drawable nodes for one frame.
#[derive(Debug, Clone)]
pub struct Scene<T> {
    nodes: Vec<SceneNode<T>>,
}

impl<T> Default for Scene<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T> Scene<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the node with `node.id`, keeping its position.
    pub fn upsert(&mut self, node: SceneNode<T>) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    pub fn remove(&mut self, id: NodeId) {
        self.nodes.retain(|n| n.id != id);
    }

    #[cfg(test)]
    pub fn get(&self, id: NodeId) -> Option<&SceneNode<T>> {
        self.nodes.iter().find(|n| n.id == id)
    }

    #[cfg(test)]
    pub fn is_visible(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.visible)
    }

    pub fn visible_nodes(&self) -> impl Iterator<Item = &SceneNode<T>> {
        self.nodes.iter().filter(|n| n.visible)
    }

    /// Reorder nodes to follow `order` (bottom to top). Nodes not listed
    /// keep their relative order after the listed ones.
    pub fn sort_by_order(&mut self, order: &[NodeId]) {
        self.nodes
            .sort_by_key(|n| order.iter().position(|id| *id == n.id).unwrap_or(usize::MAX));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Hide `id` until the returned guard is dropped. Unknown ids hide nothing.
    pub fn hide(&mut self, id: NodeId) -> HiddenNode<'_, T> {
        let was_visible = match self.nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => std::mem::replace(&mut node.visible, false),
            None => false,
        };
        HiddenNode {
            scene: self,
            id,
            was_visible,
        }
    }
}

/// Scoped visibility override: restores the node's previous visibility on drop.
pub struct HiddenNode<'a, T> {
    scene: &'a mut Scene<T>,
    id: NodeId,
    was_visible: bool,
}

impl<T> HiddenNode<'_, T> {
    pub fn scene(&self) -> &Scene<T> {
        self.scene
    }
}

impl<T> Drop for HiddenNode<'_, T> {
    fn drop(&mut self) {
        if let Some(node) = self.scene.nodes.iter_mut().find(|n| n.id == self.id) {
            node.visible = self.was_visible;
        }
    }
}

/// Owns the canvas-sized capture target and renders the scene into it.
pub struct SceneCapture {
    compositor: Compositor,
    scale: f32,
}

impl SceneCapture {
    pub fn new(
        device: &Device,
        pipelines: Arc<CompositePipelines>,
        canvas: CanvasSize,
        scale: f32,
    ) -> Self {
        Self {
            compositor: Compositor::new(device, pipelines, canvas.scaled(scale), "scene-capture"),
            scale,
        }
    }

    /// Capture every visible node except `exclude`. Recorded into `encoder`
    /// so it executes before any pass the caller records afterwards.
    pub fn capture(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        canvas: CanvasSize,
        scene: &mut Scene<TextureBinding>,
        exclude: NodeId,
    ) -> TextureBinding {
        let target_size = canvas.scaled(self.scale);
        let hidden = scene.hide(exclude);
        let inputs: Vec<CompositeInput<'_>> = hidden
            .scene()
            .visible_nodes()
            .map(|n| CompositeInput {
                binding: &n.texture,
                blend_mode: n.blend_mode,
                opacity: n.opacity,
            })
            .collect();
        let captured = self
            .compositor
            .composite(device, queue, encoder, target_size, &inputs);
        drop(inputs);
        drop(hidden);
        captured
    }
}
