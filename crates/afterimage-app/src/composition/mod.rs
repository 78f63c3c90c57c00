pub mod layer;
pub mod persist;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use wgpu::{CommandEncoder, Device, Queue, TextureFormat};

use crate::effect::loader::assets_dir;
use crate::effect::{EffectInstance, EffectRegistry, FrameContext};
use crate::gpu::capture::{Scene, SceneNode};
use crate::gpu::compositor::{CompositeInput, CompositePipelines, Compositor};
use crate::gpu::frame_texture::FrameTexture;
use crate::gpu::render_target::{CanvasSize, TextureBinding};
use crate::gpu::texture_registry::TextureRegistry;
use crate::media::playback::PlaybackConfig;
use crate::media::webcam_manager::{WebcamConstraints, WebcamManager};
use crate::media::{SystemCameraBackend, system_camera_backend};
use crate::settings::SettingsConfig;
use crate::shader::hot_reload::touches_shader;
use layer::{Layer, LayerSource};
use persist::{CompositionState, EffectState, LayerState, SourceState, flag_param};

pub type Webcams = WebcamManager<SystemCameraBackend, FrameTexture>;

/// Engine-wide services shared by every composition. Constructed
/// explicitly and passed in, so several compositions can coexist.
pub struct EngineServices {
    pub effects: EffectRegistry,
    pub textures: TextureRegistry<TextureBinding>,
    pub webcams: Webcams,
}

impl EngineServices {
    pub fn new(settings: &SettingsConfig) -> Self {
        let mut effects = EffectRegistry::with_builtins();
        effects.load_directory(&assets_dir().join("effects"));
        Self {
            effects,
            textures: TextureRegistry::new(),
            webcams: WebcamManager::new(
                system_camera_backend(),
                settings.webcam,
                settings.webcam_grace(),
            ),
        }
    }

    /// Per-tick webcam housekeeping: expire released streams, upload frames.
    pub fn tick(&mut self, queue: &Queue, now: Instant) {
        self.webcams.poll(now);
        self.webcams.pump_frames(|texture, frame| {
            texture.write(queue, &frame.data, frame.width, frame.height);
        });
    }
}

/// Registry name a layer's output is published under.
pub fn layer_texture_name(id: u64) -> String {
    format!("layer/{id}")
}

/// Take a layer's output out of the frame: its scene node goes and its
/// texture is no longer published.
fn retire_layer_output<T: Clone>(scene: &mut Scene<T>, textures: &mut TextureRegistry<T>, id: u64) {
    scene.remove(id);
    textures.remove(&layer_texture_name(id));
}

/// An ordered (bottom to top) stack of layers composited into one frame.
pub struct Composition {
    layers: Vec<Layer>,
    scene: Scene<TextureBinding>,
    output: Compositor,
    pipelines: Arc<CompositePipelines>,
    hdr_format: TextureFormat,
    playback: PlaybackConfig,
    next_layer_id: u64,
    next_effect_id: u64,
}

impl Composition {
    pub fn new(
        device: &Device,
        hdr_format: TextureFormat,
        pipelines: Arc<CompositePipelines>,
        canvas: CanvasSize,
        playback: PlaybackConfig,
    ) -> Self {
        Self {
            layers: Vec::new(),
            scene: Scene::new(),
            output: Compositor::new(device, pipelines.clone(), canvas, "composition"),
            pipelines,
            hdr_format,
            playback,
            next_layer_id: 1,
            next_effect_id: 1,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: u64) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: u64) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Append an empty layer on top. Returns its id.
    pub fn add_layer(&mut self, device: &Device, canvas: CanvasSize, name: &str) -> u64 {
        let id = self.next_layer_id;
        self.next_layer_id += 1;
        self.insert_layer(device, canvas, id, name);
        id
    }

    fn insert_layer(&mut self, device: &Device, canvas: CanvasSize, id: u64, name: &str) {
        self.layers.push(Layer::new(
            id,
            name,
            device,
            self.hdr_format,
            self.pipelines.clone(),
            canvas,
            self.playback,
        ));
        log::info!("Layer {id} '{name}' added");
    }

    pub fn add_media_layer(
        &mut self,
        device: &Device,
        queue: &Queue,
        canvas: CanvasSize,
        path: PathBuf,
        services: &mut EngineServices,
        now: Instant,
    ) -> u64 {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("Media")
            .to_string();
        let id = self.add_layer(device, canvas, &name);
        if let Some(layer) = self.layer_mut(id) {
            layer.load_media(device, queue, path, services, now);
        }
        id
    }

    pub fn add_webcam_layer(
        &mut self,
        device: &Device,
        canvas: CanvasSize,
        constraints: WebcamConstraints,
        services: &mut EngineServices,
        now: Instant,
    ) -> u64 {
        let id = self.add_layer(device, canvas, "Webcam");
        if let Some(layer) = self.layer_mut(id) {
            layer.attach_webcam(constraints, services, now);
        }
        id
    }

    /// Remove a layer, releasing its source and published texture.
    pub fn remove_layer(&mut self, id: u64, services: &mut EngineServices, now: Instant) -> bool {
        let Some(index) = self.layers.iter().position(|l| l.id == id) else {
            return false;
        };
        let mut layer = self.layers.remove(index);
        layer.detach_source(services, now);
        retire_layer_output(&mut self.scene, &mut services.textures, id);
        log::info!("Layer {id} '{}' removed", layer.name);
        true
    }

    /// Move a layer to `index` in the stack (clamped).
    pub fn move_layer(&mut self, id: u64, index: usize) -> bool {
        let Some(from) = self.layers.iter().position(|l| l.id == id) else {
            return false;
        };
        let layer = self.layers.remove(from);
        let to = index.min(self.layers.len());
        self.layers.insert(to, layer);
        true
    }

    /// Append an effect to a layer's chain. Unknown keys still produce an
    /// instance (carrying the error) so the chain stays as requested.
    pub fn add_effect(
        &mut self,
        layer_id: u64,
        key: &str,
        services: &EngineServices,
        device: &Device,
        canvas: CanvasSize,
    ) -> Option<u64> {
        let id = self.next_effect_id;
        let hdr_format = self.hdr_format;
        let layer = self.layer_mut(layer_id)?;
        layer.effects.push(EffectInstance::new(
            id,
            key,
            &services.effects,
            device,
            hdr_format,
            canvas,
        ));
        self.next_effect_id += 1;
        Some(id)
    }

    pub fn remove_effect(&mut self, layer_id: u64, effect_id: u64) -> bool {
        let Some(layer) = self.layer_mut(layer_id) else {
            return false;
        };
        let before = layer.effects.len();
        layer.effects.retain(|e| e.id != effect_id);
        layer.effects.len() != before
    }

    /// Advance playback for every layer.
    pub fn update(&mut self, dt_secs: f64, now: Instant) {
        for layer in &mut self.layers {
            layer.update_playback(dt_secs, now);
        }
    }

    /// Recompile every effect whose shader is among `changes`. Returns how
    /// many reloaded cleanly.
    pub fn reload_shaders(&mut self, device: &Device, changes: &[PathBuf]) -> usize {
        let hdr_format = self.hdr_format;
        self.layers
            .iter_mut()
            .flat_map(|l| l.effects.iter_mut())
            .filter(|e| e.shader_path().is_some_and(|rel| touches_shader(changes, rel)))
            .map(|e| e.reload_shader(device, hdr_format))
            .filter(|ok| *ok)
            .count()
    }

    /// Render every layer bottom to top, then composite the scene.
    ///
    /// Layers below a global effect contribute this frame's output; layers
    /// above it contribute last frame's (their nodes are updated later in
    /// the same pass).
    pub fn render_frame(
        &mut self,
        ctx: &FrameContext<'_>,
        encoder: &mut CommandEncoder,
        services: &mut EngineServices,
    ) -> TextureBinding {
        let order: Vec<u64> = self.layers.iter().map(|l| l.id).collect();
        self.scene.sort_by_order(&order);

        for layer in &mut self.layers {
            if !layer.enabled {
                retire_layer_output(&mut self.scene, &mut services.textures, layer.id);
                continue;
            }
            layer.upload_media(ctx.queue);
            match layer.render(ctx, encoder, services, &mut self.scene) {
                Some(output) => {
                    let name = layer_texture_name(layer.id);
                    if services.textures.get(&name).map(|b| b.id) != Some(output.id) {
                        services.textures.publish(&name, output.clone());
                    }
                    self.scene.upsert(SceneNode {
                        id: layer.id,
                        texture: output,
                        blend_mode: layer.blend_mode,
                        opacity: layer.opacity.clamp(0.0, 1.0),
                        visible: true,
                    });
                }
                None => retire_layer_output(&mut self.scene, &mut services.textures, layer.id),
            }
        }
        // Keep newly inserted nodes in stack order
        self.scene.sort_by_order(&order);

        let inputs: Vec<CompositeInput<'_>> = self
            .scene
            .visible_nodes()
            .map(|n| CompositeInput {
                binding: &n.texture,
                blend_mode: n.blend_mode,
                opacity: n.opacity,
            })
            .collect();
        self.output
            .composite(ctx.device, ctx.queue, encoder, ctx.canvas, &inputs)
    }

    /// Snapshot for saving.
    pub fn to_state(&self) -> CompositionState {
        let layers = self
            .layers
            .iter()
            .map(|layer| {
                let mut params = std::collections::BTreeMap::new();
                params.insert("enabled".to_string(), flag_param(layer.enabled));
                params.insert("mirror".to_string(), flag_param(layer.mirror));
                LayerState {
                    id: layer.id,
                    name: layer.name.clone(),
                    kind: layer.source.kind().to_string(),
                    opacity: layer.opacity,
                    blend_mode: layer.blend_mode,
                    params,
                    effects: layer
                        .effects
                        .iter()
                        .map(|e| EffectState {
                            id: e.id,
                            key: e.key.clone(),
                            params: e.params.to_persisted(),
                        })
                        .collect(),
                    loop_mode: layer.loop_mode(),
                    source: match &layer.source {
                        LayerSource::None => SourceState::None,
                        LayerSource::Media(media) => SourceState::Media {
                            path: media.file_path.clone(),
                        },
                        LayerSource::Webcam { constraints, .. } => SourceState::Webcam {
                            constraints: constraints.clone(),
                        },
                        LayerSource::Shared(name) => SourceState::Shared { name: name.clone() },
                    },
                }
            })
            .collect();
        CompositionState {
            version: persist::SET_VERSION,
            layers,
        }
    }

    /// Replace the whole stack with a saved state. Sources that fail to
    /// load leave their layer with a visible error; siblings are unaffected.
    pub fn apply_state(
        &mut self,
        state: &CompositionState,
        device: &Device,
        queue: &Queue,
        canvas: CanvasSize,
        services: &mut EngineServices,
        now: Instant,
    ) {
        self.clear(services, now);

        for saved in &state.layers {
            let id = if self.layer(saved.id).is_some() {
                let id = self.next_layer_id;
                log::warn!("Duplicate layer id {} in set; using {id}", saved.id);
                id
            } else {
                saved.id
            };
            self.next_layer_id = self.next_layer_id.max(id + 1);
            self.insert_layer(device, canvas, id, &saved.name);

            // Effect ids are reassigned; keys and values carry over
            for effect in &saved.effects {
                if let Some(effect_id) = self.add_effect(id, &effect.key, services, device, canvas) {
                    if let Some(instance) =
                        self.layer_mut(id).and_then(|l| l.effect_mut(effect_id))
                    {
                        instance.params.apply_persisted(&effect.params);
                    }
                }
            }

            let Some(layer) = self.layer_mut(id) else {
                continue;
            };
            layer.opacity = saved.opacity.clamp(0.0, 1.0);
            layer.blend_mode = saved.blend_mode;
            match &saved.source {
                SourceState::None => {}
                SourceState::Media { path } => {
                    layer.load_media(device, queue, path.clone(), services, now);
                }
                SourceState::Webcam { constraints } => {
                    layer.attach_webcam(constraints.clone(), services, now);
                }
                SourceState::Shared { name } => layer.attach_shared(name, services, now),
            }
            if let Some(enabled) = saved.flag("enabled") {
                layer.enabled = enabled;
            }
            if let Some(mirror) = saved.flag("mirror") {
                layer.mirror = mirror;
            }
            layer.set_loop_mode(saved.loop_mode);
        }
        log::info!("Loaded set with {} layers", self.layers.len());
    }

    /// Remove every layer, releasing their sources.
    pub fn clear(&mut self, services: &mut EngineServices, now: Instant) {
        let ids: Vec<u64> = self.layers.iter().map(|l| l.id).collect();
        for id in ids {
            self.remove_layer(id, services, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::compositor::BlendMode;

    fn publish(scene: &mut Scene<u32>, textures: &mut TextureRegistry<u32>, id: u64, texture: u32) {
        textures.publish(&layer_texture_name(id), texture);
        scene.upsert(SceneNode {
            id,
            texture,
            blend_mode: BlendMode::Normal,
            opacity: 1.0,
            visible: true,
        });
    }

    #[test]
    fn retired_layer_leaves_scene_and_registry() {
        let mut scene = Scene::new();
        let mut textures = TextureRegistry::new();
        publish(&mut scene, &mut textures, 1, 10);
        publish(&mut scene, &mut textures, 2, 20);

        retire_layer_output(&mut scene, &mut textures, 1);

        assert!(textures.get(&layer_texture_name(1)).is_none());
        assert_eq!(textures.get(&layer_texture_name(2)), Some(20));
        let remaining: Vec<_> = scene.visible_nodes().map(|n| n.texture).collect();
        assert_eq!(remaining, vec![20]);
    }

    #[test]
    fn retiring_twice_is_harmless() {
        let mut scene = Scene::new();
        let mut textures = TextureRegistry::new();
        publish(&mut scene, &mut textures, 3, 30);
        retire_layer_output(&mut scene, &mut textures, 3);
        retire_layer_output(&mut scene, &mut textures, 3);
        assert_eq!(scene.visible_nodes().count(), 0);
        assert!(textures.get(&layer_texture_name(3)).is_none());
    }

    #[test]
    fn layer_names_are_per_id() {
        assert_eq!(layer_texture_name(7), "layer/7");
        assert_ne!(layer_texture_name(1), layer_texture_name(11));
    }
}
