use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use wgpu::{CommandEncoder, Device, Queue, TextureFormat};

use super::EngineServices;
use crate::effect::FrameContext;
use crate::effect::runtime::EffectInstance;
use crate::gpu::capture::Scene;
use crate::gpu::compositor::{BlendMode, CompositeInput, CompositePipelines, Compositor};
use crate::gpu::frame_texture::FrameTexture;
use crate::gpu::render_target::{CanvasSize, TextureBinding};
use crate::media::MediaLayer;
use crate::media::letterbox::LetterboxBlit;
use crate::media::playback::{PlaybackConfig, PlaybackLoopController};
use crate::media::types::LoopMode;
use crate::media::webcam_manager::{WebcamConstraints, WebcamLease};

/// What feeds a layer's effect chain.
pub enum LayerSource {
    /// Effects only (procedural, or global effects over the scene).
    None,
    Media(Box<MediaLayer>),
    Webcam {
        constraints: WebcamConstraints,
        /// `None` while acquisition failed; see the layer's `source_error`.
        lease: Option<WebcamLease>,
        texture: Option<Arc<FrameTexture>>,
    },
    /// A named texture from the engine's texture registry.
    Shared(String),
}

impl LayerSource {
    /// Persisted `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            LayerSource::None => "effect",
            LayerSource::Media(_) => "media",
            LayerSource::Webcam { .. } => "webcam",
            LayerSource::Shared(_) => "shared",
        }
    }
}

/// Accumulates a chain's outputs: replacing stages swap the video, others
/// stack as overlays on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput<T> {
    pub video: Option<T>,
    pub overlays: Vec<T>,
}

impl<T> ChainOutput<T> {
    pub fn new(video: Option<T>) -> Self {
        Self {
            video,
            overlays: Vec::new(),
        }
    }

    pub fn apply(&mut self, output: Option<T>, replaces_video: bool) {
        let Some(output) = output else {
            return;
        };
        if replaces_video {
            self.video = Some(output);
        } else {
            self.overlays.push(output);
        }
    }

    /// Bottom-to-top draw list: video first, overlays in chain order.
    pub fn draw_list(&self) -> Vec<&T> {
        self.video.iter().chain(self.overlays.iter()).collect()
    }
}

pub struct Layer {
    pub id: u64,
    pub name: String,
    pub source: LayerSource,
    pub effects: Vec<EffectInstance>,
    pub blend_mode: BlendMode,
    pub opacity: f32,
    pub enabled: bool,
    /// Flip the source horizontally (webcams default to mirrored).
    pub mirror: bool,
    pub source_error: Option<String>,
    controller: PlaybackLoopController,
    letterbox: LetterboxBlit,
    overlay: Compositor,
}

impl Layer {
    pub fn new(
        id: u64,
        name: &str,
        device: &Device,
        hdr_format: TextureFormat,
        pipelines: Arc<CompositePipelines>,
        canvas: CanvasSize,
        playback: PlaybackConfig,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            source: LayerSource::None,
            effects: Vec::new(),
            blend_mode: BlendMode::Normal,
            opacity: 1.0,
            enabled: true,
            mirror: false,
            source_error: None,
            controller: PlaybackLoopController::new(LoopMode::None, playback),
            letterbox: LetterboxBlit::new(device, hdr_format, canvas, "layer-video"),
            overlay: Compositor::new(device, pipelines, canvas, "layer-overlay"),
        }
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.controller.mode()
    }

    /// Switch loop mode; cancels any pending reverse step.
    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        match &mut self.source {
            LayerSource::Media(media) => self.controller.set_mode(mode, media.as_mut()),
            _ => self.controller = PlaybackLoopController::new(mode, self.controller.config()),
        }
    }

    /// Load a media file as this layer's source. On failure the layer keeps
    /// rendering without a source and shows the error.
    pub fn load_media(
        &mut self,
        device: &Device,
        queue: &Queue,
        path: PathBuf,
        services: &mut EngineServices,
        now: Instant,
    ) {
        self.detach_source(services, now);
        match MediaLayer::load(device, queue, &path) {
            Ok(media) => {
                self.source = LayerSource::Media(Box::new(media));
                self.source_error = None;
            }
            Err(e) => {
                log::error!("Layer {} '{}': {e}", self.id, self.name);
                self.source_error = Some(e.to_string());
            }
        }
        self.reset_effect_history();
    }

    /// Use `constraints` through the shared webcam manager.
    pub fn attach_webcam(
        &mut self,
        constraints: WebcamConstraints,
        services: &mut EngineServices,
        now: Instant,
    ) {
        self.detach_source(services, now);
        let lease = match services.webcams.retain(&constraints) {
            Ok(lease) => {
                self.source_error = None;
                Some(lease)
            }
            Err(e) => {
                log::error!("Layer {} '{}': {e}", self.id, self.name);
                self.source_error = Some(e.to_string());
                None
            }
        };
        self.source = LayerSource::Webcam {
            constraints,
            lease,
            texture: None,
        };
        self.mirror = true;
        self.reset_effect_history();
    }

    pub fn attach_shared(&mut self, name: &str, services: &mut EngineServices, now: Instant) {
        self.detach_source(services, now);
        self.source = LayerSource::Shared(name.to_string());
        self.source_error = None;
    }

    /// Drop the current source, releasing any webcam reference.
    pub fn detach_source(&mut self, services: &mut EngineServices, now: Instant) {
        self.controller.cancel();
        let previous = std::mem::replace(&mut self.source, LayerSource::None);
        if let LayerSource::Webcam {
            lease: Some(lease), ..
        } = previous
        {
            services.webcams.release_signature(&lease.signature, now);
        }
        self.source_error = None;
    }

    fn reset_effect_history(&mut self) {
        for effect in &mut self.effects {
            effect.reset_history();
        }
    }

    /// Advance media playback and the loop-mode state machine.
    pub fn update_playback(&mut self, dt_secs: f64, now: Instant) {
        if let LayerSource::Media(media) = &mut self.source {
            media.advance(dt_secs);
            self.controller.update(media.as_mut(), now);
        }
    }

    pub fn upload_media(&mut self, queue: &Queue) {
        if let LayerSource::Media(media) = &mut self.source {
            media.upload_frame(queue);
        }
    }

    /// This frame's source texture and its native dimensions.
    fn source_frame(
        &mut self,
        device: &Device,
        services: &mut EngineServices,
    ) -> Option<(TextureBinding, (u32, u32))> {
        match &mut self.source {
            LayerSource::None => None,
            LayerSource::Media(media) => Some((media.binding(), media.dimensions())),
            LayerSource::Webcam {
                lease: Some(lease),
                texture,
                ..
            } => {
                if texture.is_none() {
                    *texture = services.webcams.texture(&lease.signature, |w, h| {
                        FrameTexture::new(device, w, h, "webcam-frame")
                    });
                }
                texture
                    .as_ref()
                    .map(|t| (t.binding(), (t.width, t.height)))
            }
            LayerSource::Webcam { lease: None, .. } => None,
            LayerSource::Shared(name) => services
                .textures
                .get(name)
                .map(|b| {
                    let dims = (b.width, b.height);
                    (b, dims)
                }),
        }
    }

    /// Run the source through the effect chain. Returns the layer's output,
    /// or `None` when there is nothing to draw.
    pub fn render(
        &mut self,
        ctx: &FrameContext<'_>,
        encoder: &mut CommandEncoder,
        services: &mut EngineServices,
        scene: &mut Scene<TextureBinding>,
    ) -> Option<TextureBinding> {
        let source = self.source_frame(ctx.device, services);
        let dims = source.as_ref().map(|(_, d)| *d);
        let video = source.map(|(binding, _)| {
            self.letterbox
                .render(ctx.device, ctx.queue, encoder, ctx.canvas, &binding, self.mirror)
        });

        let mut chain = ChainOutput::new(video);
        for effect in &mut self.effects {
            let output = effect.render(ctx, encoder, chain.video.as_ref(), dims, scene, self.id);
            chain.apply(output, effect.replaces_video);
        }

        if chain.overlays.is_empty() {
            return chain.video;
        }
        let inputs: Vec<CompositeInput<'_>> = chain
            .draw_list()
            .into_iter()
            .map(|binding| CompositeInput {
                binding,
                blend_mode: BlendMode::Normal,
                opacity: 1.0,
            })
            .collect();
        Some(
            self.overlay
                .composite(ctx.device, ctx.queue, encoder, ctx.canvas, &inputs),
        )
    }

    pub fn media(&self) -> Option<&MediaLayer> {
        match &self.source {
            LayerSource::Media(media) => Some(media),
            _ => None,
        }
    }

    pub fn effect_mut(&mut self, id: u64) -> Option<&mut EffectInstance> {
        self.effects.iter_mut().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_stage_becomes_video() {
        let mut chain = ChainOutput::new(Some("src"));
        chain.apply(Some("invert"), true);
        assert_eq!(chain.video, Some("invert"));
        assert!(chain.overlays.is_empty());
    }

    #[test]
    fn overlay_stage_stacks_over_video() {
        let mut chain = ChainOutput::new(Some("src"));
        chain.apply(Some("scanlines"), false);
        chain.apply(Some("grain"), false);
        assert_eq!(chain.video, Some("src"));
        assert_eq!(chain.draw_list(), vec![&"src", &"scanlines", &"grain"]);
    }

    #[test]
    fn failed_stage_passes_through() {
        let mut chain = ChainOutput::new(Some("src"));
        chain.apply(None, true);
        chain.apply(None, false);
        assert_eq!(chain.video, Some("src"));
        assert!(chain.overlays.is_empty());
    }

    #[test]
    fn later_stage_sees_replaced_video() {
        let mut chain = ChainOutput::new(None::<&str>);
        chain.apply(Some("feedback"), true);
        chain.apply(Some("overlay"), false);
        chain.apply(Some("invert"), true);
        assert_eq!(chain.draw_list(), vec![&"invert", &"overlay"]);
    }

    #[test]
    fn source_kinds() {
        assert_eq!(LayerSource::None.kind(), "effect");
        assert_eq!(LayerSource::Shared("x".into()).kind(), "shared");
    }
}
