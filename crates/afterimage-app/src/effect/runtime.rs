//! The contract every effect in a chain follows to source its input.
//!
//! Layer-mode effects consume the upstream texture, or the 1x1 fallback
//! when there is none. Global effects capture the whole scene (minus their
//! own layer's node) each frame and consume that. Either way the effect
//! renders into a target it owns and hands back a [`TextureBinding`]; an
//! effect that failed to load hands back nothing and the chain carries its
//! input through.

use std::sync::Arc;

use glam::Vec2;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindingResource, CommandEncoder, Device,
    Queue, TextureFormat,
};

use super::EffectError;
use super::format::{EffectDef, EffectKind};
use super::loader;
use super::registry::EffectRegistry;
use crate::gpu::capture::{NodeId, Scene, SceneCapture};
use crate::gpu::compositor::CompositePipelines;
use crate::gpu::feedback::{FeedbackCompositor, FeedbackParams};
use crate::gpu::fullscreen_quad::run_fullscreen_pass;
use crate::gpu::placeholder::{FallbackTexture, bind_input};
use crate::gpu::render_target::{CanvasSize, RenderTarget, TargetSizing, TextureBinding};
use crate::gpu::{EffectPipeline, EffectUniforms, UniformBuffer};
use crate::params::{ParamStore, ParamValue};

/// Where an effect's input comes from this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Upstream,
    SceneCapture,
    Fallback,
}

pub fn select_input(is_global: bool, has_upstream: bool) -> InputSource {
    if is_global {
        InputSource::SceneCapture
    } else if has_upstream {
        InputSource::Upstream
    } else {
        InputSource::Fallback
    }
}

pub const DEFAULT_ASPECT: f32 = 16.0 / 9.0;

/// Aspect ratio for an effect's source: explicit media dimensions, else the
/// last known aspect, else 16:9.
#[derive(Debug, Clone, Copy, Default)]
pub struct AspectResolver {
    cached: Option<f32>,
}

impl AspectResolver {
    pub fn resolve(&mut self, media: Option<(u32, u32)>) -> f32 {
        if let Some((w, h)) = media.filter(|(w, h)| *w > 0 && *h > 0) {
            let aspect = w as f32 / h as f32;
            self.cached = Some(aspect);
            return aspect;
        }
        self.cached.unwrap_or(DEFAULT_ASPECT)
    }
}

/// Per-frame values shared by every effect rendered in one tick.
pub struct FrameContext<'a> {
    pub device: &'a Device,
    pub queue: &'a Queue,
    pub canvas: CanvasSize,
    pub time: f32,
    pub delta_time: f32,
    pub bpm: f32,
    pub frame_index: u64,
    pub fallback: &'a FallbackTexture,
    pub pipelines: &'a Arc<CompositePipelines>,
    /// Resolution scale of global-effect scene captures.
    pub capture_scale: f32,
}

/// Read the feedback controls out of a parameter store. Missing entries keep
/// their defaults.
pub fn feedback_params(params: &ParamStore) -> FeedbackParams {
    let d = FeedbackParams::default();
    FeedbackParams {
        amount: params.get_f32("amount").unwrap_or(d.amount),
        rotation: params.get_f32("rotation").unwrap_or(d.rotation),
        zoom: params.get_f32("zoom").unwrap_or(d.zoom),
        translate: params
            .get("translate")
            .and_then(ParamValue::as_vec2)
            .map_or(d.translate, Vec2::from_array),
        noise: params.get_f32("noise").unwrap_or(d.noise),
        light_leak: params.get_f32("light_leak").unwrap_or(d.light_leak),
    }
}

pub fn resolve_definition<'r>(
    registry: &'r EffectRegistry,
    key: &str,
) -> Result<&'r EffectDef, EffectError> {
    registry
        .lookup(key)
        .ok_or_else(|| EffectError::UnknownEffect(key.to_string()))
}

/// A single fullscreen fragment pass into an owned target.
struct ShaderStage {
    shader: String,
    pipeline: EffectPipeline,
    uniforms: UniformBuffer,
    output: RenderTarget,
    sizing: TargetSizing,
    /// Input binding id the bind group was built for.
    bind_group: Option<(u64, BindGroup)>,
}

impl ShaderStage {
    fn new(
        device: &Device,
        hdr_format: TextureFormat,
        canvas: CanvasSize,
        def: &EffectDef,
    ) -> Result<Self, EffectError> {
        let source = loader::load_effect_source(&def.shader)?;
        let pipeline =
            EffectPipeline::new(device, hdr_format, &source, &def.key).map_err(EffectError::Compile)?;
        let output = RenderTarget::new(device, canvas.width, canvas.height, hdr_format, 1.0, &def.key);
        let mut sizing = TargetSizing::default();
        sizing.sync(canvas);
        Ok(Self {
            shader: def.shader.clone(),
            pipeline,
            uniforms: UniformBuffer::new(device),
            output,
            sizing,
            bind_group: None,
        })
    }

    fn reload(&mut self, device: &Device, hdr_format: TextureFormat, label: &str) -> Result<(), EffectError> {
        let source = loader::load_effect_source(&self.shader)?;
        self.pipeline
            .recreate_pipeline(device, hdr_format, &source, label)
            .map_err(EffectError::Compile)
    }

    fn render(
        &mut self,
        ctx: &FrameContext<'_>,
        encoder: &mut CommandEncoder,
        input: &TextureBinding,
        has_input: bool,
        aspect: f32,
        params: &ParamStore,
    ) -> TextureBinding {
        if self.sizing.sync(ctx.canvas) {
            self.output.resize(ctx.device, ctx.canvas.width, ctx.canvas.height);
        }

        self.uniforms.update(
            ctx.queue,
            &EffectUniforms {
                time: ctx.time,
                delta_time: ctx.delta_time,
                resolution: [self.output.width as f32, self.output.height as f32],
                aspect,
                bpm: ctx.bpm,
                frame_index: ctx.frame_index as f32,
                has_input: if has_input { 1.0 } else { 0.0 },
                params: params.pack_to_buffer(),
                _pad: [0.0; 8],
            },
        );

        // Rebuilt only when the input texture identity changes
        if self.bind_group.as_ref().is_none_or(|(id, _)| *id != input.id) {
            let bind_group = ctx.device.create_bind_group(&BindGroupDescriptor {
                label: Some("effect-bg"),
                layout: &self.pipeline.bind_group_layout,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: self.uniforms.buffer.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::TextureView(&input.view),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::Sampler(&input.sampler),
                    },
                ],
            });
            self.bind_group = Some((input.id, bind_group));
        }

        if let Some((_, bind_group)) = &self.bind_group {
            run_fullscreen_pass(
                encoder,
                "effect-pass",
                &self.pipeline.pipeline,
                bind_group,
                &self.output.view,
            );
        }
        self.output.binding()
    }
}

enum EffectRuntime {
    Shader(Box<ShaderStage>),
    Feedback(Box<FeedbackCompositor>),
    PassThrough,
}

/// One effect in a layer's chain.
pub struct EffectInstance {
    pub id: u64,
    /// Key as requested (may be an alias or unknown).
    pub key: String,
    pub name: String,
    pub params: ParamStore,
    pub global: bool,
    pub replaces_video: bool,
    pub enabled: bool,
    error: Option<EffectError>,
    runtime: EffectRuntime,
    aspect: AspectResolver,
    capture: Option<SceneCapture>,
}

impl EffectInstance {
    /// Build an instance. Never fails: lookup, load and compile errors are
    /// recorded on the instance, which then passes its input through.
    pub fn new(
        id: u64,
        key: &str,
        registry: &EffectRegistry,
        device: &Device,
        hdr_format: TextureFormat,
        canvas: CanvasSize,
    ) -> Self {
        let mut instance = Self {
            id,
            key: key.to_string(),
            name: key.to_string(),
            params: ParamStore::new(),
            global: false,
            replaces_video: false,
            enabled: true,
            error: None,
            runtime: EffectRuntime::PassThrough,
            aspect: AspectResolver::default(),
            capture: None,
        };

        let def = match resolve_definition(registry, key) {
            Ok(def) => def,
            Err(e) => {
                log::warn!("Effect {id}: {e}; passing input through");
                instance.error = Some(e);
                return instance;
            }
        };

        instance.name = def.name.clone();
        instance.params = ParamStore::from_defs(&def.inputs);
        instance.global = def.global;
        instance.replaces_video = def.replaces_video;

        match def.kind {
            EffectKind::Feedback => {
                instance.runtime =
                    EffectRuntime::Feedback(Box::new(FeedbackCompositor::new(device, hdr_format, canvas)));
            }
            EffectKind::Shader => match ShaderStage::new(device, hdr_format, canvas, def) {
                Ok(stage) => instance.runtime = EffectRuntime::Shader(Box::new(stage)),
                Err(e) => {
                    log::error!("Effect '{}' failed to load: {e}", def.key);
                    instance.error = Some(e);
                }
            },
        }

        log::info!(
            "Effect {id} '{}' created ({}{})",
            instance.name,
            if instance.global { "global" } else { "layer" },
            if instance.replaces_video { ", replaces video" } else { "" }
        );
        instance
    }

    pub fn error(&self) -> Option<&EffectError> {
        self.error.as_ref()
    }

    /// Shader path this instance renders with, for hot reload.
    pub fn shader_path(&self) -> Option<&str> {
        match &self.runtime {
            EffectRuntime::Shader(stage) => Some(&stage.shader),
            _ => None,
        }
    }

    /// Recompile from the current source on disk. A failure is recorded and
    /// the effect passes through until a later reload succeeds.
    pub fn reload_shader(&mut self, device: &Device, hdr_format: TextureFormat) -> bool {
        let EffectRuntime::Shader(stage) = &mut self.runtime else {
            return false;
        };
        match stage.reload(device, hdr_format, &self.key) {
            Ok(()) => {
                if self.error.take().is_some() {
                    log::info!("Effect '{}' recovered after reload", self.key);
                }
                log::info!("Effect '{}' reloaded", self.key);
                true
            }
            Err(e) => {
                log::error!("Effect '{}' reload failed: {e}", self.key);
                self.error = Some(e);
                false
            }
        }
    }

    /// Forget feedback history (e.g. after the layer's source changed).
    pub fn reset_history(&mut self) {
        if let EffectRuntime::Feedback(feedback) = &mut self.runtime {
            feedback.reset();
        }
    }

    /// Render this stage. Returns `None` when the effect contributes nothing
    /// (disabled or failed), in which case the caller keeps its input.
    ///
    /// `node` is the scene node of the layer that owns this chain; a global
    /// effect hides it while capturing so it never samples its own output.
    pub fn render(
        &mut self,
        ctx: &FrameContext<'_>,
        encoder: &mut CommandEncoder,
        upstream: Option<&TextureBinding>,
        media_dims: Option<(u32, u32)>,
        scene: &mut Scene<TextureBinding>,
        node: NodeId,
    ) -> Option<TextureBinding> {
        if !self.enabled || self.error.is_some() {
            return None;
        }
        if matches!(self.runtime, EffectRuntime::PassThrough) {
            return None;
        }

        let source = select_input(self.global, upstream.is_some());
        let (input, dims) = match source {
            InputSource::Upstream => (upstream.cloned(), media_dims),
            InputSource::SceneCapture => {
                let capture = self.capture.get_or_insert_with(|| {
                    SceneCapture::new(ctx.device, ctx.pipelines.clone(), ctx.canvas, ctx.capture_scale)
                });
                let captured =
                    capture.capture(ctx.device, ctx.queue, encoder, ctx.canvas, scene, node);
                let dims = (captured.width, captured.height);
                (Some(captured), Some(dims))
            }
            InputSource::Fallback => (None, None),
        };
        let aspect = self.aspect.resolve(dims);

        match &mut self.runtime {
            EffectRuntime::Shader(stage) => {
                let fallback = ctx.fallback.binding();
                let (bound, has_input) = bind_input(input.as_ref(), &fallback);
                Some(stage.render(ctx, encoder, bound, has_input, aspect, &self.params))
            }
            EffectRuntime::Feedback(feedback) => Some(feedback.render(
                ctx.device,
                ctx.queue,
                encoder,
                ctx.canvas,
                ctx.time,
                &feedback_params(&self.params),
                input.as_ref(),
                ctx.fallback,
            )),
            EffectRuntime::PassThrough => None,
        }
    }
}
