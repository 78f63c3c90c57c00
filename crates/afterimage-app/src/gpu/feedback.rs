//! Ping-pong feedback compositor for trail/echo visuals.
//!
//! Each frame samples the previous output (`read`), warps it slightly,
//! blends it with fresh input and renders into `write`; then the roles swap
//! and the freshly written buffer becomes `read`. The per-texel math has a
//! CPU mirror under test that must stay in lockstep with `feedback.wgsl`.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindingResource, CommandEncoder, Device, Queue, RenderPipeline, TextureFormat,
};

use super::compositor::{create_fs_pipeline, sampler_entry, tex_entry, uniform_entry};
use super::fullscreen_quad::run_fullscreen_pass;
use super::placeholder::{FallbackTexture, bind_input};
use super::render_target::{CanvasSize, PingPongTarget, TextureBinding};

const FEEDBACK_FS: &str = include_str!("../../../../assets/shaders/builtin/feedback.wgsl");

/// User-facing feedback controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackParams {
    /// Mix factor in [0,1]; 0 disables trails entirely.
    pub amount: f32,
    /// Rotation applied to the previous frame per step, in radians.
    pub rotation: f32,
    /// Scale about the center; >1 zooms in (trails expand outwards).
    pub zoom: f32,
    /// UV-space translation per step.
    pub translate: Vec2,
    /// Strength of the noise UV perturbation.
    pub noise: f32,
    /// Strength of the radial/streak light leak.
    pub light_leak: f32,
}

impl Default for FeedbackParams {
    fn default() -> Self {
        Self {
            amount: 0.85,
            rotation: 0.004,
            zoom: 1.006,
            translate: Vec2::ZERO,
            noise: 0.002,
            light_leak: 0.15,
        }
    }
}

impl FeedbackParams {
    pub fn clamped_amount(&self) -> f32 {
        self.amount.clamp(0.0, 1.0)
    }
}

/// Role bookkeeping for the buffer pair, independent of the GPU objects.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackHistory {
    size: Option<CanvasSize>,
    read: usize,
    has_previous: bool,
}

/// What the GPU side must do for the frame about to be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlan {
    /// Both buffers must be reallocated at the canvas size first.
    pub reallocate: bool,
    /// Whether `read` holds a valid previous frame. When false the shader
    /// takes its "no previous frame" branch and `read` is not sampled.
    pub sample_previous: bool,
    pub read: usize,
    pub write: usize,
}

impl Default for FeedbackHistory {
    fn default() -> Self {
        Self {
            size: None,
            read: 1,
            has_previous: false,
        }
    }
}

impl FeedbackHistory {
    /// Plan the next frame. A canvas change discards history.
    pub fn begin_frame(&mut self, canvas: CanvasSize) -> FramePlan {
        let reallocate = self.size != Some(canvas);
        if reallocate {
            self.size = Some(canvas);
            self.has_previous = false;
        }
        FramePlan {
            reallocate,
            sample_previous: self.has_previous,
            read: self.read,
            write: 1 - self.read,
        }
    }

    /// Swap roles after `write` was rendered. Returns the index now `read`,
    /// which is this frame's output.
    pub fn end_frame(&mut self) -> usize {
        self.read = 1 - self.read;
        self.has_previous = true;
        self.read
    }

    #[cfg(test)]
    pub fn has_previous(&self) -> bool {
        self.has_previous
    }

    #[cfg(test)]
    pub fn size(&self) -> Option<CanvasSize> {
        self.size
    }

    /// Forget history without touching the buffers (e.g. effect re-enabled).
    pub fn invalidate(&mut self) {
        self.has_previous = false;
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct FeedbackUniforms {
    time: f32,
    amount: f32,
    rotation: f32,
    zoom: f32,
    translate: [f32; 2],
    noise: f32,
    light_leak: f32,
    resolution: [f32; 2],
    has_previous: f32,
    has_input: f32,
}

/// GPU feedback effect. Owns its buffer pair exclusively.
pub struct FeedbackCompositor {
    pipeline: RenderPipeline,
    bgl: BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    targets: PingPongTarget,
    history: FeedbackHistory,
}

impl FeedbackCompositor {
    pub fn new(device: &Device, hdr_format: TextureFormat, canvas: CanvasSize) -> Self {
        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("feedback-bgl"),
            entries: &[
                uniform_entry(0, std::mem::size_of::<FeedbackUniforms>()),
                tex_entry(1),     // previous frame
                tex_entry(2),     // fresh input
                sampler_entry(3), // shared sampler
            ],
        });
        let pipeline = create_fs_pipeline(device, "feedback", &bgl, FEEDBACK_FS, hdr_format);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("feedback-uniforms"),
            size: std::mem::size_of::<FeedbackUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let targets =
            PingPongTarget::new(device, canvas.width, canvas.height, hdr_format, 1.0, "feedback");

        Self {
            pipeline,
            bgl,
            uniform_buffer,
            targets,
            history: FeedbackHistory::default(),
        }
    }

    pub fn reset(&mut self) {
        self.history.invalidate();
    }

    /// Render one feedback step and return the post-swap `read` buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        canvas: CanvasSize,
        time: f32,
        params: &FeedbackParams,
        input: Option<&TextureBinding>,
        fallback: &FallbackTexture,
    ) -> TextureBinding {
        let (input_view, has_input) = bind_input(input.map(|b| &b.view), &fallback.view);
        let plan = self.history.begin_frame(canvas);
        if plan.reallocate {
            self.targets.resize(device, canvas.width, canvas.height);
            log::debug!(
                "Feedback buffers reallocated at {}x{}, history discarded",
                canvas.width,
                canvas.height
            );
        }

        let uniforms = FeedbackUniforms {
            time,
            amount: params.clamped_amount(),
            rotation: params.rotation,
            zoom: params.zoom,
            translate: params.translate.to_array(),
            noise: params.noise,
            light_leak: params.light_leak,
            resolution: [canvas.width as f32, canvas.height as f32],
            has_previous: if plan.sample_previous { 1.0 } else { 0.0 },
            has_input: if has_input { 1.0 } else { 0.0 },
        };
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let read = &self.targets.targets[plan.read];
        let write = &self.targets.targets[plan.write];
        let previous_view = if plan.sample_previous {
            &read.view
        } else {
            &fallback.view
        };

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("feedback-bg"),
            layout: &self.bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(previous_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(input_view),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::Sampler(&read.sampler),
                },
            ],
        });
        run_fullscreen_pass(encoder, "feedback", &self.pipeline, &bind_group, &write.view);

        let output = self.history.end_frame();
        self.targets.targets[output].binding()
    }
}


#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec4};

    use super::reference::{
        composite_texel, feedback_uv, light_leak, procedural_pattern, value_noise,
    };
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn is_finite(v: Vec4) -> bool {
        v.to_array().iter().all(|c| c.is_finite())
    }

    #[test]
    fn first_frame_has_no_previous() {
        let mut h = FeedbackHistory::default();
        let plan = h.begin_frame(CanvasSize::new(640, 360));
        assert!(plan.reallocate);
        assert!(!plan.sample_previous);
        assert_ne!(plan.read, plan.write);
    }

    #[test]
    fn roles_swap_every_frame() {
        let mut h = FeedbackHistory::default();
        let canvas = CanvasSize::new(640, 360);
        let p0 = h.begin_frame(canvas);
        let out0 = h.end_frame();
        assert_eq!(out0, p0.write);
        let p1 = h.begin_frame(canvas);
        assert!(p1.sample_previous);
        assert!(!p1.reallocate);
        assert_eq!(p1.read, out0);
        let out1 = h.end_frame();
        assert_eq!(out1, p1.write);
        assert_ne!(out0, out1);
    }

    #[test]
    fn resize_discards_history_and_reallocates() {
        let mut h = FeedbackHistory::default();
        h.begin_frame(CanvasSize::new(640, 360));
        h.end_frame();
        assert!(h.has_previous());
        let plan = h.begin_frame(CanvasSize::new(1920, 1080));
        assert!(plan.reallocate);
        assert!(!plan.sample_previous);
        assert_eq!(h.size(), Some(CanvasSize::new(1920, 1080)));
    }

    #[test]
    fn invalidate_forces_no_previous_branch() {
        let mut h = FeedbackHistory::default();
        let canvas = CanvasSize::new(64, 64);
        h.begin_frame(canvas);
        h.end_frame();
        h.invalidate();
        assert!(!h.begin_frame(canvas).sample_previous);
    }

    #[test]
    fn frame_zero_output_is_finite() {
        let params = FeedbackParams::default();
        for i in 0..8 {
            let uv = Vec2::new(i as f32 / 7.0, 1.0 - i as f32 / 7.0);
            let fresh = procedural_pattern(uv, 0.0);
            let out = composite_texel(None, fresh, params.amount, light_leak(uv, 0.0));
            assert!(is_finite(out));
        }
    }

    #[test]
    fn zero_amount_passes_input_exactly() {
        let fresh = Vec4::new(0.25, 0.5, 0.75, 1.0);
        let mut prev = None;
        for frame in 0..10 {
            let leak = light_leak(Vec2::new(0.5, 0.5), frame as f32);
            let out = composite_texel(prev, fresh, 0.0, leak);
            assert_eq!(out, fresh);
            prev = Some(Vec4::new(9.0, 9.0, 9.0, 1.0));
        }
    }

    #[test]
    fn full_amount_converges_for_static_input() {
        let fresh = Vec4::new(0.2, 0.4, 0.6, 1.0);
        let leak = 0.1;
        let mut state = composite_texel(None, fresh, 1.0, leak);
        let mut last_delta = f32::MAX;
        for _ in 0..600 {
            let next = composite_texel(Some(state), fresh, 1.0, leak);
            last_delta = (next - state).abs().max_element();
            state = next;
        }
        let fixed_point = fresh + Vec4::new(leak, leak, leak, 0.0);
        assert!(last_delta < 1e-6);
        assert!(approx_eq(state.x, fixed_point.x, 1e-4));
        assert!(approx_eq(state.w, 1.0, 1e-4));
    }

    #[test]
    fn full_amount_forgets_old_content() {
        let fresh = Vec4::new(0.5, 0.5, 0.5, 1.0);
        let mut state = Vec4::new(10.0, 0.0, 0.0, 1.0);
        for _ in 0..600 {
            state = composite_texel(Some(state), fresh, 1.0, 0.0);
        }
        assert!(approx_eq(state.x, 0.5, 1e-3));
    }

    #[test]
    fn identity_transform_keeps_center() {
        let params = FeedbackParams {
            rotation: 0.0,
            zoom: 1.0,
            translate: Vec2::ZERO,
            noise: 0.0,
            ..FeedbackParams::default()
        };
        let uv = feedback_uv(Vec2::new(0.5, 0.5), &params, 3.0);
        assert!(approx_eq(uv.x, 0.5, 1e-6));
        assert!(approx_eq(uv.y, 0.5, 1e-6));
    }

    #[test]
    fn zoom_pulls_samples_toward_center() {
        let params = FeedbackParams {
            rotation: 0.0,
            zoom: 2.0,
            noise: 0.0,
            ..FeedbackParams::default()
        };
        let uv = feedback_uv(Vec2::new(1.0, 0.5), &params, 0.0);
        assert!(approx_eq(uv.x, 0.75, 1e-6));
    }

    #[test]
    fn value_noise_in_unit_range() {
        for i in 0..50 {
            let n = value_noise(Vec2::new(i as f32 * 0.37, i as f32 * 1.13));
            assert!((0.0..=1.0).contains(&n));
        }
    }

    #[test]
    fn light_leak_non_negative() {
        for i in 0..10 {
            let uv = Vec2::new(i as f32 / 9.0, 0.3);
            assert!(light_leak(uv, i as f32) >= 0.0);
        }
    }

    #[test]
    fn amount_clamped() {
        let p = FeedbackParams {
            amount: 3.0,
            ..FeedbackParams::default()
        };
        assert!(approx_eq(p.clamped_amount(), 1.0, 1e-6));
    }

    #[test]
    fn feedback_uniforms_size_is_16_aligned() {
        assert_eq!(std::mem::size_of::<FeedbackUniforms>() % 16, 0);
    }
}
