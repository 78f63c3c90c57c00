use bytemuck::{Pod, Zeroable};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindingResource, CommandEncoder, Device, Queue, RenderPipeline, TextureFormat,
};

use crate::gpu::compositor::{create_fs_pipeline, sampler_entry, tex_entry, uniform_entry};
use crate::gpu::fullscreen_quad::run_fullscreen_pass;
use crate::gpu::render_target::{CanvasSize, RenderTarget, TargetSizing, TextureBinding};

const MEDIA_BLIT_FS: &str = include_str!("../../../../assets/shaders/builtin/media_blit.wgsl");

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
struct MediaUniforms {
    scale: [f32; 2],
    offset: [f32; 2],
    mirror: f32,
    _pad: [f32; 3],
}

/// Fits a source frame (image, video, camera) into a canvas-sized HDR
/// target, letterboxed or pillarboxed to keep its aspect.
pub struct LetterboxBlit {
    pipeline: RenderPipeline,
    bgl: BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    output: RenderTarget,
    sizing: TargetSizing,
    /// (source id, output id) the bind group was built for.
    cached: Option<(u64, u64, BindGroup)>,
}

impl LetterboxBlit {
    pub fn new(device: &Device, hdr_format: TextureFormat, canvas: CanvasSize, label: &str) -> Self {
        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("media-blit-bgl"),
            entries: &[
                tex_entry(0),
                sampler_entry(1),
                uniform_entry(2, std::mem::size_of::<MediaUniforms>()),
            ],
        });
        let pipeline = create_fs_pipeline(device, "media-blit", &bgl, MEDIA_BLIT_FS, hdr_format);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("media-uniforms"),
            size: std::mem::size_of::<MediaUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output = RenderTarget::new(device, canvas.width, canvas.height, hdr_format, 1.0, label);
        let mut sizing = TargetSizing::default();
        sizing.sync(canvas);

        Self {
            pipeline,
            bgl,
            uniform_buffer,
            output,
            sizing,
            cached: None,
        }
    }

    /// Render `source` into the output target and return it.
    pub fn render(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        canvas: CanvasSize,
        source: &TextureBinding,
        mirror: bool,
    ) -> TextureBinding {
        if self.sizing.sync(canvas) {
            self.output.resize(device, canvas.width, canvas.height);
        }

        let uniforms = compute_media_uniforms(source.width, source.height, canvas, mirror);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let stale = self
            .cached
            .as_ref()
            .is_none_or(|(src, out, _)| *src != source.id || *out != self.output.id);
        if stale {
            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("media-blit-bg"),
                layout: &self.bgl,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::TextureView(&source.view),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::Sampler(&source.sampler),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: self.uniform_buffer.as_entire_binding(),
                    },
                ],
            });
            self.cached = Some((source.id, self.output.id, bind_group));
        }

        if let Some((_, _, bind_group)) = &self.cached {
            run_fullscreen_pass(encoder, "media-blit", &self.pipeline, bind_group, &self.output.view);
        }
        self.output.binding()
    }
}

/// Letterbox scale and offset to fit media into the canvas (fit mode).
fn compute_media_uniforms(
    media_w: u32,
    media_h: u32,
    canvas: CanvasSize,
    mirror: bool,
) -> MediaUniforms {
    let media_aspect = media_w as f32 / media_h.max(1) as f32;
    let viewport_aspect = canvas.aspect();

    let (scale_x, scale_y) = if media_aspect > viewport_aspect {
        // Wider: fit width, bars top/bottom
        (1.0, viewport_aspect / media_aspect)
    } else {
        // Taller: fit height, bars left/right
        (media_aspect / viewport_aspect, 1.0)
    };

    MediaUniforms {
        scale: [scale_x, scale_y],
        offset: [(1.0 - scale_x) * 0.5, (1.0 - scale_y) * 0.5],
        mirror: if mirror { 1.0 } else { 0.0 },
        _pad: [0.0; 3],
    }
}
