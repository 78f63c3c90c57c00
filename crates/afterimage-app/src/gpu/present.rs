use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindingResource, CommandEncoder, Device, RenderPipeline, TextureFormat, TextureView,
};

use super::compositor::{create_fs_pipeline, sampler_entry, tex_entry};
use super::fullscreen_quad::run_fullscreen_pass;
use super::render_target::TextureBinding;

const PRESENT_FS: &str = include_str!("../../../../assets/shaders/builtin/present.wgsl");

/// Copies the final HDR composite onto the swapchain texture.
pub struct PresentPass {
    pipeline: RenderPipeline,
    bgl: BindGroupLayout,
    cached: Option<(u64, wgpu::BindGroup)>,
}

impl PresentPass {
    pub fn new(device: &Device, surface_format: TextureFormat) -> Self {
        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("present-bgl"),
            entries: &[tex_entry(0), sampler_entry(1)],
        });
        let pipeline = create_fs_pipeline(device, "present", &bgl, PRESENT_FS, surface_format);
        Self {
            pipeline,
            bgl,
            cached: None,
        }
    }

    pub fn render(
        &mut self,
        device: &Device,
        encoder: &mut CommandEncoder,
        source: &TextureBinding,
        surface_view: &TextureView,
    ) {
        if self.cached.as_ref().is_none_or(|(id, _)| *id != source.id) {
            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("present-bg"),
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
                ],
            });
            self.cached = Some((source.id, bind_group));
        }
        if let Some((_, bind_group)) = &self.cached {
            run_fullscreen_pass(encoder, "present", &self.pipeline, bind_group, surface_view);
        }
    }
}
