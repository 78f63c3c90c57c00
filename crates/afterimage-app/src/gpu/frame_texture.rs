use wgpu::{Device, Queue, Sampler, Texture, TextureView};

use super::render_target::{TextureBinding, next_texture_id};

/// CPU-fed RGBA8 texture (sRGB, so sampling linearizes). Size is fixed for
/// the texture's lifetime; consumers can rely on its identity.
pub struct FrameTexture {
    id: u64,
    texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub width: u32,
    pub height: u32,
}

impl FrameTexture {
    pub fn new(device: &Device, width: u32, height: u32, label: &str) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label}-sampler")),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        Self {
            id: next_texture_id(),
            texture,
            view,
            sampler,
            width,
            height,
        }
    }

    /// Upload a tightly packed RGBA8 frame. Frames whose size doesn't match
    /// the texture are rejected.
    pub fn write(&self, queue: &Queue, data: &[u8], width: u32, height: u32) -> bool {
        if !frame_fits(self.width, self.height, data.len(), width, height) {
            log::warn!(
                "Dropping {}x{} frame for {}x{} texture",
                width,
                height,
                self.width,
                self.height
            );
            return false;
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        true
    }

    pub fn binding(&self) -> TextureBinding {
        TextureBinding {
            id: self.id,
            view: self.view.clone(),
            sampler: self.sampler.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

fn frame_fits(tex_w: u32, tex_h: u32, len: usize, width: u32, height: u32) -> bool {
    width == tex_w && height == tex_h && len == (width as usize) * (height as usize) * 4
}
