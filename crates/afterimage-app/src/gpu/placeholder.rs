use wgpu::{Device, Queue, Sampler, Texture, TextureFormat, TextureView};

use super::render_target::{TextureBinding, next_texture_id};

/// What a pass samples: its input if it has one, else `fallback`. The flag
/// is `has_input` as the shader sees it.
pub fn bind_input<'a, T: ?Sized>(input: Option<&'a T>, fallback: &'a T) -> (&'a T, bool) {
    match input {
        Some(texture) => (texture, true),
        None => (fallback, false),
    }
}

/// A 1x1 transparent-black texture bound wherever a real input is missing:
/// layer effects with no upstream, feedback history before the first frame,
/// sources that are not ready yet.
pub struct FallbackTexture {
    #[allow(dead_code)]
    texture: Texture,
    id: u64,
    pub view: TextureView,
    pub sampler: Sampler,
}

impl FallbackTexture {
    pub fn new(device: &Device, queue: &Queue, format: TextureFormat) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fallback-1x1"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        // Zero bytes are transparent black in every format we allocate
        let texel_bytes = format.block_copy_size(None).unwrap_or(8);
        let zeros = vec![0u8; texel_bytes as usize];
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &zeros,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texel_bytes),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fallback-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            texture,
            id: next_texture_id(),
            view,
            sampler,
        }
    }

    pub fn binding(&self) -> TextureBinding {
        TextureBinding {
            id: self.id,
            view: self.view.clone(),
            sampler: self.sampler.clone(),
            width: 1,
            height: 1,
        }
    }
}
