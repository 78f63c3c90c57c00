use std::sync::atomic::{AtomicU64, Ordering};

use wgpu::{Device, Sampler, Texture, TextureFormat, TextureView};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique texture identity.
pub fn next_texture_id() -> u64 {
    NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Pixel size of the output canvas. Never zero in either dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Size after applying a resolution scale (e.g. half-res capture).
    pub fn scaled(self, scale: f32) -> Self {
        Self::new(
            (self.width as f32 * scale) as u32,
            (self.height as f32 * scale) as u32,
        )
    }

    pub fn aspect(self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Tracks the size a set of owned targets was allocated at, so a canvas
/// change is detected before the targets are used again.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetSizing {
    allocated: Option<CanvasSize>,
}

impl TargetSizing {
    /// Returns true when the owner must (re)allocate for `canvas`.
    /// The new size is recorded immediately.
    pub fn sync(&mut self, canvas: CanvasSize) -> bool {
        if self.allocated == Some(canvas) {
            return false;
        }
        self.allocated = Some(canvas);
        true
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<CanvasSize> {
        self.allocated
    }
}

/// A borrowed-by-value handle to a sampled texture. Cloning is cheap
/// (wgpu handles are reference counted); `id` changes whenever the
/// producer reallocates, which is how consumers notice swaps.
#[derive(Debug, Clone)]
pub struct TextureBinding {
    pub id: u64,
    pub view: TextureView,
    pub sampler: Sampler,
    pub width: u32,
    pub height: u32,
}

/// An off-screen render target with texture, view, and sampler.
pub struct RenderTarget {
    pub id: u64,
    pub texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    label: String,
}

impl RenderTarget {
    pub fn new(
        device: &Device,
        width: u32,
        height: u32,
        format: TextureFormat,
        scale: f32,
        label: &str,
    ) -> Self {
        let size = CanvasSize::new(width, height).scaled(scale);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label}-sampler")),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        Self {
            id: next_texture_id(),
            texture,
            view,
            sampler,
            format,
            width: size.width,
            height: size.height,
            scale,
            label: label.to_string(),
        }
    }

    /// Reallocate at the new canvas size. Returns true if the texture changed.
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) -> bool {
        let size = CanvasSize::new(width, height).scaled(self.scale);
        if size.width == self.width && size.height == self.height {
            return false;
        }
        let label = std::mem::take(&mut self.label);
        *self = Self::new(device, width, height, self.format, self.scale, &label);
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

/// Two render targets with alternating read/write roles.
pub struct PingPongTarget {
    pub targets: [RenderTarget; 2],
    pub current: usize,
}

impl PingPongTarget {
    pub fn new(
        device: &Device,
        width: u32,
        height: u32,
        format: TextureFormat,
        scale: f32,
        label: &str,
    ) -> Self {
        let a = RenderTarget::new(device, width, height, format, scale, &format!("{label}-a"));
        let b = RenderTarget::new(device, width, height, format, scale, &format!("{label}-b"));
        Self {
            targets: [a, b],
            current: 0,
        }
    }

    /// The target we render the current frame into.
    pub fn write_target(&self) -> &RenderTarget {
        &self.targets[self.current]
    }

    /// Returns true if either target was reallocated.
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) -> bool {
        let a = self.targets[0].resize(device, width, height);
        let b = self.targets[1].resize(device, width, height);
        a || b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_size_never_zero() {
        let s = CanvasSize::new(0, 0);
        assert_eq!(s, CanvasSize { width: 1, height: 1 });
        let half = CanvasSize::new(3, 1).scaled(0.25);
        assert_eq!(half.height, 1);
    }

    #[test]
    fn canvas_size_scaled_halves() {
        let s = CanvasSize::new(1920, 1080).scaled(0.5);
        assert_eq!(s, CanvasSize::new(960, 540));
    }

    #[test]
    fn sizing_first_sync_allocates() {
        let mut sizing = TargetSizing::default();
        assert!(sizing.current().is_none());
        assert!(sizing.sync(CanvasSize::new(1280, 720)));
        assert_eq!(sizing.current(), Some(CanvasSize::new(1280, 720)));
    }

    #[test]
    fn sizing_same_size_is_noop() {
        let mut sizing = TargetSizing::default();
        sizing.sync(CanvasSize::new(1280, 720));
        assert!(!sizing.sync(CanvasSize::new(1280, 720)));
    }

    #[test]
    fn sizing_detects_resize() {
        let mut sizing = TargetSizing::default();
        sizing.sync(CanvasSize::new(1280, 720));
        assert!(sizing.sync(CanvasSize::new(1920, 1080)));
        assert_eq!(sizing.current(), Some(CanvasSize::new(1920, 1080)));
    }

    #[test]
    fn texture_ids_are_unique() {
        let a = next_texture_id();
        let b = next_texture_id();
        assert_ne!(a, b);
    }
}
