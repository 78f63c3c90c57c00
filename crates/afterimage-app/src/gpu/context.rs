use std::sync::Arc;

use anyhow::{Context, Result, bail};
use wgpu::{
    Adapter, CompositeAlphaMode, Device, DeviceDescriptor, ExperimentalFeatures, Instance,
    InstanceDescriptor, MemoryHints, PowerPreference, PresentMode, Queue, RequestAdapterOptions,
    Surface, SurfaceConfiguration, TextureFormat, TextureFormatFeatureFlags, TextureUsages, Trace,
};
use winit::window::Window;

use super::render_target::CanvasSize;

/// sRGB swapchain format if offered, else the first one.
pub fn pick_surface_format(formats: &[TextureFormat]) -> Option<TextureFormat> {
    formats
        .iter()
        .copied()
        .find(TextureFormat::is_srgb)
        .or_else(|| formats.first().copied())
}

/// Mailbox keeps latency low without tearing; vsync otherwise.
pub fn pick_present_mode(modes: &[PresentMode]) -> PresentMode {
    if modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::AutoVsync
    }
}

pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub surface: Surface<'static>,
    pub surface_config: SurfaceConfiguration,
    pub format: TextureFormat,
}

impl GpuContext {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor::default());
        let surface = instance
            .create_surface(window.clone())
            .context("creating window surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("no GPU adapter for this window")?;
        Self::check_hdr_support(&adapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("afterimage-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: MemoryHints::Performance,
            trace: Trace::Off,
        }))
        .context("requesting GPU device")?;

        let capabilities = surface.get_capabilities(&adapter);
        let Some(format) = pick_surface_format(&capabilities.formats) else {
            bail!("surface reports no formats");
        };
        let present_mode = pick_present_mode(&capabilities.present_modes);
        let alpha_mode = capabilities
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(CompositeAlphaMode::Auto);

        let size = window.inner_size();
        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        let info = adapter.get_info();
        log::info!(
            "GPU initialized: {} ({:?}), surface {format:?}, {present_mode:?}",
            info.name,
            info.backend
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            surface,
            surface_config,
            format,
        })
    }

    /// Layer outputs, captures and feedback all render to and sample from
    /// the HDR format with linear filtering.
    fn check_hdr_support(adapter: &Adapter) -> Result<()> {
        let features = adapter.get_texture_format_features(Self::hdr_format());
        let usable = features
            .allowed_usages
            .contains(TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING)
            && features.flags.contains(TextureFormatFeatureFlags::FILTERABLE);
        if !usable {
            bail!(
                "adapter '{}' cannot render and filter {:?}",
                adapter.get_info().name,
                Self::hdr_format()
            );
        }
        Ok(())
    }

    /// Format of every intermediate target (layer outputs, captures, feedback).
    pub const fn hdr_format() -> TextureFormat {
        TextureFormat::Rgba16Float
    }

    pub fn canvas(&self) -> CanvasSize {
        CanvasSize::new(self.surface_config.width, self.surface_config.height)
    }

    /// Reconfigure the swapchain. Zero sizes (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        log::debug!("Surface resized to {width}x{height}");
    }
}
