use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BufferBindingType, ColorTargetState,
    CommandEncoder, Device, FragmentState, PipelineCompilationOptions, PipelineLayoutDescriptor,
    PrimitiveState, Queue, RenderPipeline, SamplerBindingType, ShaderStages, TextureFormat,
    TextureSampleType, TextureViewDimension, VertexState,
};

use super::fullscreen_quad::{FULLSCREEN_TRIANGLE_VS_WITH_UV, clear_target, run_fullscreen_pass};
use super::render_target::{CanvasSize, PingPongTarget, TargetSizing, TextureBinding};

const COMPOSITE_FS: &str = include_str!("../../../../assets/shaders/builtin/composite.wgsl");
const BLIT_FS: &str = include_str!("../../../../assets/shaders/builtin/blit.wgsl");

/// Blend mode for compositing layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    Overlay,
    SoftLight,
    Difference,
}

impl BlendMode {
    pub const ALL: &[BlendMode] = &[
        BlendMode::Normal,
        BlendMode::Add,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::SoftLight,
        BlendMode::Difference,
    ];

    pub fn as_u32(&self) -> u32 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Add => 1,
            BlendMode::Multiply => 2,
            BlendMode::Screen => 3,
            BlendMode::Overlay => 4,
            BlendMode::SoftLight => 5,
            BlendMode::Difference => 6,
        }
    }
}

/// One input to a composite: a texture plus how it blends over what's below.
pub struct CompositeInput<'a> {
    pub binding: &'a TextureBinding,
    pub blend_mode: BlendMode,
    pub opacity: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct CompositeUniforms {
    blend_mode: u32,
    opacity: f32,
    _pad0: f32,
    _pad1: f32,
}

/// Pipelines shared by every compositor instance on a device.
pub struct CompositePipelines {
    composite_pipeline: RenderPipeline,
    blit_pipeline: RenderPipeline,
    composite_bgl: BindGroupLayout,
    blit_bgl: BindGroupLayout,
    format: TextureFormat,
}

impl CompositePipelines {
    pub fn new(device: &Device, hdr_format: TextureFormat) -> Arc<Self> {
        // Composite pipeline: bg + fg + uniforms → blended output
        let composite_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("compositor-composite-bgl"),
            entries: &[
                tex_entry(0),      // background
                sampler_entry(1),  // bg sampler
                tex_entry(2),      // foreground
                sampler_entry(3),  // fg sampler
                uniform_entry(4, std::mem::size_of::<CompositeUniforms>()),
            ],
        });
        let composite_pipeline = create_fs_pipeline(
            device,
            "compositor-composite",
            &composite_bgl,
            COMPOSITE_FS,
            hdr_format,
        );

        let blit_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("compositor-blit-bgl"),
            entries: &[tex_entry(0), sampler_entry(1)],
        });
        let blit_pipeline =
            create_fs_pipeline(device, "compositor-blit", &blit_bgl, BLIT_FS, hdr_format);

        Arc::new(Self {
            composite_pipeline,
            blit_pipeline,
            composite_bgl,
            blit_bgl,
            format: hdr_format,
        })
    }
}

/// GPU compositor that blends a list of textures into an owned accumulator
/// sized to the canvas.
pub struct Compositor {
    pipelines: Arc<CompositePipelines>,
    uniform_buffers: Vec<wgpu::Buffer>,
    accumulator: PingPongTarget,
    sizing: TargetSizing,
    label: &'static str,
}

impl Compositor {
    pub fn new(
        device: &Device,
        pipelines: Arc<CompositePipelines>,
        canvas: CanvasSize,
        label: &'static str,
    ) -> Self {
        let accumulator =
            PingPongTarget::new(device, canvas.width, canvas.height, pipelines.format, 1.0, label);
        let mut sizing = TargetSizing::default();
        sizing.sync(canvas);
        Self {
            pipelines,
            uniform_buffers: Vec::new(),
            accumulator,
            sizing,
            label,
        }
    }

    /// Reallocate the accumulator if the canvas changed. Called before every
    /// composite so a stale-size target is never rendered into.
    pub fn ensure_size(&mut self, device: &Device, canvas: CanvasSize) {
        if self.sizing.sync(canvas) {
            self.accumulator.resize(device, canvas.width, canvas.height);
            log::debug!(
                "{}: accumulator reallocated at {}x{}",
                self.label,
                canvas.width,
                canvas.height
            );
        }
    }

    fn uniform_buffer(&mut self, device: &Device, index: usize) -> &wgpu::Buffer {
        while self.uniform_buffers.len() <= index {
            let i = self.uniform_buffers.len();
            self.uniform_buffers.push(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{}-uniforms-{i}", self.label)),
                size: std::mem::size_of::<CompositeUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        &self.uniform_buffers[index]
    }

    /// Composite `layers` bottom to top into the accumulator and return the
    /// result. An empty list produces a cleared (transparent) target.
    pub fn composite(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        canvas: CanvasSize,
        layers: &[CompositeInput<'_>],
    ) -> TextureBinding {
        self.ensure_size(device, canvas);

        let Some(first) = layers.first() else {
            clear_target(
                encoder,
                &format!("{}-clear", self.label),
                &self.accumulator.write_target().view,
            );
            return self.accumulator.write_target().binding();
        };

        // Handle first layer: blit if fully opaque, composite against black if not
        if first.opacity < 1.0 {
            let uniforms = CompositeUniforms {
                blend_mode: BlendMode::Normal.as_u32(),
                opacity: first.opacity,
                _pad0: 0.0,
                _pad1: 0.0,
            };
            queue.write_buffer(self.uniform_buffer(device, 0), 0, bytemuck::bytes_of(&uniforms));

            let write_idx = self.accumulator.current;
            let bg_idx = 1 - write_idx;
            clear_target(
                encoder,
                &format!("{}-clear-bg", self.label),
                &self.accumulator.targets[bg_idx].view,
            );

            let bg = &self.accumulator.targets[bg_idx];
            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("compositor-first-layer-bg"),
                layout: &self.pipelines.composite_bgl,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::TextureView(&bg.view),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::Sampler(&bg.sampler),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::TextureView(&first.binding.view),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: BindingResource::Sampler(&first.binding.sampler),
                    },
                    BindGroupEntry {
                        binding: 4,
                        resource: self.uniform_buffers[0].as_entire_binding(),
                    },
                ],
            });

            run_fullscreen_pass(
                encoder,
                "compositor-first-opacity",
                &self.pipelines.composite_pipeline,
                &bind_group,
                &self.accumulator.targets[write_idx].view,
            );
        } else {
            // Fast path: blit first layer directly (opacity == 1.0)
            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("compositor-blit-bg"),
                layout: &self.pipelines.blit_bgl,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::TextureView(&first.binding.view),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::Sampler(&first.binding.sampler),
                    },
                ],
            });
            run_fullscreen_pass(
                encoder,
                "compositor-blit",
                &self.pipelines.blit_pipeline,
                &bind_group,
                &self.accumulator.write_target().view,
            );
        }

        // Result of the first layer is in targets[current]
        let mut read_idx = self.accumulator.current;

        for (pass_idx, layer) in layers[1..].iter().enumerate() {
            let write_idx = 1 - read_idx;
            // Buffer [0] may be used for first layer opacity
            let buf_idx = pass_idx + 1;

            let uniforms = CompositeUniforms {
                blend_mode: layer.blend_mode.as_u32(),
                opacity: layer.opacity,
                _pad0: 0.0,
                _pad1: 0.0,
            };
            queue.write_buffer(
                self.uniform_buffer(device, buf_idx),
                0,
                bytemuck::bytes_of(&uniforms),
            );

            let bg_target = &self.accumulator.targets[read_idx];
            let write_target = &self.accumulator.targets[write_idx];

            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("compositor-composite-bg"),
                layout: &self.pipelines.composite_bgl,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::TextureView(&bg_target.view),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::Sampler(&bg_target.sampler),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::TextureView(&layer.binding.view),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: BindingResource::Sampler(&layer.binding.sampler),
                    },
                    BindGroupEntry {
                        binding: 4,
                        resource: self.uniform_buffers[buf_idx].as_entire_binding(),
                    },
                ],
            });

            run_fullscreen_pass(
                encoder,
                "compositor-composite",
                &self.pipelines.composite_pipeline,
                &bind_group,
                &write_target.view,
            );

            read_idx = write_idx;
        }

        self.accumulator.targets[read_idx].binding()
    }
}

// --- Helper functions shared by the other fullscreen pipelines ---

pub fn tex_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub fn sampler_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(SamplerBindingType::Filtering),
        count: None,
    }
}

pub fn uniform_entry(binding: u32, size: usize) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: std::num::NonZeroU64::new(size as u64),
        },
        count: None,
    }
}

pub fn create_fs_pipeline(
    device: &Device,
    label: &str,
    bgl: &BindGroupLayout,
    fragment_src: &str,
    target_format: TextureFormat,
) -> RenderPipeline {
    let full_source = format!("{FULLSCREEN_TRIANGLE_VS_WITH_UV}\n{fragment_src}");
    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(full_source.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some(&format!("{label}-layout")),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{label}-pipeline")),
        layout: Some(&pipeline_layout),
        vertex: VertexState {
            module: &shader_module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: PipelineCompilationOptions::default(),
        },
        fragment: Some(FragmentState {
            module: &shader_module,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format: target_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: PipelineCompilationOptions::default(),
        }),
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}
