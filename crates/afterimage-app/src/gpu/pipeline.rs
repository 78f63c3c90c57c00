use wgpu::{
    BindGroupLayout, BindGroupLayoutDescriptor, ColorTargetState, Device, ErrorFilter,
    FragmentState, MultisampleState, PipelineCompilationOptions, PipelineLayoutDescriptor,
    PrimitiveState, RenderPipeline, ShaderModule, TextureFormat, VertexState,
};

use super::compositor::{sampler_entry, tex_entry, uniform_entry};
use super::fullscreen_quad::FULLSCREEN_TRIANGLE_VS_WITH_UV;
use super::uniforms::{EFFECT_UNIFORMS_WGSL, EffectUniforms};

/// Pipeline for a user effect shader: uniforms(0), input texture(1),
/// input sampler(2).
pub struct EffectPipeline {
    pub pipeline: RenderPipeline,
    pub bind_group_layout: BindGroupLayout,
}

impl EffectPipeline {
    /// Compile `fragment_source` (already carrying the uniform block).
    /// Validation errors are captured in an error scope and returned rather
    /// than reaching the device's uncaptured-error handler.
    pub fn new(
        device: &Device,
        format: TextureFormat,
        fragment_source: &str,
        label: &str,
    ) -> Result<Self, String> {
        let bind_group_layout = Self::create_bind_group_layout(device);
        let pipeline =
            Self::compile(device, format, &bind_group_layout, fragment_source, label)?;
        Ok(Self {
            pipeline,
            bind_group_layout,
        })
    }

    /// Recompile in place (hot reload). On failure the old pipeline stays.
    pub fn recreate_pipeline(
        &mut self,
        device: &Device,
        format: TextureFormat,
        fragment_source: &str,
        label: &str,
    ) -> Result<(), String> {
        self.pipeline = Self::compile(
            device,
            format,
            &self.bind_group_layout,
            fragment_source,
            label,
        )?;
        Ok(())
    }

    fn create_bind_group_layout(device: &Device) -> BindGroupLayout {
        device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("effect-bind-group-layout"),
            entries: &[
                uniform_entry(0, std::mem::size_of::<EffectUniforms>()),
                tex_entry(1),
                sampler_entry(2),
            ],
        })
    }

    fn compile(
        device: &Device,
        format: TextureFormat,
        bind_group_layout: &BindGroupLayout,
        fragment_source: &str,
        label: &str,
    ) -> Result<RenderPipeline, String> {
        let full_source = format!("{FULLSCREEN_TRIANGLE_VS_WITH_UV}\n{fragment_source}");

        device.push_error_scope(ErrorFilter::Validation);
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(full_source.into()),
        });
        let pipeline = Self::create_pipeline(device, format, bind_group_layout, &shader_module);
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(pipeline),
        }
    }

    fn create_pipeline(
        device: &Device,
        format: TextureFormat,
        bind_group_layout: &BindGroupLayout,
        shader_module: &ShaderModule,
    ) -> RenderPipeline {
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("effect-pipeline-layout"),
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("effect-render-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: shader_module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: shader_module,
                entry_point: Some("fs_main"),
                targets: &[Some(ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

/// Prepend the effect uniform block unless the source declares its own.
pub fn with_uniform_block(source: &str) -> String {
    if source.contains("struct EffectUniforms") {
        source.to_string()
    } else {
        format!("{EFFECT_UNIFORMS_WGSL}\n{source}")
    }
}
