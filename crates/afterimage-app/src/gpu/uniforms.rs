use bytemuck::{Pod, Zeroable};
use wgpu::{Buffer, Device, Queue};

use crate::params::PARAM_SLOTS;

/// Shader uniforms packed for GPU consumption (128 bytes).
/// Must be kept in sync with the WGSL `EffectUniforms` struct in
/// [`EFFECT_UNIFORMS_WGSL`].
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct EffectUniforms {
    pub time: f32,
    pub delta_time: f32,
    pub resolution: [f32; 2],
    // 16 bytes

    /// Aspect ratio of the effect's source (see `AspectResolver`).
    pub aspect: f32,
    pub bpm: f32,
    pub frame_index: f32,
    /// 1.0 when a real upstream/captured input is bound, 0.0 for the fallback.
    pub has_input: f32,
    // 16 bytes (32 total)

    // User params
    pub params: [f32; PARAM_SLOTS],
    // 64 bytes (96 total)

    // Padding to 128 bytes
    pub _pad: [f32; 8],
}

/// WGSL declarations prepended to every effect shader, after the vertex stage.
pub const EFFECT_UNIFORMS_WGSL: &str = r"
struct EffectUniforms {
    time: f32,
    delta_time: f32,
    resolution: vec2f,
    aspect: f32,
    bpm: f32,
    frame_index: f32,
    has_input: f32,
    params: array<vec4f, 4>,
    _pad: array<vec4f, 2>,
}

@group(0) @binding(0) var<uniform> u: EffectUniforms;
@group(0) @binding(1) var t_input: texture_2d<f32>;
@group(0) @binding(2) var s_input: sampler;

fn param(i: u32) -> f32 {
    return u.params[i / 4u][i % 4u];
}
";

pub struct UniformBuffer {
    pub buffer: Buffer,
}

impl UniformBuffer {
    pub fn new(device: &Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("effect-uniforms"),
            size: std::mem::size_of::<EffectUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer }
    }

    pub fn update(&self, queue: &Queue, uniforms: &EffectUniforms) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(uniforms));
    }
}
