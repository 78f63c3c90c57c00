pub mod capture;
pub mod compositor;
pub mod context;
pub mod feedback;
pub mod frame_texture;
pub mod fullscreen_quad;
pub mod pipeline;
pub mod placeholder;
pub mod present;
pub mod render_target;
pub mod texture_registry;
pub mod uniforms;

pub use context::GpuContext;
pub use pipeline::EffectPipeline;
pub use uniforms::{EffectUniforms, UniformBuffer};
