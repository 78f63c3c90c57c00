pub mod format;
pub mod loader;
pub mod registry;
pub mod runtime;

pub use registry::EffectRegistry;
pub use runtime::{EffectInstance, FrameContext};

/// Failures contained to one effect instance. The instance keeps the error
/// and passes its input through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EffectError {
    #[error("unknown effect '{0}'")]
    UnknownEffect(String),
    #[error("failed to load shader {path}: {reason}")]
    ShaderLoad { path: String, reason: String },
    #[error("shader compilation failed: {0}")]
    Compile(String),
}
