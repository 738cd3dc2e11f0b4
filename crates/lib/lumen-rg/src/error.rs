use thiserror::Error;

/// Reasons a renderpack cannot be compiled into a runnable graph.
#[derive(Debug, Error)]
pub enum GraphCompileError {
    #[error("Pass dependency cycle involving {passes:?}")]
    CyclicDependency { passes: Vec<String> },

    #[error("Passes {first:?} and {second:?} both write to the backbuffer")]
    MultipleBackbufferWriters { first: String, second: String },

    #[error("No pass writes to the backbuffer")]
    NoBackbufferWriter,

    #[error("Pass {pass:?} references unknown texture {texture:?}")]
    UnknownResource { pass: String, texture: String },

    #[error("Pass {pass:?} depends on unknown pass {dependency:?}")]
    UnknownPass { pass: String, dependency: String },

    #[error(transparent)]
    Rhi(#[from] lumen_rhi::RhiError),
}
