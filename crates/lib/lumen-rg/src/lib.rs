//! Render graph: compiles a renderpack's pass and texture declarations into
//! ordered GPU work with transient texture aliasing.

pub mod builder;
pub mod error;
pub mod executor;
pub mod graph;
pub mod pass;

pub use builder::{
    determine_aliasing_of_textures, determine_usage_order_of_textures, order_passes, Range,
    TextureUsageOrder,
};
pub use error::GraphCompileError;
pub use executor::{ExecutorError, FrameExecutor, FrameStage, FrameSync};
pub use graph::RenderGraph;
pub use pass::{CompiledPass, PassContext, RecordFn};
