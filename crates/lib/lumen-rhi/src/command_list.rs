//! The command recording interface every backend implements.

use std::any::Any;

use crate::error::RhiError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, FramebufferHandle, PipelineHandle, RenderpassHandle,
};
use crate::types::{PipelineStage, ResourceBarrier};

/// Whether a command list can be submitted directly or only executed from
/// inside a primary list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListLevel {
    Primary,
    Secondary,
}

/// A linear stream of GPU commands.
///
/// Lists are allocated from per-thread, per-swapchain-image pools owned by the
/// device. When the device recycles a pool at the start of a frame, every list
/// previously allocated from it becomes invalid; recording into an invalid
/// list fails with [`RhiError::CommandListExpired`].
pub trait CommandList: Send {
    fn level(&self) -> CommandListLevel;

    /// False once the pool this list came from has been reset.
    fn is_valid(&self) -> bool;

    /// Record barriers that transition resources between usages.
    ///
    /// `stages_before` must complete before the transitions happen, and work
    /// in `stages_after` waits for them.
    fn resource_barriers(
        &mut self,
        stages_before: PipelineStage,
        stages_after: PipelineStage,
        barriers: &[ResourceBarrier],
    ) -> Result<(), RhiError>;

    /// Copy `num_bytes` from `src` at `src_offset` into `dst` at `dst_offset`.
    ///
    /// Both ranges are validated against the buffers' sizes at record time.
    fn copy_buffer(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        src: BufferHandle,
        src_offset: u64,
        num_bytes: u64,
    ) -> Result<(), RhiError>;

    /// Execute secondary lists from this primary list.
    fn execute_command_lists(&mut self, lists: Vec<Box<dyn CommandList>>) -> Result<(), RhiError>;

    fn begin_renderpass(
        &mut self,
        renderpass: RenderpassHandle,
        framebuffer: FramebufferHandle,
    ) -> Result<(), RhiError>;

    fn end_renderpass(&mut self) -> Result<(), RhiError>;

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RhiError>;

    fn bind_descriptor_sets(
        &mut self,
        pipeline: PipelineHandle,
        sets: &[DescriptorSetHandle],
    ) -> Result<(), RhiError>;

    fn bind_vertex_buffers(&mut self, buffers: &[BufferHandle]) -> Result<(), RhiError>;

    fn bind_index_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError>;

    /// Draw `instance_count` instances; instance IDs start at
    /// `first_instance` so batches can index shared per-instance data.
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    ) -> Result<(), RhiError>;

    /// Downcast support so a backend can recover its concrete list type at
    /// submit time.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}
