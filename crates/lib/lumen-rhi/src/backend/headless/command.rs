use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command_list::{CommandList, CommandListLevel};
use crate::error::RhiError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, FramebufferHandle, PipelineHandle, RenderpassHandle,
};
use crate::types::{PipelineStage, QueueType, ResourceBarrier};
use crate::validation;

use super::device::DeviceState;

/// A command captured by the headless backend, in recording order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    ResourceBarriers {
        stages_before: PipelineStage,
        stages_after: PipelineStage,
        barriers: Vec<ResourceBarrier>,
    },
    CopyBuffer {
        dst: BufferHandle,
        dst_offset: u64,
        src: BufferHandle,
        src_offset: u64,
        num_bytes: u64,
    },
    BeginRenderpass {
        renderpass: RenderpassHandle,
        framebuffer: FramebufferHandle,
    },
    EndRenderpass,
    BindPipeline(PipelineHandle),
    BindDescriptorSets {
        pipeline: PipelineHandle,
        sets: Vec<DescriptorSetHandle>,
    },
    BindVertexBuffers(Vec<BufferHandle>),
    BindIndexBuffer(BufferHandle),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    },
    ExecuteCommands(Vec<RecordedCommand>),
}

pub struct HeadlessCommandList {
    level: CommandListLevel,
    queue: QueueType,
    /// Epoch of the owning pool at allocation time. The pool bumps its
    /// counter on reset, which invalidates this list.
    birth_epoch: u64,
    pool_epoch: Arc<AtomicU64>,
    state: Arc<Mutex<DeviceState>>,
    /// Renderpasses cannot nest, so a single flag tracks balance.
    in_renderpass: bool,
    pub(super) commands: Vec<RecordedCommand>,
}

impl HeadlessCommandList {
    pub(super) fn new(
        level: CommandListLevel,
        queue: QueueType,
        pool_epoch: Arc<AtomicU64>,
        state: Arc<Mutex<DeviceState>>,
    ) -> Self {
        let birth_epoch = pool_epoch.load(Ordering::Acquire);
        Self {
            level,
            queue,
            birth_epoch,
            pool_epoch,
            state,
            in_renderpass: false,
            commands: Vec::new(),
        }
    }

    pub(super) fn queue(&self) -> QueueType {
        self.queue
    }

    fn check_valid(&self) -> Result<(), RhiError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(validation::contract_violation(RhiError::CommandListExpired))
        }
    }
}

impl CommandList for HeadlessCommandList {
    fn level(&self) -> CommandListLevel {
        self.level
    }

    fn is_valid(&self) -> bool {
        self.birth_epoch == self.pool_epoch.load(Ordering::Acquire)
    }

    fn resource_barriers(
        &mut self,
        stages_before: PipelineStage,
        stages_after: PipelineStage,
        barriers: &[ResourceBarrier],
    ) -> Result<(), RhiError> {
        self.check_valid()?;
        {
            let state = self.state.lock();
            for barrier in barriers {
                state.check_resource_exists(barrier.resource)?;
            }
        }
        self.commands.push(RecordedCommand::ResourceBarriers {
            stages_before,
            stages_after,
            barriers: barriers.to_vec(),
        });
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        src: BufferHandle,
        src_offset: u64,
        num_bytes: u64,
    ) -> Result<(), RhiError> {
        self.check_valid()?;
        {
            let state = self.state.lock();
            state.check_buffer_range(src, src_offset, num_bytes)?;
            state.check_buffer_range(dst, dst_offset, num_bytes)?;
        }
        self.commands.push(RecordedCommand::CopyBuffer {
            dst,
            dst_offset,
            src,
            src_offset,
            num_bytes,
        });
        Ok(())
    }

    fn execute_command_lists(&mut self, lists: Vec<Box<dyn CommandList>>) -> Result<(), RhiError> {
        self.check_valid()?;
        for list in lists {
            let list = list
                .into_any()
                .downcast::<HeadlessCommandList>()
                .map_err(|_| {
                    RhiError::InvalidHandle("command list from a different backend".to_owned())
                })?;
            if !list.is_valid() {
                return Err(validation::contract_violation(RhiError::CommandListExpired));
            }
            self.commands.push(RecordedCommand::ExecuteCommands(list.commands));
        }
        Ok(())
    }

    fn begin_renderpass(
        &mut self,
        renderpass: RenderpassHandle,
        framebuffer: FramebufferHandle,
    ) -> Result<(), RhiError> {
        self.check_valid()?;
        if self.in_renderpass {
            return Err(validation::contract_violation(
                RhiError::UnbalancedRenderpass(format!(
                    "begin_renderpass for {:?} inside an open renderpass",
                    renderpass
                )),
            ));
        }
        self.state.lock().check_framebuffer_for_pass(renderpass, framebuffer)?;
        self.in_renderpass = true;
        self.commands.push(RecordedCommand::BeginRenderpass { renderpass, framebuffer });
        Ok(())
    }

    fn end_renderpass(&mut self) -> Result<(), RhiError> {
        self.check_valid()?;
        if !self.in_renderpass {
            return Err(validation::contract_violation(
                RhiError::UnbalancedRenderpass(
                    "end_renderpass without a matching begin".to_owned(),
                ),
            ));
        }
        self.in_renderpass = false;
        self.commands.push(RecordedCommand::EndRenderpass);
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RhiError> {
        self.check_valid()?;
        self.state.lock().check_pipeline_exists(pipeline)?;
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        pipeline: PipelineHandle,
        sets: &[DescriptorSetHandle],
    ) -> Result<(), RhiError> {
        self.check_valid()?;
        {
            let state = self.state.lock();
            state.check_pipeline_exists(pipeline)?;
            for set in sets {
                state.check_descriptor_set_exists(*set)?;
            }
        }
        self.commands.push(RecordedCommand::BindDescriptorSets {
            pipeline,
            sets: sets.to_vec(),
        });
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, buffers: &[BufferHandle]) -> Result<(), RhiError> {
        self.check_valid()?;
        {
            let state = self.state.lock();
            for buffer in buffers {
                state.check_buffer_exists(*buffer)?;
            }
        }
        self.commands.push(RecordedCommand::BindVertexBuffers(buffers.to_vec()));
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError> {
        self.check_valid()?;
        self.state.lock().check_buffer_exists(buffer)?;
        self.commands.push(RecordedCommand::BindIndexBuffer(buffer));
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.check_valid()?;
        self.commands.push(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
            first_instance,
        });
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
