use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::command_list::{CommandList, CommandListLevel};
use crate::error::RhiError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, FramebufferHandle, PipelineHandle, RenderpassHandle,
    ResourceHandle,
};
use crate::types::{BarrierPayload, PipelineStage, QueueType, ResourceBarrier};
use crate::validation;

use super::convert;
use super::device::VkState;

pub struct VulkanCommandList {
    pub(super) raw: vk::CommandBuffer,
    level: CommandListLevel,
    queue: QueueType,
    birth_epoch: u64,
    pool_epoch: Arc<AtomicU64>,
    device: ash::Device,
    state: Arc<Mutex<VkState>>,
}

impl VulkanCommandList {
    pub(super) fn new(
        raw: vk::CommandBuffer,
        level: CommandListLevel,
        queue: QueueType,
        pool_epoch: Arc<AtomicU64>,
        device: ash::Device,
        state: Arc<Mutex<VkState>>,
    ) -> Self {
        let birth_epoch = pool_epoch.load(Ordering::Acquire);
        Self {
            raw,
            level,
            queue,
            birth_epoch,
            pool_epoch,
            device,
            state,
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

impl CommandList for VulkanCommandList {
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

        let state = self.state.lock();
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();

        for barrier in barriers {
            match (barrier.resource, barrier.payload) {
                (ResourceHandle::Image(image), BarrierPayload::Image { aspect }) => {
                    let raw = state.image_raw(image)?;
                    image_barriers.push(
                        vk::ImageMemoryBarrier::builder()
                            .src_access_mask(convert::access_flags(barrier.access_before))
                            .dst_access_mask(convert::access_flags(barrier.access_after))
                            .old_layout(convert::image_layout(barrier.old_state))
                            .new_layout(convert::image_layout(barrier.new_state))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(raw)
                            .subresource_range(
                                vk::ImageSubresourceRange::builder()
                                    .aspect_mask(convert::image_aspect(aspect))
                                    .base_mip_level(0)
                                    .level_count(1)
                                    .base_array_layer(0)
                                    .layer_count(1)
                                    .build(),
                            )
                            .build(),
                    );
                }
                (ResourceHandle::Buffer(buffer), BarrierPayload::Buffer { offset, size }) => {
                    let raw = state.buffer_raw(buffer)?;
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier::builder()
                            .src_access_mask(convert::access_flags(barrier.access_before))
                            .dst_access_mask(convert::access_flags(barrier.access_after))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(raw)
                            .offset(offset)
                            .size(size)
                            .build(),
                    );
                }
                _ => {
                    return Err(validation::contract_violation(RhiError::InvalidHandle(
                        format!("barrier payload does not match {:?}", barrier.resource),
                    )));
                }
            }
        }

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.raw,
                convert::pipeline_stage(stages_before),
                convert::pipeline_stage(stages_after),
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
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

        let state = self.state.lock();
        state.check_buffer_range(src, src_offset, num_bytes)?;
        state.check_buffer_range(dst, dst_offset, num_bytes)?;
        let src_raw = state.buffer_raw(src)?;
        let dst_raw = state.buffer_raw(dst)?;

        let region = vk::BufferCopy::builder()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(num_bytes)
            .build();

        unsafe {
            self.device.cmd_copy_buffer(self.raw, src_raw, dst_raw, &[region]);
        }
        Ok(())
    }

    fn execute_command_lists(&mut self, lists: Vec<Box<dyn CommandList>>) -> Result<(), RhiError> {
        self.check_valid()?;

        let mut raw_lists = Vec::with_capacity(lists.len());
        for list in lists {
            let list = list
                .into_any()
                .downcast::<VulkanCommandList>()
                .map_err(|_| {
                    RhiError::InvalidHandle("command list from a different backend".to_owned())
                })?;
            if !list.is_valid() {
                return Err(validation::contract_violation(RhiError::CommandListExpired));
            }
            unsafe { self.device.end_command_buffer(list.raw)? };
            raw_lists.push(list.raw);
        }

        unsafe { self.device.cmd_execute_commands(self.raw, &raw_lists) };
        Ok(())
    }

    fn begin_renderpass(
        &mut self,
        renderpass: RenderpassHandle,
        framebuffer: FramebufferHandle,
    ) -> Result<(), RhiError> {
        self.check_valid()?;

        let state = self.state.lock();
        let (pass_raw, attachment_count) = state.renderpass_raw(renderpass)?;
        let (framebuffer_raw, size) = state.framebuffer_raw(renderpass, framebuffer)?;

        let clear_values =
            vec![vk::ClearValue { color: vk::ClearColorValue { float32: [0.0; 4] } }; attachment_count];

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass_raw)
            .framebuffer(framebuffer_raw)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width: size[0], height: size[1] },
            })
            .clear_values(&clear_values)
            .build();

        unsafe {
            self.device
                .cmd_begin_render_pass(self.raw, &begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    fn end_renderpass(&mut self) -> Result<(), RhiError> {
        self.check_valid()?;
        unsafe { self.device.cmd_end_render_pass(self.raw) };
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RhiError> {
        self.check_valid()?;
        let raw = self.state.lock().pipeline_raw(pipeline)?.0;
        unsafe {
            self.device
                .cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, raw);
        }
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        pipeline: PipelineHandle,
        sets: &[DescriptorSetHandle],
    ) -> Result<(), RhiError> {
        self.check_valid()?;

        let state = self.state.lock();
        let layout = state.pipeline_raw(pipeline)?.1;
        let raw_sets = sets
            .iter()
            .map(|set| state.descriptor_set_raw(*set))
            .collect::<Result<Vec<_>, _>>()?;

        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.raw,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &raw_sets,
                &[],
            );
        }
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, buffers: &[BufferHandle]) -> Result<(), RhiError> {
        self.check_valid()?;

        let state = self.state.lock();
        let raw_buffers = buffers
            .iter()
            .map(|buffer| state.buffer_raw(*buffer))
            .collect::<Result<Vec<_>, _>>()?;
        let offsets = vec![0u64; raw_buffers.len()];

        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.raw, 0, &raw_buffers, &offsets);
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError> {
        self.check_valid()?;
        let raw = self.state.lock().buffer_raw(buffer)?;
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.raw, raw, 0, vk::IndexType::UINT32);
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.check_valid()?;
        unsafe {
            self.device
                .cmd_draw_indexed(self.raw, index_count, instance_count, 0, 0, first_instance);
        }
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
