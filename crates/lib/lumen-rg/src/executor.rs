//! Per-frame execution of a compiled graph.

use lumen_rhi::command_list::{CommandList, CommandListLevel};
use lumen_rhi::device::{FrameToken, RenderDevice};
use lumen_rhi::handle::{FenceHandle, SemaphoreHandle};
use lumen_rhi::types::{ImageAspect, PipelineStage, QueueType, ResourceAccess, ResourceBarrier, ResourceState};
use lumen_rhi::RhiError;
use thiserror::Error;

use crate::graph::RenderGraph;
use crate::pass::PassContext;

/// Where a frame is in its fixed begin/record/submit sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    NotStarted,
    BarriersInserted,
    Recording,
    Ended,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Frame stage is {actual:?}, but this call requires {expected:?}")]
    WrongStage {
        expected: FrameStage,
        actual: FrameStage,
    },

    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error("Pass {pass:?} failed to record: {source}")]
    PassRecord {
        pass: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Sync primitives the frame's submission signals on completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSync {
    pub fence: Option<FenceHandle>,
    pub render_finished: Option<SemaphoreHandle>,
}

/// Drives one frame through the graph.
///
/// The stages are a strict sequence: [`begin_frame`](FrameExecutor::begin_frame)
/// acquires the backbuffer and opens the frame's command list,
/// [`record_passes`](FrameExecutor::record_passes) records every pass with
/// its surrounding barriers, and [`end_frame`](FrameExecutor::end_frame)
/// submits and presents. Calling a stage out of order fails without touching
/// the device.
pub struct FrameExecutor<'a> {
    device: &'a dyn RenderDevice,
    graph: &'a RenderGraph,
    stage: FrameStage,
    token: Option<FrameToken>,
    list: Option<Box<dyn CommandList>>,
}

impl<'a> FrameExecutor<'a> {
    pub fn new(device: &'a dyn RenderDevice, graph: &'a RenderGraph) -> Self {
        Self {
            device,
            graph,
            stage: FrameStage::NotStarted,
            token: None,
            list: None,
        }
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    fn expect_stage(&self, expected: FrameStage) -> Result<(), ExecutorError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(ExecutorError::WrongStage {
                expected,
                actual: self.stage,
            })
        }
    }

    /// Acquire the next backbuffer and open the frame's command list.
    pub fn begin_frame(&mut self) -> Result<(), ExecutorError> {
        self.expect_stage(FrameStage::NotStarted)?;

        let token = self.device.begin_frame()?;
        let list =
            self.device
                .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)?;

        self.token = Some(token);
        self.list = Some(list);
        self.stage = FrameStage::BarriersInserted;
        Ok(())
    }

    /// Record every pass in graph order, with the read and write barriers
    /// each pass needs, and hand the attachments over to the pass callbacks.
    pub fn record_passes(&mut self) -> Result<(), ExecutorError> {
        self.expect_stage(FrameStage::BarriersInserted)?;

        // list and token are always present in this stage
        let token = match self.token {
            Some(token) => token,
            None => {
                return Err(ExecutorError::WrongStage {
                    expected: FrameStage::BarriersInserted,
                    actual: FrameStage::NotStarted,
                })
            }
        };
        let mut list = match self.list.take() {
            Some(list) => list,
            None => {
                return Err(ExecutorError::WrongStage {
                    expected: FrameStage::BarriersInserted,
                    actual: FrameStage::NotStarted,
                })
            }
        };

        for (pass_index, pass) in self.graph.passes().iter().enumerate() {
            log::trace!("Recording pass {} ({})", pass_index, pass.name);

            // whatever wrote these textures must finish before we sample them
            let read_barriers: Vec<ResourceBarrier> = pass
                .reads
                .iter()
                .map(|&image| {
                    ResourceBarrier::image(
                        image,
                        ImageAspect::Color,
                        (ResourceAccess::ColorAttachmentWrite, ResourceState::RenderTarget),
                        (ResourceAccess::ShaderRead, ResourceState::ShaderRead),
                    )
                })
                .collect();
            if !read_barriers.is_empty() {
                list.resource_barriers(
                    PipelineStage::ColorAttachmentOutput,
                    PipelineStage::FragmentShader,
                    &read_barriers,
                )?;
            }

            let write_barriers: Vec<ResourceBarrier> = pass
                .writes
                .iter()
                .map(|&image| {
                    ResourceBarrier::image(
                        image,
                        ImageAspect::Color,
                        (ResourceAccess::ShaderRead, ResourceState::ShaderRead),
                        (ResourceAccess::ColorAttachmentWrite, ResourceState::RenderTarget),
                    )
                })
                .collect();
            if !write_barriers.is_empty() {
                list.resource_barriers(
                    PipelineStage::FragmentShader,
                    PipelineStage::ColorAttachmentOutput,
                    &write_barriers,
                )?;
            }

            let framebuffer = match pass.framebuffer {
                Some(framebuffer) => framebuffer,
                None => self.device.backbuffer_framebuffer(pass.renderpass)?,
            };

            // the backbuffer becomes a render target right before the one
            // pass that draws into it
            if pass.writes_to_backbuffer {
                let to_render_target = ResourceBarrier::image(
                    token.backbuffer,
                    ImageAspect::Color,
                    (ResourceAccess::MemoryRead, ResourceState::PresentSource),
                    (ResourceAccess::ColorAttachmentWrite, ResourceState::RenderTarget),
                );
                list.resource_barriers(
                    PipelineStage::TopOfPipe,
                    PipelineStage::ColorAttachmentOutput,
                    &[to_render_target],
                )?;
            }

            list.begin_renderpass(pass.renderpass, framebuffer)?;
            if let Some(record) = pass.record_fn() {
                let context = PassContext {
                    pass_index,
                    pass_name: &pass.name,
                    textures: &self.graph.textures,
                };
                record(list.as_mut(), &context).map_err(|source| ExecutorError::PassRecord {
                    pass: pass.name.clone(),
                    source,
                })?;
            }
            list.end_renderpass()?;

            // and back to a presentable state as soon as that pass is done
            if pass.writes_to_backbuffer {
                let to_present = ResourceBarrier::image(
                    token.backbuffer,
                    ImageAspect::Color,
                    (ResourceAccess::ColorAttachmentWrite, ResourceState::RenderTarget),
                    (ResourceAccess::MemoryRead, ResourceState::PresentSource),
                );
                list.resource_barriers(
                    PipelineStage::ColorAttachmentOutput,
                    PipelineStage::BottomOfPipe,
                    &[to_present],
                )?;
            }
        }

        self.list = Some(list);
        self.stage = FrameStage::Recording;
        Ok(())
    }

    /// Submit the frame's command list, signaling `sync`, and present.
    pub fn end_frame(&mut self, sync: FrameSync) -> Result<(), ExecutorError> {
        self.expect_stage(FrameStage::Recording)?;

        let list = match self.list.take() {
            Some(list) => list,
            None => {
                return Err(ExecutorError::WrongStage {
                    expected: FrameStage::Recording,
                    actual: FrameStage::NotStarted,
                })
            }
        };
        let token = match self.token.take() {
            Some(token) => token,
            None => {
                return Err(ExecutorError::WrongStage {
                    expected: FrameStage::Recording,
                    actual: FrameStage::NotStarted,
                })
            }
        };

        let signal_semaphores: Vec<SemaphoreHandle> = sync.render_finished.into_iter().collect();
        self.device
            .submit_command_list(list, QueueType::Graphics, sync.fence, &[], &signal_semaphores)?;
        self.device.end_frame(token)?;

        self.stage = FrameStage::Ended;
        Ok(())
    }
}
