//! The device trait every backend implements, plus adapter selection shared
//! by all backends.

use crate::command_list::{CommandList, CommandListLevel};
use crate::error::RhiError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, FenceHandle, FramebufferHandle, ImageHandle,
    PipelineHandle, RenderpassHandle, SamplerHandle, SemaphoreHandle,
};
use crate::renderpack::{PipelineCreateInfo, PixelFormat, TextureCreateInfo};
use crate::types::{BufferCreateInfo, QueueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    Discrete,
    Integrated,
    Virtual,
    Software,
}

/// Properties of a physical adapter, queried before device creation.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub adapter_type: AdapterType,
    pub supports_geometry_shaders: bool,
    pub dedicated_video_memory: u64,
}

/// Pick the most capable adapter from `adapters`.
///
/// Adapters without geometry shader support are filtered out, then the rest
/// are scored by type so a discrete GPU always wins over an integrated one.
pub fn pick_suitable_adapter(adapters: &[AdapterInfo]) -> Result<usize, RhiError> {
    adapters
        .iter()
        .enumerate()
        .filter(|(_, adapter)| adapter.supports_geometry_shaders)
        .max_by_key(|(_, adapter)| match adapter.adapter_type {
            AdapterType::Discrete => 1000,
            AdapterType::Integrated => 100,
            AdapterType::Virtual => 1,
            AdapterType::Software => 0,
        })
        .map(|(idx, adapter)| {
            log::info!("Selected adapter: {}", adapter.name);
            idx
        })
        .ok_or_else(|| RhiError::UnsupportedFeature("geometry shaders".to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// One attachment of a renderpass. The formats listed here are checked
/// against the images bound at framebuffer creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: PixelFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

impl AttachmentDesc {
    pub fn color(format: PixelFormat) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
        }
    }
}

/// Handed out by [`RenderDevice::begin_frame`] and consumed by `end_frame`.
#[derive(Debug, Clone, Copy)]
pub struct FrameToken {
    pub frame_count: u64,
    pub swapchain_image_index: u32,
    /// The swapchain image being rendered to this frame.
    pub backbuffer: ImageHandle,
}

/// A rendering device bound to one adapter.
///
/// Resource creation hands back opaque [`handle`](crate::handle) values; the
/// device owns the underlying objects until the matching `destroy_*` call.
/// All methods take `&self` so the device can be shared across recording
/// threads; backends guard their interior state themselves.
pub trait RenderDevice: Send + Sync {
    fn adapter(&self) -> &AdapterInfo;

    fn swapchain_size(&self) -> [u32; 2];

    fn num_swapchain_images(&self) -> u32;

    // ------------------------------------------------------------------
    // Resource creation
    // ------------------------------------------------------------------

    fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
        name: &str,
    ) -> Result<BufferHandle, RhiError>;

    fn create_texture(&self, create_info: &TextureCreateInfo) -> Result<ImageHandle, RhiError>;

    fn create_sampler(&self, name: &str) -> Result<SamplerHandle, RhiError>;

    fn create_renderpass(
        &self,
        name: &str,
        attachments: &[AttachmentDesc],
    ) -> Result<RenderpassHandle, RhiError>;

    /// Bind `images` to the attachments of `renderpass`.
    ///
    /// Fails with [`RhiError::AttachmentMismatch`] when the image count or
    /// formats disagree with what the renderpass declared.
    fn create_framebuffer(
        &self,
        renderpass: RenderpassHandle,
        images: &[ImageHandle],
        size: [u32; 2],
    ) -> Result<FramebufferHandle, RhiError>;

    fn create_pipeline(
        &self,
        renderpass: RenderpassHandle,
        create_info: &PipelineCreateInfo,
    ) -> Result<PipelineHandle, RhiError>;

    fn create_semaphores(&self, count: u32) -> Result<Vec<SemaphoreHandle>, RhiError>;

    fn create_fences(&self, count: u32, signaled: bool) -> Result<Vec<FenceHandle>, RhiError>;

    fn create_descriptor_set(
        &self,
        pipeline: PipelineHandle,
    ) -> Result<DescriptorSetHandle, RhiError>;

    // ------------------------------------------------------------------
    // Buffer access
    // ------------------------------------------------------------------

    /// Write `data` into `buffer` starting at `offset`. The buffer must be
    /// host visible and the range must fit, otherwise
    /// [`RhiError::OutOfBounds`].
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> Result<(), RhiError>;

    fn buffer_size(&self, buffer: BufferHandle) -> Result<u64, RhiError>;

    // ------------------------------------------------------------------
    // Command recording and submission
    // ------------------------------------------------------------------

    /// Allocate a command list from the pool for (`thread_index`, current
    /// swapchain image, `queue`). `thread_index` must be below the thread
    /// count the device was configured with.
    fn allocate_command_list(
        &self,
        thread_index: usize,
        queue: QueueType,
        level: CommandListLevel,
    ) -> Result<Box<dyn CommandList>, RhiError>;

    /// Submit a finished list to `queue`. Ownership of the list returns to
    /// the device; it is recycled when its pool is next reset.
    fn submit_command_list(
        &self,
        list: Box<dyn CommandList>,
        queue: QueueType,
        fence_to_signal: Option<FenceHandle>,
        wait_semaphores: &[SemaphoreHandle],
        signal_semaphores: &[SemaphoreHandle],
    ) -> Result<(), RhiError>;

    // ------------------------------------------------------------------
    // Frame lifecycle
    // ------------------------------------------------------------------

    /// Acquire the next swapchain image and reset the command pools that
    /// belong to it. Lists recorded against that image two frames ago become
    /// invalid here.
    fn begin_frame(&self) -> Result<FrameToken, RhiError>;

    /// Present the frame's backbuffer.
    fn end_frame(&self, token: FrameToken) -> Result<(), RhiError>;

    /// Framebuffer wrapping the current backbuffer for `renderpass`, created
    /// on first use and cached per swapchain image.
    fn backbuffer_framebuffer(
        &self,
        renderpass: RenderpassHandle,
    ) -> Result<FramebufferHandle, RhiError>;

    fn wait_idle(&self) -> Result<(), RhiError>;

    // ------------------------------------------------------------------
    // Destruction
    // ------------------------------------------------------------------

    fn destroy_buffer(&self, buffer: BufferHandle);

    fn destroy_texture(&self, image: ImageHandle);

    fn destroy_renderpass(&self, renderpass: RenderpassHandle);

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    fn destroy_semaphores(&self, semaphores: Vec<SemaphoreHandle>);

    fn destroy_fences(&self, fences: Vec<FenceHandle>);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, ty: AdapterType, geometry: bool) -> AdapterInfo {
        AdapterInfo {
            name: name.to_owned(),
            adapter_type: ty,
            supports_geometry_shaders: geometry,
            dedicated_video_memory: 0,
        }
    }

    #[test]
    fn discrete_adapter_wins_over_integrated() {
        let adapters = [
            adapter("integrated", AdapterType::Integrated, true),
            adapter("discrete", AdapterType::Discrete, true),
            adapter("reference", AdapterType::Software, true),
        ];
        assert_eq!(pick_suitable_adapter(&adapters).unwrap(), 1);
    }

    #[test]
    fn adapters_without_geometry_shaders_are_skipped() {
        let adapters = [
            adapter("fancy but incapable", AdapterType::Discrete, false),
            adapter("integrated", AdapterType::Integrated, true),
        ];
        assert_eq!(pick_suitable_adapter(&adapters).unwrap(), 1);

        let none = [adapter("incapable", AdapterType::Discrete, false)];
        assert!(matches!(
            pick_suitable_adapter(&none),
            Err(RhiError::UnsupportedFeature(_))
        ));
    }
}
