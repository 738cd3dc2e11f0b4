//! Render hardware interface.
//!
//! Everything above this crate talks to the GPU through the [`RenderDevice`]
//! and [`CommandList`] traits; the concrete backends live under [`backend`].

pub mod backend;
pub mod command_list;
pub mod device;
pub mod error;
pub mod handle;
pub mod renderpack;
pub mod types;
pub mod validation;
pub mod window;

pub use command_list::{CommandList, CommandListLevel};
pub use device::{AdapterInfo, AdapterType, AttachmentDesc, FrameToken, LoadOp, RenderDevice, StoreOp};
pub use error::RhiError;
pub use handle::{
    BufferHandle, DescriptorSetHandle, FenceHandle, FramebufferHandle, ImageHandle,
    PipelineHandle, RenderpassHandle, ResourceHandle, SamplerHandle, SemaphoreHandle,
};
pub use window::{OffscreenWindow, RenderWindow};

use derive_builder::Builder;

/// Frames the CPU may run ahead of the GPU. Command pools, per-frame
/// semaphores and transient buffers are all replicated this many times.
pub const NUM_IN_FLIGHT_FRAMES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Vulkan,
    Headless,
}

#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", default)]
pub struct RhiConfig {
    pub backend: BackendType,
    pub enable_debug: bool,
    /// Threads that may record command lists concurrently. Each gets its own
    /// command pool per swapchain image.
    pub num_recording_threads: usize,
    pub vsync: bool,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Vulkan,
            enable_debug: cfg!(debug_assertions),
            num_recording_threads: 1,
            vsync: true,
        }
    }
}

impl RhiConfig {
    pub fn builder() -> RhiConfigBuilder {
        RhiConfigBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_fills_in_defaults() {
        let config = RhiConfig::builder()
            .backend(BackendType::Headless)
            .num_recording_threads(4)
            .build()
            .unwrap();
        assert_eq!(config.backend, BackendType::Headless);
        assert_eq!(config.num_recording_threads, 4);
        assert!(config.vsync);
    }
}
