use thiserror::Error;

use crate::handle::BufferHandle;

/// Error taxonomy of the RHI layer.
///
/// Construction-time errors (`Allocation`, `UnsupportedFeature`,
/// `ShaderCompilation`, `AttachmentMismatch`) abort an in-progress renderpack
/// load; per-frame recording errors (`OutOfBounds`, `PoolExhausted`,
/// `CommandListExpired`) are contract violations surfaced through
/// [`crate::validation`].
#[derive(Debug, Error)]
pub enum RhiError {
    #[error("Allocation failed for {name:?}: {reason}")]
    Allocation { name: String, reason: String },

    #[error("Adapter lacks required capability: {0}")]
    UnsupportedFeature(String),

    #[error("Shader stage {name:?} failed to compile for this backend: {reason}")]
    ShaderCompilation { name: String, reason: String },

    #[error(
        "Buffer copy out of bounds: offset {offset} + {num_bytes} bytes exceeds \
         the {size} byte size of {buffer:?}"
    )]
    OutOfBounds {
        buffer: BufferHandle,
        offset: u64,
        num_bytes: u64,
        size: u64,
    },

    #[error("Command list pool exhausted for thread {thread_index}, queue {queue:?}")]
    PoolExhausted {
        thread_index: usize,
        queue: crate::types::QueueType,
    },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid or destroyed handle: {0}")]
    InvalidHandle(String),

    #[error("Command list outlived its pool: the pool was reset since allocation")]
    CommandListExpired,

    #[error("Renderpass begin/end out of balance: {0}")]
    UnbalancedRenderpass(String),

    #[error(
        "Framebuffer attachments do not match the renderpass: expected {expected}, got {actual}"
    )]
    AttachmentMismatch { expected: String, actual: String },

    #[error("Vulkan error: {0:?}")]
    Vulkan(ash::vk::Result),
}

impl From<ash::vk::Result> for RhiError {
    fn from(err: ash::vk::Result) -> Self {
        Self::Vulkan(err)
    }
}
