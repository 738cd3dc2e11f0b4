//! Backend-agnostic value types shared by the device, the command lists and
//! the render graph.

use crate::handle::{BufferHandle, ImageHandle, ResourceHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// Coarse pipeline stages used when recording barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    TopOfPipe,
    VertexInput,
    VertexShader,
    FragmentShader,
    ColorAttachmentOutput,
    Transfer,
    BottomOfPipe,
}

/// The resource access that must finish before (or wait for) a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAccess {
    None,
    MemoryRead,
    MemoryWrite,
    ShaderRead,
    ShaderWrite,
    ColorAttachmentRead,
    ColorAttachmentWrite,
    DepthStencilRead,
    DepthStencilWrite,
    TransferRead,
    TransferWrite,
    IndexRead,
    VertexAttributeRead,
    UniformRead,
}

/// How a resource is being used at a given point of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    RenderTarget,
    DepthWrite,
    DepthRead,
    ShaderRead,
    UniformBuffer,
    VertexBuffer,
    IndexBuffer,
    CopySource,
    CopyDestination,
    PresentSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

/// Payload of a [`ResourceBarrier`], tagged by the resource's type.
///
/// Exactly one variant is active per barrier; every construction site has to
/// match the variant against the handle it transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPayload {
    Image { aspect: ImageAspect },
    Buffer { offset: u64, size: u64 },
}

/// A transition on a single resource, recorded into a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    pub resource: ResourceHandle,
    pub access_before: ResourceAccess,
    pub access_after: ResourceAccess,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
    pub source_queue: QueueType,
    pub destination_queue: QueueType,
    pub payload: BarrierPayload,
}

impl ResourceBarrier {
    /// Transition barrier for an image, on the graphics queue.
    pub fn image(
        image: ImageHandle,
        aspect: ImageAspect,
        (access_before, old_state): (ResourceAccess, ResourceState),
        (access_after, new_state): (ResourceAccess, ResourceState),
    ) -> Self {
        Self {
            resource: ResourceHandle::Image(image),
            access_before,
            access_after,
            old_state,
            new_state,
            source_queue: QueueType::Graphics,
            destination_queue: QueueType::Graphics,
            payload: BarrierPayload::Image { aspect },
        }
    }

    /// Transition barrier for a byte range of a buffer, on the graphics queue.
    pub fn buffer(
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        (access_before, old_state): (ResourceAccess, ResourceState),
        (access_after, new_state): (ResourceAccess, ResourceState),
    ) -> Self {
        Self {
            resource: ResourceHandle::Buffer(buffer),
            access_before,
            access_after,
            old_state,
            new_state,
            source_queue: QueueType::Graphics,
            destination_queue: QueueType::Graphics,
            payload: BarrierPayload::Buffer { offset, size },
        }
    }

    /// Whether the payload variant matches the resource's type tag.
    pub fn payload_matches_resource(&self) -> bool {
        matches!(
            (&self.resource, &self.payload),
            (ResourceHandle::Image(_), BarrierPayload::Image { .. })
                | (ResourceHandle::Buffer(_), BarrierPayload::Buffer { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    UniformBuffer,
    IndexBuffer,
    VertexBuffer,
    StagingBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferResidency {
    HostLocal,
    HostVisible,
    DeviceVisible,
    DeviceLocal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferCreateInfo {
    pub size: u64,
    pub usage: BufferUsage,
    pub residency: BufferResidency,
}
