//! Lowering of the backend-agnostic enums to their Vulkan equivalents.

use ash::vk;

use crate::device::{LoadOp, StoreOp};
use crate::renderpack::{DescriptorType, PixelFormat, TextureUsage, VertexFieldFormat};
use crate::types::{
    BufferResidency, BufferUsage, ImageAspect, PipelineStage, ResourceAccess, ResourceState,
};

use super::allocator::MemoryLocation;

pub fn pixel_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
        PixelFormat::Rgba32F => vk::Format::R32G32B32A32_SFLOAT,
        PixelFormat::Rg16F => vk::Format::R16G16_SFLOAT,
        PixelFormat::R32F => vk::Format::R32_SFLOAT,
        PixelFormat::Depth32 => vk::Format::D32_SFLOAT,
        PixelFormat::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    match stage {
        PipelineStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
        PipelineStage::VertexInput => vk::PipelineStageFlags::VERTEX_INPUT,
        PipelineStage::VertexShader => vk::PipelineStageFlags::VERTEX_SHADER,
        PipelineStage::FragmentShader => vk::PipelineStageFlags::FRAGMENT_SHADER,
        PipelineStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        PipelineStage::Transfer => vk::PipelineStageFlags::TRANSFER,
        PipelineStage::BottomOfPipe => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

pub fn access_flags(access: ResourceAccess) -> vk::AccessFlags {
    match access {
        ResourceAccess::None => vk::AccessFlags::empty(),
        ResourceAccess::MemoryRead => vk::AccessFlags::MEMORY_READ,
        ResourceAccess::MemoryWrite => vk::AccessFlags::MEMORY_WRITE,
        ResourceAccess::ShaderRead => vk::AccessFlags::SHADER_READ,
        ResourceAccess::ShaderWrite => vk::AccessFlags::SHADER_WRITE,
        ResourceAccess::ColorAttachmentRead => vk::AccessFlags::COLOR_ATTACHMENT_READ,
        ResourceAccess::ColorAttachmentWrite => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ResourceAccess::DepthStencilRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceAccess::DepthStencilWrite => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ResourceAccess::TransferRead => vk::AccessFlags::TRANSFER_READ,
        ResourceAccess::TransferWrite => vk::AccessFlags::TRANSFER_WRITE,
        ResourceAccess::IndexRead => vk::AccessFlags::INDEX_READ,
        ResourceAccess::VertexAttributeRead => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ResourceAccess::UniformRead => vk::AccessFlags::UNIFORM_READ,
    }
}

pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
        // buffer-only states never reach an image barrier
        ResourceState::UniformBuffer
        | ResourceState::VertexBuffer
        | ResourceState::IndexBuffer => vk::ImageLayout::GENERAL,
    }
}

pub fn image_aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    match aspect {
        ImageAspect::Color => vk::ImageAspectFlags::COLOR,
        ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
        ImageAspect::Stencil => vk::ImageAspectFlags::STENCIL,
        ImageAspect::DepthStencil => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
    }
}

pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::UniformBuffer => {
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::IndexBuffer => {
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::VertexBuffer => {
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::StagingBuffer => vk::BufferUsageFlags::TRANSFER_SRC,
    }
}

pub fn memory_location(residency: BufferResidency) -> MemoryLocation {
    match residency {
        BufferResidency::HostLocal | BufferResidency::HostVisible => MemoryLocation::CpuToGpu,
        BufferResidency::DeviceVisible => MemoryLocation::GpuToCpu,
        BufferResidency::DeviceLocal => MemoryLocation::GpuOnly,
    }
}

pub fn image_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    match usage {
        TextureUsage::RenderTarget => {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        }
        TextureUsage::DepthTarget => {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        }
        TextureUsage::SampledImage => {
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
        }
    }
}

pub fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub fn vertex_field_format(format: VertexFieldFormat) -> (vk::Format, u32) {
    match format {
        VertexFieldFormat::Float2 => (vk::Format::R32G32_SFLOAT, 8),
        VertexFieldFormat::Float3 => (vk::Format::R32G32B32_SFLOAT, 12),
        VertexFieldFormat::Float4 => (vk::Format::R32G32B32A32_SFLOAT, 16),
        VertexFieldFormat::Uint => (vk::Format::R32_UINT, 4),
    }
}

pub fn shader_stages(stages: &[PipelineStage]) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    for stage in stages {
        flags |= match stage {
            PipelineStage::VertexShader => vk::ShaderStageFlags::VERTEX,
            PipelineStage::FragmentShader => vk::ShaderStageFlags::FRAGMENT,
            _ => vk::ShaderStageFlags::ALL_GRAPHICS,
        };
    }
    if flags.is_empty() {
        flags = vk::ShaderStageFlags::ALL_GRAPHICS;
    }
    flags
}
