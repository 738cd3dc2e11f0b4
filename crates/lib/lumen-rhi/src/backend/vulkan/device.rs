use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrayvec::ArrayVec;
use ash::vk;
use parking_lot::Mutex;

use crate::command_list::{CommandList, CommandListLevel};
use crate::device::{AdapterInfo, AttachmentDesc, FrameToken, RenderDevice};
use crate::error::RhiError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, FenceHandle, FramebufferHandle, ImageHandle,
    PipelineHandle, RenderpassHandle, SamplerHandle, SemaphoreHandle,
};
use crate::renderpack::{PipelineCreateInfo, PixelFormat, TextureCreateInfo};
use crate::types::{BufferCreateInfo, BufferResidency, QueueType};
use crate::validation;
use crate::{RhiConfig, NUM_IN_FLIGHT_FRAMES};

use super::allocator::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc, AllocatorDebugSettings};
use super::command::VulkanCommandList;
use super::convert;
use super::physical_device::{pick_physical_device, PhysicalDevice, QueueFamily};
use super::swapchain::{AcquiredImage, Swapchain};
use super::{Instance, Surface};

const MAX_LISTS_PER_POOL: u32 = 64;

struct VkBuffer {
    raw: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
    residency: BufferResidency,
}

struct VkTexture {
    raw: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: PixelFormat,
    size: [u32; 2],
    /// Swapchain images are owned by the swapchain, not by us.
    owned: bool,
}

struct VkRenderPass {
    raw: vk::RenderPass,
    attachments: Vec<AttachmentDesc>,
}

struct VkFramebuffer {
    raw: vk::Framebuffer,
    renderpass: RenderpassHandle,
    size: [u32; 2],
}

struct VkPipeline {
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
}

struct VkPool {
    raw: vk::CommandPool,
    epoch: Arc<AtomicU64>,
    allocated_since_reset: u32,
    live_buffers: Vec<vk::CommandBuffer>,
}

/// Interior device state shared with the command lists.
pub(super) struct VkState {
    next_id: u64,
    buffers: HashMap<BufferHandle, VkBuffer>,
    textures: HashMap<ImageHandle, VkTexture>,
    samplers: HashMap<SamplerHandle, vk::Sampler>,
    renderpasses: HashMap<RenderpassHandle, VkRenderPass>,
    framebuffers: HashMap<FramebufferHandle, VkFramebuffer>,
    pipelines: HashMap<PipelineHandle, VkPipeline>,
    semaphores: HashMap<SemaphoreHandle, vk::Semaphore>,
    fences: HashMap<FenceHandle, vk::Fence>,
    descriptor_sets: HashMap<DescriptorSetHandle, vk::DescriptorSet>,
    pools: HashMap<(usize, u32, QueueType), VkPool>,
    backbuffer_framebuffers: HashMap<(RenderpassHandle, u32), FramebufferHandle>,
    swapchain_images: Vec<ImageHandle>,
    frame_count: u64,
    current_image: u32,
    current_acquired: Option<AcquiredImage>,
    acquire_wait_pending: bool,
}

impl VkState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(super) fn buffer_raw(&self, buffer: BufferHandle) -> Result<vk::Buffer, RhiError> {
        self.buffers
            .get(&buffer)
            .map(|record| record.raw)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", buffer)))
    }

    pub(super) fn image_raw(&self, image: ImageHandle) -> Result<vk::Image, RhiError> {
        self.textures
            .get(&image)
            .map(|record| record.raw)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", image)))
    }

    pub(super) fn check_buffer_range(
        &self,
        buffer: BufferHandle,
        offset: u64,
        num_bytes: u64,
    ) -> Result<(), RhiError> {
        let record = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", buffer)))?;
        if offset.checked_add(num_bytes).map_or(true, |end| end > record.size) {
            return Err(validation::contract_violation(RhiError::OutOfBounds {
                buffer,
                offset,
                num_bytes,
                size: record.size,
            }));
        }
        Ok(())
    }

    pub(super) fn renderpass_raw(
        &self,
        renderpass: RenderpassHandle,
    ) -> Result<(vk::RenderPass, usize), RhiError> {
        self.renderpasses
            .get(&renderpass)
            .map(|record| (record.raw, record.attachments.len()))
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", renderpass)))
    }

    pub(super) fn framebuffer_raw(
        &self,
        renderpass: RenderpassHandle,
        framebuffer: FramebufferHandle,
    ) -> Result<(vk::Framebuffer, [u32; 2]), RhiError> {
        let record = self
            .framebuffers
            .get(&framebuffer)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", framebuffer)))?;
        if record.renderpass != renderpass {
            return Err(validation::contract_violation(RhiError::AttachmentMismatch {
                expected: format!("framebuffer for {:?}", renderpass),
                actual: format!("framebuffer for {:?}", record.renderpass),
            }));
        }
        Ok((record.raw, record.size))
    }

    pub(super) fn pipeline_raw(
        &self,
        pipeline: PipelineHandle,
    ) -> Result<(vk::Pipeline, vk::PipelineLayout), RhiError> {
        self.pipelines
            .get(&pipeline)
            .map(|record| (record.raw, record.layout))
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", pipeline)))
    }

    pub(super) fn descriptor_set_raw(
        &self,
        set: DescriptorSetHandle,
    ) -> Result<vk::DescriptorSet, RhiError> {
        self.descriptor_sets
            .get(&set)
            .copied()
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", set)))
    }
}

/// [`RenderDevice`] over a real Vulkan device.
///
/// One graphics queue serves every [`QueueType`] for now; lists still declare
/// their queue so recording code is ready for dedicated transfer queues.
pub struct VulkanDevice {
    instance: Arc<Instance>,
    #[allow(dead_code)]
    surface: Arc<Surface>,
    physical_device: PhysicalDevice,
    raw: ash::Device,
    allocator: Mutex<Allocator>,
    queue: vk::Queue,
    queue_family: QueueFamily,
    descriptor_pool: vk::DescriptorPool,
    swapchain: Mutex<Swapchain>,
    swapchain_size: [u32; 2],
    num_recording_threads: usize,
    state: Arc<Mutex<VkState>>,
}

impl VulkanDevice {
    pub fn new(config: &RhiConfig, window: &winit::window::Window) -> Result<Arc<Self>, RhiError> {
        let instance = Instance::new(config.enable_debug)?;
        let surface = Surface::new(&instance, window)?;
        let physical_device = pick_physical_device(&instance, &surface)?;

        let queue_family = physical_device
            .queue_families
            .iter()
            .find(|family| family.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .copied()
            .ok_or_else(|| RhiError::UnsupportedFeature("graphics queue".to_owned()))?;

        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family.index)
            .queue_priorities(&priorities)
            .build()];

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .build();

        let raw = unsafe {
            physical_device
                .instance
                .raw
                .create_device(physical_device.raw, &device_info, None)?
        };
        log::trace!("Vulkan device created");

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw.clone(),
            device: raw.clone(),
            physical_device: physical_device.raw,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: instance.debug_enabled(),
                ..Default::default()
            },
            buffer_device_address: false,
        })
        .map_err(|err| RhiError::Allocation {
            name: "global allocator".to_owned(),
            reason: err.to_string(),
        })?;

        let queue = unsafe { raw.get_device_queue(queue_family.index, 0) };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1024,
            },
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1024)
            .pool_sizes(&pool_sizes)
            .build();
        let descriptor_pool = unsafe { raw.create_descriptor_pool(&descriptor_pool_info, None)? };

        let window_size = window.inner_size();
        let swapchain = Swapchain::new(
            &instance,
            &physical_device,
            &raw,
            &surface,
            vk::Extent2D {
                width: window_size.width,
                height: window_size.height,
            },
            NUM_IN_FLIGHT_FRAMES as u32,
            config.vsync,
        )?;
        let swapchain_size = [swapchain.extent.width, swapchain.extent.height];

        let mut state = VkState {
            next_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            renderpasses: HashMap::new(),
            framebuffers: HashMap::new(),
            pipelines: HashMap::new(),
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            descriptor_sets: HashMap::new(),
            pools: HashMap::new(),
            backbuffer_framebuffers: HashMap::new(),
            swapchain_images: Vec::new(),
            frame_count: 0,
            current_image: 0,
            current_acquired: None,
            acquire_wait_pending: false,
        };

        let swapchain_format = pixel_format_from_vk(swapchain.format);
        for (image, view) in swapchain.images.iter().zip(swapchain.views.iter()) {
            let handle = ImageHandle::new(state.alloc_id());
            state.textures.insert(
                handle,
                VkTexture {
                    raw: *image,
                    view: *view,
                    allocation: None,
                    format: swapchain_format,
                    size: swapchain_size,
                    owned: false,
                },
            );
            state.swapchain_images.push(handle);
        }

        Ok(Arc::new(Self {
            instance,
            surface,
            physical_device,
            raw,
            allocator: Mutex::new(allocator),
            queue,
            queue_family,
            descriptor_pool,
            swapchain: Mutex::new(swapchain),
            swapchain_size,
            num_recording_threads: config.num_recording_threads,
            state: Arc::new(Mutex::new(state)),
        }))
    }

    fn create_framebuffer_checked(
        &self,
        state: &mut VkState,
        renderpass: RenderpassHandle,
        images: &[ImageHandle],
        size: [u32; 2],
    ) -> Result<FramebufferHandle, RhiError> {
        let pass = state
            .renderpasses
            .get(&renderpass)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", renderpass)))?;
        if images.len() != pass.attachments.len()
            || images.len() > super::constants::MAX_RENDERPASS_ATTACHMENTS
        {
            return Err(validation::contract_violation(RhiError::AttachmentMismatch {
                expected: format!("{} attachments", pass.attachments.len()),
                actual: format!("{} images", images.len()),
            }));
        }
        let pass_raw = pass.raw;
        let expected_formats: Vec<PixelFormat> =
            pass.attachments.iter().map(|a| a.format).collect();

        let mut views: ArrayVec<vk::ImageView, { super::constants::MAX_RENDERPASS_ATTACHMENTS }> =
            ArrayVec::new();
        for (image, expected) in images.iter().zip(expected_formats) {
            let texture = state
                .textures
                .get(image)
                .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", image)))?;
            if texture.format != expected {
                return Err(validation::contract_violation(RhiError::AttachmentMismatch {
                    expected: format!("{:?}", expected),
                    actual: format!("{:?}", texture.format),
                }));
            }
            views.push(texture.view);
        }

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(pass_raw)
            .attachments(&views)
            .width(size[0])
            .height(size[1])
            .layers(1)
            .build();
        let raw = unsafe { self.raw.create_framebuffer(&create_info, None)? };

        let handle = FramebufferHandle::new(state.alloc_id());
        state.framebuffers.insert(
            handle,
            VkFramebuffer {
                raw,
                renderpass,
                size,
            },
        );
        Ok(handle)
    }

    fn create_shader_module(&self, spirv: &[u32], name: &str) -> Result<vk::ShaderModule, RhiError> {
        if spirv.is_empty() {
            return Err(RhiError::ShaderCompilation {
                name: name.to_owned(),
                reason: "empty SPIR-V blob".to_owned(),
            });
        }
        let create_info = vk::ShaderModuleCreateInfo::builder().code(spirv).build();
        unsafe { self.raw.create_shader_module(&create_info, None) }.map_err(|err| {
            RhiError::ShaderCompilation {
                name: name.to_owned(),
                reason: format!("{:?}", err),
            }
        })
    }
}

fn pixel_format_from_vk(format: vk::Format) -> PixelFormat {
    match format {
        vk::Format::R16G16B16A16_SFLOAT => PixelFormat::Rgba16F,
        vk::Format::D32_SFLOAT => PixelFormat::Depth32,
        // swapchain formats collapse onto the generic 8-bit rgba
        _ => PixelFormat::Rgba8,
    }
}

impl RenderDevice for VulkanDevice {
    fn adapter(&self) -> &AdapterInfo {
        &self.physical_device.adapter_info
    }

    fn swapchain_size(&self) -> [u32; 2] {
        self.swapchain_size
    }

    fn num_swapchain_images(&self) -> u32 {
        self.swapchain.lock().num_images()
    }

    fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
        name: &str,
    ) -> Result<BufferHandle, RhiError> {
        let buffer_info = vk::BufferCreateInfo {
            size: create_info.size,
            usage: convert::buffer_usage(create_info.usage),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let raw = unsafe { self.raw.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.raw.get_buffer_memory_requirements(raw) };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: convert::memory_location(create_info.residency),
                linear: true,
            })
            .map_err(|err| RhiError::Allocation {
                name: name.to_owned(),
                reason: err.to_string(),
            })?;

        unsafe {
            self.raw
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())?
        };

        let mut state = self.state.lock();
        let handle = BufferHandle::new(state.alloc_id());
        state.buffers.insert(
            handle,
            VkBuffer {
                raw,
                allocation: Some(allocation),
                size: create_info.size,
                residency: create_info.residency,
            },
        );
        Ok(handle)
    }

    fn create_texture(&self, create_info: &TextureCreateInfo) -> Result<ImageHandle, RhiError> {
        let size = create_info.dimensions.pixels(self.swapchain_size);
        let format = convert::pixel_format(create_info.format);

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: size[0],
                height: size[1],
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert::image_usage(create_info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();
        let raw = unsafe { self.raw.create_image(&image_info, None)? };
        let requirements = unsafe { self.raw.get_image_memory_requirements(raw) };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: &create_info.name,
                requirements,
                location: super::allocator::MemoryLocation::GpuOnly,
                linear: false,
            })
            .map_err(|err| RhiError::Allocation {
                name: create_info.name.clone(),
                reason: err.to_string(),
            })?;
        unsafe {
            self.raw
                .bind_image_memory(raw, allocation.memory(), allocation.offset())?
        };

        let aspect = if create_info.format.has_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            )
            .build();
        let view = unsafe { self.raw.create_image_view(&view_info, None)? };

        let mut state = self.state.lock();
        let handle = ImageHandle::new(state.alloc_id());
        state.textures.insert(
            handle,
            VkTexture {
                raw,
                view,
                allocation: Some(allocation),
                format: create_info.format,
                size,
                owned: true,
            },
        );
        Ok(handle)
    }

    fn create_sampler(&self, _name: &str) -> Result<SamplerHandle, RhiError> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .build();
        let raw = unsafe { self.raw.create_sampler(&sampler_info, None)? };

        let mut state = self.state.lock();
        let handle = SamplerHandle::new(state.alloc_id());
        state.samplers.insert(handle, raw);
        Ok(handle)
    }

    fn create_renderpass(
        &self,
        _name: &str,
        attachments: &[AttachmentDesc],
    ) -> Result<RenderpassHandle, RhiError> {
        let mut descriptions = Vec::with_capacity(attachments.len());
        let mut color_refs = Vec::new();
        let mut depth_ref = None;

        for (index, attachment) in attachments.iter().enumerate() {
            let is_depth = attachment.format.has_depth();
            let layout = if is_depth {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            };
            descriptions.push(vk::AttachmentDescription {
                format: convert::pixel_format(attachment.format),
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: convert::load_op(attachment.load_op),
                store_op: convert::store_op(attachment.store_op),
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: layout,
                final_layout: layout,
                ..Default::default()
            });
            let reference = vk::AttachmentReference {
                attachment: index as u32,
                layout,
            };
            if is_depth {
                depth_ref = Some(reference);
            } else {
                color_refs.push(reference);
            }
        }

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(ref depth) = depth_ref {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpass = subpass.build();

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&descriptions)
            .subpasses(std::slice::from_ref(&subpass))
            .build();
        let raw = unsafe { self.raw.create_render_pass(&create_info, None)? };

        let mut state = self.state.lock();
        let handle = RenderpassHandle::new(state.alloc_id());
        state.renderpasses.insert(
            handle,
            VkRenderPass {
                raw,
                attachments: attachments.to_vec(),
            },
        );
        Ok(handle)
    }

    fn create_framebuffer(
        &self,
        renderpass: RenderpassHandle,
        images: &[ImageHandle],
        size: [u32; 2],
    ) -> Result<FramebufferHandle, RhiError> {
        let mut state = self.state.lock();
        self.create_framebuffer_checked(&mut state, renderpass, images, size)
    }

    fn create_pipeline(
        &self,
        renderpass: RenderpassHandle,
        create_info: &PipelineCreateInfo,
    ) -> Result<PipelineHandle, RhiError> {
        let (pass_raw, color_attachment_count) = {
            let state = self.state.lock();
            let pass = state
                .renderpasses
                .get(&renderpass)
                .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", renderpass)))?;
            let colors = pass
                .attachments
                .iter()
                .filter(|a| !a.format.has_depth())
                .count();
            (pass.raw, colors)
        };

        let vertex_module = self.create_shader_module(
            &create_info.vertex_shader.spirv,
            &create_info.vertex_shader.filename,
        )?;
        let fragment_module = match &create_info.fragment_shader {
            Some(shader) => Some(self.create_shader_module(&shader.spirv, &shader.filename)?),
            None => None,
        };

        let entry_point = CString::new("main").map_err(|_| RhiError::ShaderCompilation {
            name: create_info.name.clone(),
            reason: "invalid entry point".to_owned(),
        })?;

        let mut stages = vec![vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(entry_point.as_c_str())
            .build()];
        if let Some(module) = fragment_module {
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(module)
                    .name(entry_point.as_c_str())
                    .build(),
            );
        }

        // interleaved vertex layout at binding zero
        let mut attribute_descriptions = Vec::with_capacity(create_info.vertex_fields.len());
        let mut stride = 0u32;
        for (location, field) in create_info.vertex_fields.iter().enumerate() {
            let (format, size) = convert::vertex_field_format(field.format);
            attribute_descriptions.push(vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format,
                offset: stride,
            });
            stride += size;
        }
        let binding_descriptions = if stride > 0 {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        } else {
            Vec::new()
        };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions)
            .build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .build();

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0)
            .build();

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .build();

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(create_info.depth_test)
            .depth_write_enable(create_info.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .build();

        let blend_attachments = vec![
            vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::FALSE,
                color_write_mask: vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
                ..Default::default()
            };
            color_attachment_count
        ];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .build();

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        // one descriptor set layout per set index the shader declares
        let max_set = create_info
            .bindings
            .iter()
            .map(|binding| binding.set)
            .max()
            .map(|set| set + 1)
            .unwrap_or(0);
        let mut set_layouts = Vec::with_capacity(max_set as usize);
        for set in 0..max_set {
            let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = create_info
                .bindings
                .iter()
                .filter(|binding| binding.set == set)
                .map(|binding| {
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(binding.binding)
                        .descriptor_count(binding.count)
                        .descriptor_type(convert::descriptor_type(binding.descriptor_type))
                        .stage_flags(convert::shader_stages(&binding.stages))
                        .build()
                })
                .collect();
            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
                .bindings(&layout_bindings)
                .build();
            set_layouts.push(unsafe { self.raw.create_descriptor_set_layout(&layout_info, None)? });
        }

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .build();
        let layout = unsafe { self.raw.create_pipeline_layout(&layout_info, None)? };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(pass_raw)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.raw.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, err)| RhiError::ShaderCompilation {
            name: create_info.name.clone(),
            reason: format!("{:?}", err),
        })?;

        unsafe {
            self.raw.destroy_shader_module(vertex_module, None);
            if let Some(module) = fragment_module {
                self.raw.destroy_shader_module(module, None);
            }
        }

        let mut state = self.state.lock();
        let handle = PipelineHandle::new(state.alloc_id());
        state.pipelines.insert(
            handle,
            VkPipeline {
                raw: pipelines[0],
                layout,
                set_layouts,
            },
        );
        Ok(handle)
    }

    fn create_semaphores(&self, count: u32) -> Result<Vec<SemaphoreHandle>, RhiError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let mut handles = Vec::with_capacity(count as usize);
        let mut state = self.state.lock();
        for _ in 0..count {
            let raw = unsafe { self.raw.create_semaphore(&semaphore_info, None)? };
            let handle = SemaphoreHandle::new(state.alloc_id());
            state.semaphores.insert(handle, raw);
            handles.push(handle);
        }
        Ok(handles)
    }

    fn create_fences(&self, count: u32, signaled: bool) -> Result<Vec<FenceHandle>, RhiError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags).build();
        let mut handles = Vec::with_capacity(count as usize);
        let mut state = self.state.lock();
        for _ in 0..count {
            let raw = unsafe { self.raw.create_fence(&fence_info, None)? };
            let handle = FenceHandle::new(state.alloc_id());
            state.fences.insert(handle, raw);
            handles.push(handle);
        }
        Ok(handles)
    }

    fn create_descriptor_set(
        &self,
        pipeline: PipelineHandle,
    ) -> Result<DescriptorSetHandle, RhiError> {
        let mut state = self.state.lock();
        let set_layouts = state
            .pipelines
            .get(&pipeline)
            .map(|record| record.set_layouts.clone())
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", pipeline)))?;
        if set_layouts.is_empty() {
            return Err(RhiError::InvalidHandle(format!(
                "{:?} declares no descriptor sets",
                pipeline
            )));
        }

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts[..1])
            .build();
        let sets = unsafe { self.raw.allocate_descriptor_sets(&alloc_info)? };

        let handle = DescriptorSetHandle::new(state.alloc_id());
        state.descriptor_sets.insert(handle, sets[0]);
        Ok(handle)
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError> {
        let mut state = self.state.lock();
        state.check_buffer_range(buffer, offset, data.len() as u64)?;
        let record = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", buffer)))?;
        if matches!(record.residency, BufferResidency::DeviceLocal) {
            return Err(validation::contract_violation(RhiError::InvalidHandle(
                format!("buffer {:?} is not host visible", buffer),
            )));
        }
        let mapped = record
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?} is not mapped", buffer)))?;
        let offset = offset as usize;
        mapped[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn buffer_size(&self, buffer: BufferHandle) -> Result<u64, RhiError> {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map(|record| record.size)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", buffer)))
    }

    fn allocate_command_list(
        &self,
        thread_index: usize,
        queue: QueueType,
        level: CommandListLevel,
    ) -> Result<Box<dyn CommandList>, RhiError> {
        if thread_index >= self.num_recording_threads {
            return Err(validation::contract_violation(RhiError::InvalidHandle(
                format!(
                    "recording thread index {} out of range (device has {})",
                    thread_index, self.num_recording_threads
                ),
            )));
        }

        let mut state = self.state.lock();
        let image = state.current_image;
        let queue_family_index = self.queue_family.index;
        let device = &self.raw;
        if !state.pools.contains_key(&(thread_index, image, queue)) {
            let pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(queue_family_index)
                .build();
            let raw = unsafe { device.create_command_pool(&pool_info, None)? };
            state.pools.insert(
                (thread_index, image, queue),
                VkPool {
                    raw,
                    epoch: Arc::new(AtomicU64::new(0)),
                    allocated_since_reset: 0,
                    live_buffers: Vec::new(),
                },
            );
        }
        let pool = match state.pools.get_mut(&(thread_index, image, queue)) {
            Some(pool) => pool,
            None => {
                return Err(RhiError::PoolExhausted { thread_index, queue });
            }
        };
        if pool.allocated_since_reset >= MAX_LISTS_PER_POOL {
            return Err(validation::contract_violation(RhiError::PoolExhausted {
                thread_index,
                queue,
            }));
        }
        pool.allocated_since_reset += 1;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool.raw)
            .level(match level {
                CommandListLevel::Primary => vk::CommandBufferLevel::PRIMARY,
                CommandListLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
            })
            .command_buffer_count(1)
            .build();
        let buffers = unsafe { self.raw.allocate_command_buffers(&alloc_info)? };
        let raw = buffers[0];
        pool.live_buffers.push(raw);
        let epoch = Arc::clone(&pool.epoch);
        drop(state);

        let inheritance = vk::CommandBufferInheritanceInfo::default();
        let mut begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if level == CommandListLevel::Secondary {
            begin_info = begin_info.inheritance_info(&inheritance);
        }
        let begin_info = begin_info.build();
        unsafe { self.raw.begin_command_buffer(raw, &begin_info)? };

        Ok(Box::new(VulkanCommandList::new(
            raw,
            level,
            queue,
            epoch,
            self.raw.clone(),
            Arc::clone(&self.state),
        )))
    }

    fn submit_command_list(
        &self,
        list: Box<dyn CommandList>,
        queue: QueueType,
        fence_to_signal: Option<FenceHandle>,
        wait_semaphores: &[SemaphoreHandle],
        signal_semaphores: &[SemaphoreHandle],
    ) -> Result<(), RhiError> {
        let list = list
            .into_any()
            .downcast::<VulkanCommandList>()
            .map_err(|_| {
                RhiError::InvalidHandle("command list from a different backend".to_owned())
            })?;
        if !list.is_valid() {
            return Err(validation::contract_violation(RhiError::CommandListExpired));
        }
        if list.queue() != queue {
            return Err(validation::contract_violation(RhiError::InvalidHandle(
                format!("list allocated for {:?}, submitted to {:?}", list.queue(), queue),
            )));
        }

        unsafe { self.raw.end_command_buffer(list.raw)? };

        let mut state = self.state.lock();
        let mut wait = Vec::with_capacity(wait_semaphores.len() + 1);
        for semaphore in wait_semaphores {
            wait.push(
                state
                    .semaphores
                    .get(semaphore)
                    .copied()
                    .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", semaphore)))?,
            );
        }
        let mut signal = Vec::with_capacity(signal_semaphores.len() + 1);
        for semaphore in signal_semaphores {
            signal.push(
                state
                    .semaphores
                    .get(semaphore)
                    .copied()
                    .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", semaphore)))?,
            );
        }

        // swapchain sync is threaded through the frame's submissions: the
        // first one waits for the acquire, every one signals render-finished
        // so a present can follow at any point
        if let Some(acquired) = &state.current_acquired {
            if state.acquire_wait_pending {
                wait.push(acquired.acquire_semaphore);
            }
            signal.push(acquired.render_finished_semaphore);
        }
        state.acquire_wait_pending = false;

        let fence = match fence_to_signal {
            Some(handle) => state
                .fences
                .get(&handle)
                .copied()
                .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", handle)))?,
            None => vk::Fence::null(),
        };

        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait.len()];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(std::slice::from_ref(&list.raw))
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal)
            .build();

        unsafe { self.raw.queue_submit(self.queue, &[submit_info], fence)? };
        Ok(())
    }

    fn begin_frame(&self) -> Result<FrameToken, RhiError> {
        // Wait for outstanding work before recycling command pools. Coarse,
        // but correct for any submission pattern.
        unsafe { self.raw.queue_wait_idle(self.queue)? };

        let acquired = self.swapchain.lock().acquire_next_image()?;
        let image = acquired.image_index;

        let mut state = self.state.lock();
        for ((_, pool_image, _), pool) in state.pools.iter_mut() {
            if *pool_image == image {
                if !pool.live_buffers.is_empty() {
                    unsafe { self.raw.free_command_buffers(pool.raw, &pool.live_buffers) };
                    pool.live_buffers.clear();
                }
                unsafe {
                    self.raw
                        .reset_command_pool(pool.raw, vk::CommandPoolResetFlags::empty())?
                };
                pool.epoch.fetch_add(1, Ordering::Release);
                pool.allocated_since_reset = 0;
            }
        }

        let frame = state.frame_count;
        state.frame_count = frame + 1;
        state.current_image = image;
        state.current_acquired = Some(acquired);
        state.acquire_wait_pending = true;
        let backbuffer = state.swapchain_images[image as usize];

        Ok(FrameToken {
            frame_count: frame,
            swapchain_image_index: image,
            backbuffer,
        })
    }

    fn end_frame(&self, token: FrameToken) -> Result<(), RhiError> {
        let acquired = {
            let mut state = self.state.lock();
            if token.swapchain_image_index != state.current_image {
                return Err(validation::contract_violation(RhiError::InvalidHandle(
                    format!(
                        "frame token for image {} presented while image {} is current",
                        token.swapchain_image_index, state.current_image
                    ),
                )));
            }
            state.current_acquired.take()
        };
        let acquired = acquired.ok_or_else(|| {
            RhiError::InvalidHandle("end_frame without a matching begin_frame".to_owned())
        })?;

        self.swapchain.lock().present(self.queue, &acquired)
    }

    fn backbuffer_framebuffer(
        &self,
        renderpass: RenderpassHandle,
    ) -> Result<FramebufferHandle, RhiError> {
        let mut state = self.state.lock();
        let image_index = state.current_image;
        if let Some(&cached) = state.backbuffer_framebuffers.get(&(renderpass, image_index)) {
            return Ok(cached);
        }
        let backbuffer = state.swapchain_images[image_index as usize];
        let handle = self.create_framebuffer_checked(
            &mut state,
            renderpass,
            &[backbuffer],
            self.swapchain_size,
        )?;
        state
            .backbuffer_framebuffers
            .insert((renderpass, image_index), handle);
        Ok(handle)
    }

    fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.raw.device_wait_idle()? };
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        if let Some(record) = self.state.lock().buffers.remove(&buffer) {
            unsafe { self.raw.destroy_buffer(record.raw, None) };
            if let Some(allocation) = record.allocation {
                if let Err(err) = self.allocator.lock().free(allocation) {
                    log::error!("Failed to free buffer memory: {}", err);
                }
            }
        }
    }

    fn destroy_texture(&self, image: ImageHandle) {
        if let Some(record) = self.state.lock().textures.remove(&image) {
            if record.owned {
                unsafe {
                    self.raw.destroy_image_view(record.view, None);
                    self.raw.destroy_image(record.raw, None);
                }
                if let Some(allocation) = record.allocation {
                    if let Err(err) = self.allocator.lock().free(allocation) {
                        log::error!("Failed to free image memory: {}", err);
                    }
                }
            }
        }
    }

    fn destroy_renderpass(&self, renderpass: RenderpassHandle) {
        if let Some(record) = self.state.lock().renderpasses.remove(&renderpass) {
            unsafe { self.raw.destroy_render_pass(record.raw, None) };
        }
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        if let Some(record) = self.state.lock().framebuffers.remove(&framebuffer) {
            unsafe { self.raw.destroy_framebuffer(record.raw, None) };
        }
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        if let Some(record) = self.state.lock().pipelines.remove(&pipeline) {
            unsafe {
                self.raw.destroy_pipeline(record.raw, None);
                self.raw.destroy_pipeline_layout(record.layout, None);
                for layout in record.set_layouts {
                    self.raw.destroy_descriptor_set_layout(layout, None);
                }
            }
        }
    }

    fn destroy_semaphores(&self, semaphores: Vec<SemaphoreHandle>) {
        let mut state = self.state.lock();
        for handle in semaphores {
            if let Some(raw) = state.semaphores.remove(&handle) {
                unsafe { self.raw.destroy_semaphore(raw, None) };
            }
        }
    }

    fn destroy_fences(&self, fences: Vec<FenceHandle>) {
        let mut state = self.state.lock();
        for handle in fences {
            if let Some(raw) = state.fences.remove(&handle) {
                unsafe { self.raw.destroy_fence(raw, None) };
            }
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if self.raw.device_wait_idle().is_err() {
                return;
            }
            let mut state = self.state.lock();
            for (_, pool) in state.pools.drain() {
                self.raw.destroy_command_pool(pool.raw, None);
            }
            self.raw.destroy_descriptor_pool(self.descriptor_pool, None);
            self.swapchain.lock().destroy(&self.raw);
            self.surface
                .func_loader
                .destroy_surface(self.surface.raw, None);
            self.raw.destroy_device(None);
        }
    }
}
