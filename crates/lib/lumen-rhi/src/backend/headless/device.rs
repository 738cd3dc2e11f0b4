use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command_list::{CommandList, CommandListLevel};
use crate::device::{
    pick_suitable_adapter, AdapterInfo, AdapterType, AttachmentDesc, FrameToken, RenderDevice,
};
use crate::error::RhiError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, FenceHandle, FramebufferHandle, ImageHandle,
    PipelineHandle, RenderpassHandle, ResourceHandle, SamplerHandle, SemaphoreHandle,
};
use crate::renderpack::{PipelineCreateInfo, PixelFormat, TextureCreateInfo, TextureUsage};
use crate::types::{BufferCreateInfo, BufferResidency, QueueType};
use crate::validation;
use crate::window::RenderWindow;
use crate::{RhiConfig, NUM_IN_FLIGHT_FRAMES};

use super::command::HeadlessCommandList;
pub use super::command::RecordedCommand;

/// Lists one pool may hand out between two of its resets.
const MAX_LISTS_PER_POOL: u32 = 64;

/// One `submit_command_list` call, as seen by the device.
#[derive(Debug, Clone)]
pub struct Submission {
    pub queue: QueueType,
    pub commands: Vec<RecordedCommand>,
    pub wait_semaphores: Vec<SemaphoreHandle>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

struct BufferRecord {
    name: String,
    size: u64,
    residency: BufferResidency,
    data: Vec<u8>,
}

struct TextureRecord {
    name: String,
    format: PixelFormat,
    size: [u32; 2],
    #[allow(dead_code)]
    usage: TextureUsage,
}

struct RenderpassRecord {
    name: String,
    attachments: Vec<AttachmentDesc>,
}

struct FramebufferRecord {
    renderpass: RenderpassHandle,
    #[allow(dead_code)]
    images: Vec<ImageHandle>,
    #[allow(dead_code)]
    size: [u32; 2],
}

struct PipelineRecord {
    #[allow(dead_code)]
    name: String,
    #[allow(dead_code)]
    renderpass: RenderpassHandle,
}

struct PoolRecord {
    epoch: Arc<AtomicU64>,
    allocated_since_reset: u32,
}

/// Interior state shared between the device and its command lists.
pub(super) struct DeviceState {
    next_id: u64,
    swapchain_size: [u32; 2],
    swapchain_images: Vec<ImageHandle>,
    frame_count: u64,
    current_image: u32,
    buffers: HashMap<BufferHandle, BufferRecord>,
    textures: HashMap<ImageHandle, TextureRecord>,
    samplers: HashMap<SamplerHandle, String>,
    renderpasses: HashMap<RenderpassHandle, RenderpassRecord>,
    framebuffers: HashMap<FramebufferHandle, FramebufferRecord>,
    pipelines: HashMap<PipelineHandle, PipelineRecord>,
    semaphores: HashMap<SemaphoreHandle, ()>,
    fences: HashMap<FenceHandle, bool>,
    descriptor_sets: HashMap<DescriptorSetHandle, PipelineHandle>,
    pools: HashMap<(usize, u32, QueueType), PoolRecord>,
    backbuffer_framebuffers: HashMap<(RenderpassHandle, u32), FramebufferHandle>,
    submissions: Vec<Submission>,
}

impl DeviceState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(super) fn check_resource_exists(&self, resource: ResourceHandle) -> Result<(), RhiError> {
        let found = match resource {
            ResourceHandle::Buffer(buffer) => self.buffers.contains_key(&buffer),
            ResourceHandle::Image(image) => self.textures.contains_key(&image),
        };
        if found {
            Ok(())
        } else {
            Err(validation::contract_violation(RhiError::ResourceNotFound(
                format!("{:?}", resource),
            )))
        }
    }

    pub(super) fn check_pipeline_exists(&self, pipeline: PipelineHandle) -> Result<(), RhiError> {
        if self.pipelines.contains_key(&pipeline) {
            Ok(())
        } else {
            Err(validation::contract_violation(RhiError::ResourceNotFound(
                format!("{:?}", pipeline),
            )))
        }
    }

    pub(super) fn check_descriptor_set_exists(
        &self,
        set: DescriptorSetHandle,
    ) -> Result<(), RhiError> {
        if self.descriptor_sets.contains_key(&set) {
            Ok(())
        } else {
            Err(validation::contract_violation(RhiError::ResourceNotFound(
                format!("{:?}", set),
            )))
        }
    }

    pub(super) fn check_buffer_exists(&self, buffer: BufferHandle) -> Result<(), RhiError> {
        if self.buffers.contains_key(&buffer) {
            Ok(())
        } else {
            Err(validation::contract_violation(RhiError::ResourceNotFound(
                format!("{:?}", buffer),
            )))
        }
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

    pub(super) fn check_framebuffer_for_pass(
        &self,
        renderpass: RenderpassHandle,
        framebuffer: FramebufferHandle,
    ) -> Result<(), RhiError> {
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
        Ok(())
    }

    fn create_framebuffer_checked(
        &mut self,
        renderpass: RenderpassHandle,
        images: &[ImageHandle],
        size: [u32; 2],
    ) -> Result<FramebufferHandle, RhiError> {
        let pass = self
            .renderpasses
            .get(&renderpass)
            .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", renderpass)))?;
        if images.len() != pass.attachments.len() {
            return Err(validation::contract_violation(RhiError::AttachmentMismatch {
                expected: format!("{} attachments", pass.attachments.len()),
                actual: format!("{} images", images.len()),
            }));
        }
        let attachment_formats: Vec<PixelFormat> =
            pass.attachments.iter().map(|a| a.format).collect();
        for (image, expected) in images.iter().zip(attachment_formats) {
            let texture = self
                .textures
                .get(image)
                .ok_or_else(|| RhiError::ResourceNotFound(format!("{:?}", image)))?;
            if texture.format != expected {
                return Err(validation::contract_violation(RhiError::AttachmentMismatch {
                    expected: format!("{:?}", expected),
                    actual: format!("{:?} ({})", texture.format, texture.name),
                }));
            }
        }
        let handle = FramebufferHandle::new(self.alloc_id());
        self.framebuffers.insert(
            handle,
            FramebufferRecord {
                renderpass,
                images: images.to_vec(),
                size,
            },
        );
        Ok(handle)
    }
}

/// Software implementation of [`RenderDevice`].
pub struct HeadlessDevice {
    adapter: AdapterInfo,
    num_recording_threads: usize,
    state: Arc<Mutex<DeviceState>>,
}

impl HeadlessDevice {
    pub fn new(config: &RhiConfig, window: &dyn RenderWindow) -> Result<Arc<Self>, RhiError> {
        // One plausible adapter per type so selection logic runs for real.
        let adapters = [
            AdapterInfo {
                name: "Lumen Software Adapter".to_owned(),
                adapter_type: AdapterType::Software,
                supports_geometry_shaders: true,
                dedicated_video_memory: 0,
            },
            AdapterInfo {
                name: "Lumen Virtual Adapter".to_owned(),
                adapter_type: AdapterType::Virtual,
                supports_geometry_shaders: true,
                dedicated_video_memory: 512 * 1024 * 1024,
            },
        ];
        let picked = pick_suitable_adapter(&adapters)?;

        let swapchain_size = window.framebuffer_size();
        let mut state = DeviceState {
            next_id: 0,
            swapchain_size,
            swapchain_images: Vec::new(),
            frame_count: 0,
            current_image: 0,
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
            submissions: Vec::new(),
        };

        for idx in 0..NUM_IN_FLIGHT_FRAMES {
            let handle = ImageHandle::new(state.alloc_id());
            state.textures.insert(
                handle,
                TextureRecord {
                    name: format!("swapchain image {}", idx),
                    format: PixelFormat::Rgba8,
                    size: swapchain_size,
                    usage: TextureUsage::RenderTarget,
                },
            );
            state.swapchain_images.push(handle);
        }

        log::debug!(
            "Created headless device ({} x {}, {} swapchain images)",
            swapchain_size[0],
            swapchain_size[1],
            NUM_IN_FLIGHT_FRAMES
        );

        Ok(Arc::new(Self {
            adapter: adapters[picked].clone(),
            num_recording_threads: config.num_recording_threads,
            state: Arc::new(Mutex::new(state)),
        }))
    }

    /// Everything submitted so far, oldest first. Drains the log.
    pub fn drain_submissions(&self) -> Vec<Submission> {
        std::mem::take(&mut self.state.lock().submissions)
    }

    pub fn is_fence_signaled(&self, fence: FenceHandle) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }
}

impl RenderDevice for HeadlessDevice {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn swapchain_size(&self) -> [u32; 2] {
        self.state.lock().swapchain_size
    }

    fn num_swapchain_images(&self) -> u32 {
        NUM_IN_FLIGHT_FRAMES as u32
    }

    fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
        name: &str,
    ) -> Result<BufferHandle, RhiError> {
        let mut state = self.state.lock();
        let handle = BufferHandle::new(state.alloc_id());
        state.buffers.insert(
            handle,
            BufferRecord {
                name: name.to_owned(),
                size: create_info.size,
                residency: create_info.residency,
                data: vec![0; create_info.size as usize],
            },
        );
        Ok(handle)
    }

    fn create_texture(&self, create_info: &TextureCreateInfo) -> Result<ImageHandle, RhiError> {
        let mut state = self.state.lock();
        let size = create_info.dimensions.pixels(state.swapchain_size);
        let handle = ImageHandle::new(state.alloc_id());
        state.textures.insert(
            handle,
            TextureRecord {
                name: create_info.name.clone(),
                format: create_info.format,
                size,
                usage: create_info.usage,
            },
        );
        Ok(handle)
    }

    fn create_sampler(&self, name: &str) -> Result<SamplerHandle, RhiError> {
        let mut state = self.state.lock();
        let handle = SamplerHandle::new(state.alloc_id());
        state.samplers.insert(handle, name.to_owned());
        Ok(handle)
    }

    fn create_renderpass(
        &self,
        name: &str,
        attachments: &[AttachmentDesc],
    ) -> Result<RenderpassHandle, RhiError> {
        let mut state = self.state.lock();
        let handle = RenderpassHandle::new(state.alloc_id());
        state.renderpasses.insert(
            handle,
            RenderpassRecord {
                name: name.to_owned(),
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
        self.state.lock().create_framebuffer_checked(renderpass, images, size)
    }

    fn create_pipeline(
        &self,
        renderpass: RenderpassHandle,
        create_info: &PipelineCreateInfo,
    ) -> Result<PipelineHandle, RhiError> {
        let mut state = self.state.lock();
        if !state.renderpasses.contains_key(&renderpass) {
            return Err(RhiError::ResourceNotFound(format!("{:?}", renderpass)));
        }
        if create_info.vertex_shader.spirv.is_empty() {
            return Err(RhiError::ShaderCompilation {
                name: create_info.vertex_shader.filename.clone(),
                reason: "empty SPIR-V blob".to_owned(),
            });
        }
        let handle = PipelineHandle::new(state.alloc_id());
        state.pipelines.insert(
            handle,
            PipelineRecord {
                name: create_info.name.clone(),
                renderpass,
            },
        );
        Ok(handle)
    }

    fn create_semaphores(&self, count: u32) -> Result<Vec<SemaphoreHandle>, RhiError> {
        let mut state = self.state.lock();
        Ok((0..count)
            .map(|_| {
                let handle = SemaphoreHandle::new(state.alloc_id());
                state.semaphores.insert(handle, ());
                handle
            })
            .collect())
    }

    fn create_fences(&self, count: u32, signaled: bool) -> Result<Vec<FenceHandle>, RhiError> {
        let mut state = self.state.lock();
        Ok((0..count)
            .map(|_| {
                let handle = FenceHandle::new(state.alloc_id());
                state.fences.insert(handle, signaled);
                handle
            })
            .collect())
    }

    fn create_descriptor_set(
        &self,
        pipeline: PipelineHandle,
    ) -> Result<DescriptorSetHandle, RhiError> {
        let mut state = self.state.lock();
        if !state.pipelines.contains_key(&pipeline) {
            return Err(RhiError::ResourceNotFound(format!("{:?}", pipeline)));
        }
        let handle = DescriptorSetHandle::new(state.alloc_id());
        state.descriptor_sets.insert(handle, pipeline);
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
                format!("buffer {:?} ({}) is not host visible", buffer, record.name),
            )));
        }
        let offset = offset as usize;
        record.data[offset..offset + data.len()].copy_from_slice(data);
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
        let pool = state
            .pools
            .entry((thread_index, image, queue))
            .or_insert_with(|| PoolRecord {
                epoch: Arc::new(AtomicU64::new(0)),
                allocated_since_reset: 0,
            });
        if pool.allocated_since_reset >= MAX_LISTS_PER_POOL {
            return Err(validation::contract_violation(RhiError::PoolExhausted {
                thread_index,
                queue,
            }));
        }
        pool.allocated_since_reset += 1;
        let epoch = Arc::clone(&pool.epoch);
        drop(state);
        Ok(Box::new(HeadlessCommandList::new(
            level,
            queue,
            epoch,
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
            .downcast::<HeadlessCommandList>()
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
        let mut state = self.state.lock();
        // The GPU is imaginary so submitted work completes immediately.
        if let Some(fence) = fence_to_signal {
            if let Some(signaled) = state.fences.get_mut(&fence) {
                *signaled = true;
            }
        }
        state.submissions.push(Submission {
            queue,
            commands: list.commands,
            wait_semaphores: wait_semaphores.to_vec(),
            signal_semaphores: signal_semaphores.to_vec(),
            fence: fence_to_signal,
        });
        Ok(())
    }

    fn begin_frame(&self) -> Result<FrameToken, RhiError> {
        let mut state = self.state.lock();
        let frame = state.frame_count;
        let image = (frame % NUM_IN_FLIGHT_FRAMES as u64) as u32;
        state.frame_count = frame + 1;
        state.current_image = image;
        // Recycling this image's pools invalidates every list they handed
        // out for it.
        for ((_, pool_image, _), pool) in state.pools.iter_mut() {
            if *pool_image == image {
                pool.epoch.fetch_add(1, Ordering::Release);
                pool.allocated_since_reset = 0;
            }
        }
        let backbuffer = state.swapchain_images[image as usize];
        Ok(FrameToken {
            frame_count: frame,
            swapchain_image_index: image,
            backbuffer,
        })
    }

    fn end_frame(&self, token: FrameToken) -> Result<(), RhiError> {
        let state = self.state.lock();
        if token.swapchain_image_index != state.current_image {
            return Err(validation::contract_violation(RhiError::InvalidHandle(
                format!(
                    "frame token for image {} presented while image {} is current",
                    token.swapchain_image_index, state.current_image
                ),
            )));
        }
        log::trace!("Presented frame {}", token.frame_count);
        Ok(())
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
        let size = state.swapchain_size;
        let handle = state.create_framebuffer_checked(renderpass, &[backbuffer], size)?;
        state.backbuffer_framebuffers.insert((renderpass, image_index), handle);
        Ok(handle)
    }

    fn wait_idle(&self) -> Result<(), RhiError> {
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer);
    }

    fn destroy_texture(&self, image: ImageHandle) {
        self.state.lock().textures.remove(&image);
    }

    fn destroy_renderpass(&self, renderpass: RenderpassHandle) {
        self.state.lock().renderpasses.remove(&renderpass);
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(&pipeline);
    }

    fn destroy_semaphores(&self, semaphores: Vec<SemaphoreHandle>) {
        let mut state = self.state.lock();
        for semaphore in semaphores {
            state.semaphores.remove(&semaphore);
        }
    }

    fn destroy_fences(&self, fences: Vec<FenceHandle>) {
        let mut state = self.state.lock();
        for fence in fences {
            state.fences.remove(&fence);
        }
    }
}
