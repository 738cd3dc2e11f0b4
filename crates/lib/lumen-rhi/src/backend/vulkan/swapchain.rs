use std::sync::Arc;

use ash::vk;

use crate::error::RhiError;

use super::{Instance, PhysicalDevice, Surface};

pub struct AcquiredImage {
    pub image_index: u32,
    pub acquire_semaphore: vk::Semaphore,
    pub render_finished_semaphore: vk::Semaphore,
}

pub struct Swapchain {
    pub(crate) raw: vk::SwapchainKHR,
    pub(crate) func_loader: ash::extensions::khr::Swapchain,
    pub(crate) images: Vec<vk::Image>,
    pub(crate) views: Vec<vk::ImageView>,
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    acquire_semaphores: Vec<vk::Semaphore>,
    render_finished_semaphores: Vec<vk::Semaphore>,
    next_semaphore: usize,
}

impl Swapchain {
    pub fn new(
        instance: &Arc<Instance>,
        physical_device: &PhysicalDevice,
        device: &ash::Device,
        surface: &Surface,
        desired_extent: vk::Extent2D,
        desired_image_count: u32,
        vsync: bool,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface
                .func_loader
                .get_physical_device_surface_capabilities(physical_device.raw, surface.raw)?
        };
        let formats = unsafe {
            surface
                .func_loader
                .get_physical_device_surface_formats(physical_device.raw, surface.raw)?
        };
        let present_modes = unsafe {
            surface
                .func_loader
                .get_physical_device_surface_present_modes(physical_device.raw, surface.raw)?
        };

        if formats.is_empty() {
            return Err(RhiError::UnsupportedFeature("surface formats".to_owned()));
        }
        let surface_format = formats
            .iter()
            .find(|format| format.format == vk::Format::B8G8R8A8_UNORM)
            .copied()
            .unwrap_or_else(|| formats[0]);

        let present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            present_modes
                .iter()
                .copied()
                .find(|mode| *mode == vk::PresentModeKHR::MAILBOX)
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let extent = match capabilities.current_extent.width {
            u32::MAX => desired_extent,
            _ => capabilities.current_extent,
        };

        let mut image_count = desired_image_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.raw)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .build();

        let func_loader = ash::extensions::khr::Swapchain::new(&instance.raw, device);
        let raw = unsafe { func_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { func_loader.get_swapchain_images(raw)? };

        let views = images
            .iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1)
                            .build(),
                    )
                    .build();
                unsafe { device.create_image_view(&view_info, None) }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let mut acquire_semaphores = Vec::with_capacity(images.len());
        let mut render_finished_semaphores = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            acquire_semaphores.push(unsafe { device.create_semaphore(&semaphore_info, None)? });
            render_finished_semaphores
                .push(unsafe { device.create_semaphore(&semaphore_info, None)? });
        }

        log::trace!(
            "Vulkan swapchain created ({} images, {:?})",
            images.len(),
            present_mode
        );

        Ok(Self {
            raw,
            func_loader,
            images,
            views,
            format: surface_format.format,
            extent,
            acquire_semaphores,
            render_finished_semaphores,
            next_semaphore: 0,
        })
    }

    pub fn num_images(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn acquire_next_image(&mut self) -> Result<AcquiredImage, RhiError> {
        let semaphore_index = self.next_semaphore;
        self.next_semaphore = (self.next_semaphore + 1) % self.acquire_semaphores.len();
        let acquire_semaphore = self.acquire_semaphores[semaphore_index];

        let (image_index, _suboptimal) = unsafe {
            self.func_loader.acquire_next_image(
                self.raw,
                u64::MAX,
                acquire_semaphore,
                vk::Fence::null(),
            )?
        };

        Ok(AcquiredImage {
            image_index,
            acquire_semaphore,
            render_finished_semaphore: self.render_finished_semaphores[image_index as usize],
        })
    }

    pub fn present(&self, queue: vk::Queue, image: &AcquiredImage) -> Result<(), RhiError> {
        let present_info = vk::PresentInfoKHR::builder()
            .image_indices(std::slice::from_ref(&image.image_index))
            .swapchains(std::slice::from_ref(&self.raw))
            .wait_semaphores(std::slice::from_ref(&image.render_finished_semaphore))
            .build();

        match unsafe { self.func_loader.queue_present(queue, &present_info) } {
            Ok(_) => Ok(()),
            Err(err)
                if err == vk::Result::ERROR_OUT_OF_DATE_KHR
                    || err == vk::Result::SUBOPTIMAL_KHR =>
            {
                // picked up when the next frame acquires
                Ok(())
            }
            Err(err) => Err(RhiError::Vulkan(err)),
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
        for semaphore in self
            .acquire_semaphores
            .drain(..)
            .chain(self.render_finished_semaphores.drain(..))
        {
            device.destroy_semaphore(semaphore, None);
        }
        self.func_loader.destroy_swapchain(self.raw, None);
    }
}
