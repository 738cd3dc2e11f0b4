use std::sync::Arc;

use ash::vk;

use crate::error::RhiError;

use super::{platform, Instance};

pub struct Surface {
    pub(crate) func_loader: ash::extensions::khr::Surface,
    pub(crate) raw: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(instance: &Instance, window: &winit::window::Window) -> Result<Arc<Self>, RhiError> {
        let raw = unsafe { platform::create_surface(&instance.entry, &instance.raw, window)? };
        let func_loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.raw);
        log::trace!("Vulkan surface created");
        Ok(Arc::new(Self { func_loader, raw }))
    }
}
