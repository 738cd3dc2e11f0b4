use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::error::RhiError;

use super::{debug, platform};

pub struct Instance {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
    enable_debug: bool,
}

impl Instance {
    pub fn new(enable_debug: bool) -> Result<Arc<Self>, RhiError> {
        let entry = unsafe { ash::Entry::new() }.map_err(|err| {
            RhiError::UnsupportedFeature(format!("vulkan loader unavailable: {}", err))
        })?;

        let enable_debug = enable_debug && debug::check_validation_layer_support(&entry);
        if !enable_debug {
            log::debug!("Vulkan validation layers disabled");
        }

        let app_name = CString::new("Lumen").map_err(|_| {
            RhiError::UnsupportedFeature("invalid application name".to_owned())
        })?;
        let app_info = vk::ApplicationInfo::builder()
            .api_version(vk::make_api_version(0, 1, 2, 0))
            .application_name(app_name.as_c_str())
            .engine_name(app_name.as_c_str())
            .build();

        let extension_names: Vec<*const i8> = platform::required_extension_names()
            .into_iter()
            .map(|name| name.as_ptr())
            .collect();

        let layer_names: Vec<CString> = if enable_debug {
            super::constants::REQUIRED_VALIDATION_LAYERS
                .iter()
                .filter_map(|layer| CString::new(*layer).ok())
                .collect()
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|layer| layer.as_ptr()).collect();

        let mut debug_messenger_info = debug::populate_debug_messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_ptrs);
        if enable_debug {
            create_info = create_info.push_next(&mut debug_messenger_info);
        }
        let create_info = create_info.build();

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|err| RhiError::Vulkan(vk::Result::from_raw(err_code(err))))?;

        log::trace!("Vulkan instance created");
        Ok(Arc::new(Self {
            entry,
            raw,
            enable_debug,
        }))
    }

    pub fn debug_enabled(&self) -> bool {
        self.enable_debug
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe { self.raw.destroy_instance(None) };
    }
}

fn err_code(err: ash::InstanceError) -> i32 {
    match err {
        ash::InstanceError::VkError(result) => result.as_raw(),
        ash::InstanceError::LoadError(_) => vk::Result::ERROR_INITIALIZATION_FAILED.as_raw(),
    }
}
