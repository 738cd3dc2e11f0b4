use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use ash::vk;

use super::constants;

pub(crate) fn vk_to_string(raw: &[c_char]) -> String {
    let cstr = unsafe { CStr::from_ptr(raw.as_ptr()) };
    cstr.to_string_lossy().into_owned()
}

pub(crate) fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let layers = match entry.enumerate_instance_layer_properties() {
        Ok(layers) => layers,
        Err(_) => return false,
    };
    constants::REQUIRED_VALIDATION_LAYERS.iter().all(|required| {
        layers
            .iter()
            .any(|layer| vk_to_string(&layer.layer_name) == *required)
    })
}

pub(crate) fn populate_debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
        .build()
}

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        String::from("<no message>")
    } else {
        CStr::from_ptr((*p_callback_data).p_message)
            .to_string_lossy()
            .into_owned()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {}", message);
    } else {
        log::warn!("[vulkan] {}", message);
    }

    vk::FALSE
}
