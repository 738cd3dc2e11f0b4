pub(crate) const REQUIRED_VALIDATION_LAYERS: [&str; 1] = ["VK_LAYER_KHRONOS_validation"];

pub(crate) const MAX_RENDERPASS_ATTACHMENTS: usize = 8;
