pub mod headless;
pub mod vulkan;
