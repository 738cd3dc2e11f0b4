//! Vulkan backend, layered over `ash` with memory from `gpu-allocator`.

pub mod allocator;
mod command;
mod constants;
mod convert;
mod debug;
mod device;
mod instance;
mod physical_device;
mod platform;
mod surface;
mod swapchain;

pub use command::VulkanCommandList;
pub use device::VulkanDevice;
pub use instance::Instance;
pub use physical_device::{PhysicalDevice, QueueFamily};
pub use surface::Surface;
pub use swapchain::Swapchain;
