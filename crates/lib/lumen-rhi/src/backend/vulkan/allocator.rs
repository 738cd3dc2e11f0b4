pub use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc,
};
pub use gpu_allocator::{AllocatorDebugSettings, MemoryLocation};
