//! Opaque handles for every GPU resource type.
//!
//! Handles are issued by a [`crate::device::RenderDevice`] and stay valid
//! until the matching `destroy_*` call. They carry no backend state, so the
//! render graph and command lists can hold them freely without owning
//! anything.

macro_rules! define_handle {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub(crate) fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn id(&self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(BufferHandle);
define_handle!(ImageHandle);
define_handle!(SamplerHandle);
define_handle!(RenderpassHandle);
define_handle!(FramebufferHandle);
define_handle!(PipelineHandle);
define_handle!(SemaphoreHandle);
define_handle!(FenceHandle);
define_handle!(DescriptorSetHandle);

/// A barrier-able resource, tagged by its resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Image(ImageHandle),
    Buffer(BufferHandle),
}

impl From<ImageHandle> for ResourceHandle {
    fn from(handle: ImageHandle) -> Self {
        Self::Image(handle)
    }
}

impl From<BufferHandle> for ResourceHandle {
    fn from(handle: BufferHandle) -> Self {
        Self::Buffer(handle)
    }
}
