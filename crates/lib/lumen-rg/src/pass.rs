use std::collections::HashMap;

use lumen_rhi::command_list::CommandList;
use lumen_rhi::handle::{FramebufferHandle, ImageHandle, RenderpassHandle};

/// What a pass callback gets to see while it records.
pub struct PassContext<'a> {
    /// Position of the pass in execution order.
    pub pass_index: usize,
    pub pass_name: &'a str,
    /// Resolved texture handles, keyed by renderpack name. Aliased textures
    /// resolve to their shared allocation.
    pub textures: &'a HashMap<String, ImageHandle>,
}

/// Recording callback of a pass, invoked between `begin_renderpass` and
/// `end_renderpass` on the frame's command list.
pub type RecordFn =
    Box<dyn Fn(&mut dyn CommandList, &PassContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// A pass after compilation: ordered, with its GPU objects resolved.
pub struct CompiledPass {
    pub name: String,
    /// Textures this pass samples, resolved through aliasing.
    pub reads: Vec<ImageHandle>,
    /// Textures this pass renders to, excluding the backbuffer.
    pub writes: Vec<ImageHandle>,
    pub writes_to_backbuffer: bool,
    pub renderpass: RenderpassHandle,
    /// `None` for the backbuffer writer, whose framebuffer changes with the
    /// swapchain image and is fetched per frame.
    pub framebuffer: Option<FramebufferHandle>,
    pub(crate) record: Option<RecordFn>,
}

impl CompiledPass {
    pub(crate) fn record_fn(&self) -> Option<&RecordFn> {
        self.record.as_ref()
    }
}
