//! Compilation of a renderpack into GPU objects.

use std::collections::HashMap;

use lumen_rhi::device::{AttachmentDesc, LoadOp, RenderDevice, StoreOp};
use lumen_rhi::handle::{FramebufferHandle, ImageHandle, RenderpassHandle};
use lumen_rhi::renderpack::{
    PixelFormat, RenderPassCreateInfo, RenderpackData, TextureCreateInfo, BACKBUFFER_NAME,
};

use crate::builder::{determine_aliasing_of_textures, determine_usage_order_of_textures, order_passes};
use crate::error::GraphCompileError;
use crate::pass::{CompiledPass, RecordFn};

/// A renderpack compiled against a device: passes in execution order, with
/// transient textures created (and aliased) and renderpasses and
/// framebuffers ready to bind.
pub struct RenderGraph {
    pub(crate) passes: Vec<CompiledPass>,
    /// Renderpack texture name to resolved handle; aliased names map to the
    /// same handle.
    pub(crate) textures: HashMap<String, ImageHandle>,
    /// Distinct allocations, for teardown.
    owned_textures: Vec<ImageHandle>,
}

/// Everything created so far during a build, so a failed compile can undo
/// itself and leave the device clean.
struct BuildArena {
    textures: Vec<ImageHandle>,
    renderpasses: Vec<RenderpassHandle>,
    framebuffers: Vec<FramebufferHandle>,
}

impl BuildArena {
    fn rollback(self, device: &dyn RenderDevice) {
        for framebuffer in self.framebuffers {
            device.destroy_framebuffer(framebuffer);
        }
        for renderpass in self.renderpasses {
            device.destroy_renderpass(renderpass);
        }
        for texture in self.textures {
            device.destroy_texture(texture);
        }
    }
}

fn validate_texture_references(data: &RenderpackData) -> Result<(), GraphCompileError> {
    for pass in &data.passes {
        for name in pass.texture_inputs.iter().chain(pass.texture_outputs.iter()) {
            if name != BACKBUFFER_NAME && !data.textures.iter().any(|t| &t.name == name) {
                return Err(GraphCompileError::UnknownResource {
                    pass: pass.name.clone(),
                    texture: name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_single_backbuffer_writer(
    passes: &[RenderPassCreateInfo],
) -> Result<(), GraphCompileError> {
    let mut writer: Option<&str> = None;
    for pass in passes {
        if pass.writes_to_backbuffer() {
            if let Some(first) = writer {
                return Err(GraphCompileError::MultipleBackbufferWriters {
                    first: first.to_owned(),
                    second: pass.name.clone(),
                });
            }
            writer = Some(&pass.name);
        }
    }
    if writer.is_none() {
        return Err(GraphCompileError::NoBackbufferWriter);
    }
    Ok(())
}

fn attachment_for(info: &TextureCreateInfo) -> AttachmentDesc {
    AttachmentDesc {
        format: info.format,
        load_op: LoadOp::Clear,
        store_op: StoreOp::Store,
    }
}

impl RenderGraph {
    /// Compile `data` into a runnable graph.
    ///
    /// Either every GPU object the graph needs is created, or none are: any
    /// failure rolls back what was built before the error is returned.
    pub fn build(
        device: &dyn RenderDevice,
        data: &RenderpackData,
    ) -> Result<RenderGraph, GraphCompileError> {
        validate_texture_references(data)?;
        validate_single_backbuffer_writer(&data.passes)?;

        let order = order_passes(&data.passes)?;
        let usage = determine_usage_order_of_textures(&data.passes, &order);
        let aliases = determine_aliasing_of_textures(&data.textures, &usage);

        let mut arena = BuildArena {
            textures: Vec::new(),
            renderpasses: Vec::new(),
            framebuffers: Vec::new(),
        };

        match Self::build_inner(device, data, &order, &aliases, &mut arena) {
            Ok(graph) => Ok(graph),
            Err(err) => {
                log::warn!("Graph compile failed, rolling back: {}", err);
                arena.rollback(device);
                Err(err)
            }
        }
    }

    fn build_inner(
        device: &dyn RenderDevice,
        data: &RenderpackData,
        order: &[usize],
        aliases: &HashMap<String, String>,
        arena: &mut BuildArena,
    ) -> Result<RenderGraph, GraphCompileError> {
        // one GPU texture per backing allocation
        let mut backing_handles: HashMap<&str, ImageHandle> = HashMap::new();
        let mut textures: HashMap<String, ImageHandle> = HashMap::new();
        for info in &data.textures {
            let backing = aliases
                .get(&info.name)
                .map(String::as_str)
                .unwrap_or(info.name.as_str());
            if !backing_handles.contains_key(backing) {
                let handle = device.create_texture(info)?;
                arena.textures.push(handle);
                backing_handles.insert(backing, handle);
            }
            if let Some(&handle) = backing_handles.get(backing) {
                textures.insert(info.name.clone(), handle);
            }
        }

        let info_of = |name: &str| data.textures.iter().find(|t| t.name == name);
        let swapchain_size = device.swapchain_size();

        let mut passes = Vec::with_capacity(order.len());
        for &pass_index in order {
            let pass = &data.passes[pass_index];
            let writes_to_backbuffer = pass.writes_to_backbuffer();

            let mut reads = Vec::with_capacity(pass.texture_inputs.len());
            for input in &pass.texture_inputs {
                if let Some(&handle) = textures.get(input) {
                    reads.push(handle);
                }
            }

            let mut writes = Vec::new();
            let mut attachments = Vec::new();
            let mut framebuffer_size = swapchain_size;
            for output in &pass.texture_outputs {
                if output == BACKBUFFER_NAME {
                    attachments.push(AttachmentDesc::color(PixelFormat::Rgba8));
                    continue;
                }
                let info = info_of(output).ok_or_else(|| GraphCompileError::UnknownResource {
                    pass: pass.name.clone(),
                    texture: output.clone(),
                })?;
                attachments.push(attachment_for(info));
                framebuffer_size = info.dimensions.pixels(swapchain_size);
                if let Some(&handle) = textures.get(output) {
                    writes.push(handle);
                }
            }

            let renderpass = device.create_renderpass(&pass.name, &attachments)?;
            arena.renderpasses.push(renderpass);

            let framebuffer = if writes_to_backbuffer {
                None
            } else {
                let framebuffer =
                    device.create_framebuffer(renderpass, &writes, framebuffer_size)?;
                arena.framebuffers.push(framebuffer);
                Some(framebuffer)
            };

            passes.push(CompiledPass {
                name: pass.name.clone(),
                reads,
                writes,
                writes_to_backbuffer,
                renderpass,
                framebuffer,
                record: None,
            });
        }

        log::info!(
            "Compiled render graph: {} passes, {} textures ({} allocations)",
            passes.len(),
            data.textures.len(),
            backing_handles.len()
        );

        Ok(RenderGraph {
            passes,
            textures,
            owned_textures: backing_handles.values().copied().collect(),
        })
    }

    pub fn passes(&self) -> &[CompiledPass] {
        &self.passes
    }

    pub fn texture(&self, name: &str) -> Option<ImageHandle> {
        self.textures.get(name).copied()
    }

    /// Number of distinct GPU allocations behind the graph's textures.
    pub fn num_texture_allocations(&self) -> usize {
        self.owned_textures.len()
    }

    /// Install the recording callback for `pass_name`.
    pub fn set_record_fn(&mut self, pass_name: &str, record: RecordFn) -> bool {
        match self.passes.iter_mut().find(|pass| pass.name == pass_name) {
            Some(pass) => {
                pass.record = Some(record);
                true
            }
            None => false,
        }
    }

    /// Tear down every GPU object the graph owns.
    pub fn destroy(self, device: &dyn RenderDevice) {
        for pass in &self.passes {
            if let Some(framebuffer) = pass.framebuffer {
                device.destroy_framebuffer(framebuffer);
            }
            device.destroy_renderpass(pass.renderpass);
        }
        for texture in self.owned_textures {
            device.destroy_texture(texture);
        }
    }
}
