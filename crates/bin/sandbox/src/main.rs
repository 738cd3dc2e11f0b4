// use log macros.
#[macro_use]
extern crate log as _log;

use std::sync::Arc;

use lumen_engine::{
    log::{init_log, LogConfig},
    Engine, Mat4, MeshData, StaticMeshRenderCommand, StaticRenderpackLoader,
};
use lumen_rhi::backend::headless::HeadlessDevice;
use lumen_rhi::device::RenderDevice;
use lumen_rhi::renderpack::{
    PipelineCreateInfo, PixelFormat, RenderPassCreateInfo, RenderpackData, ShaderSource,
    TextureCreateInfo, BACKBUFFER_NAME,
};
use lumen_rhi::{BackendType, OffscreenWindow, RhiConfig};

/// A small deferred-style frame: shadow map, gbuffer, then a composite pass
/// onto the backbuffer.
fn deferred_pack() -> RenderpackData {
    RenderpackData {
        passes: vec![
            RenderPassCreateInfo::new("shadow").writes("shadow_map"),
            RenderPassCreateInfo::new("gbuffer")
                .reads("shadow_map")
                .writes("gbuffer_color"),
            RenderPassCreateInfo::new("composite")
                .reads("gbuffer_color")
                .writes(BACKBUFFER_NAME),
        ],
        textures: vec![
            TextureCreateInfo::render_target("shadow_map", PixelFormat::R32F),
            TextureCreateInfo::render_target("gbuffer_color", PixelFormat::Rgba16F),
        ],
        pipelines: vec![PipelineCreateInfo {
            name: "gbuffer_geometry".to_owned(),
            pass: "gbuffer".to_owned(),
            vertex_shader: ShaderSource {
                filename: "gbuffer.vert.spv".to_owned(),
                spirv: vec![0x0723_0203],
            },
            fragment_shader: None,
            vertex_fields: Vec::new(),
            depth_test: false,
            depth_write: false,
            bindings: Vec::new(),
        }],
        materials: Vec::new(),
    }
}

fn triangle() -> MeshData {
    MeshData {
        // three vec3 positions
        vertex_data: vec![0u8; 3 * 12],
        indices: vec![0, 1, 2],
    }
}

fn main() -> anyhow::Result<()> {
    init_log(LogConfig::default())?;

    let config = RhiConfig {
        backend: BackendType::Headless,
        ..Default::default()
    };
    let device = HeadlessDevice::new(
        &config,
        &OffscreenWindow { width: 1280, height: 720 },
    )?;
    let mut engine = Engine::new(device.clone() as Arc<dyn RenderDevice>)?;

    let mut loader = StaticRenderpackLoader::new();
    loader.insert("deferred", deferred_pack());
    engine.load_renderpack("deferred", Arc::new(loader))?;

    let mesh = engine.add_mesh(&triangle())?;
    engine.add_renderable(StaticMeshRenderCommand {
        mesh,
        transform: Mat4::IDENTITY,
        is_visible: true,
    });

    engine.execute_frame()?;

    for submission in device.drain_submissions() {
        info!(
            "Submitted {} commands to the {:?} queue",
            submission.commands.len(),
            submission.queue
        );
    }

    Ok(())
}
