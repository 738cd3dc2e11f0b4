use lumen_rg::{GraphCompileError, RenderGraph};
use lumen_rhi::backend::headless::HeadlessDevice;
use lumen_rhi::renderpack::{
    PixelFormat, RenderPassCreateInfo, RenderpackData, TextureCreateInfo, BACKBUFFER_NAME,
};
use lumen_rhi::{BackendType, OffscreenWindow, RhiConfig};

fn device() -> std::sync::Arc<HeadlessDevice> {
    let config = RhiConfig {
        backend: BackendType::Headless,
        ..Default::default()
    };
    HeadlessDevice::new(&config, &OffscreenWindow { width: 1280, height: 720 }).unwrap()
}

fn deferred_renderpack() -> RenderpackData {
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
            TextureCreateInfo::render_target("shadow_map", PixelFormat::Rgba16F),
            TextureCreateInfo::render_target("gbuffer_color", PixelFormat::Rgba16F),
        ],
        ..Default::default()
    }
}

#[test]
fn deferred_renderpack_compiles_in_dependency_order() {
    let device = device();
    let graph = RenderGraph::build(device.as_ref(), &deferred_renderpack()).unwrap();

    let names: Vec<&str> = graph.passes().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["shadow", "gbuffer", "composite"]);

    assert!(!graph.passes()[0].writes_to_backbuffer);
    assert!(graph.passes()[2].writes_to_backbuffer);
    assert!(graph.passes()[2].framebuffer.is_none());

    graph.destroy(device.as_ref());
}

#[test]
fn dead_texture_storage_is_shared() {
    // shadow_map dies after the gbuffer pass, bloom is born after it, and
    // both have the same shape, so one allocation serves both
    let mut data = deferred_renderpack();
    data.passes[2] = RenderPassCreateInfo::new("composite")
        .reads("gbuffer_color")
        .writes("bloom");
    data.passes.push(
        RenderPassCreateInfo::new("present")
            .reads("bloom")
            .writes(BACKBUFFER_NAME),
    );
    data.textures
        .push(TextureCreateInfo::render_target("bloom", PixelFormat::Rgba16F));

    let device = device();
    let graph = RenderGraph::build(device.as_ref(), &data).unwrap();

    assert_eq!(graph.num_texture_allocations(), 2);
    assert_eq!(
        graph.texture("shadow_map").unwrap(),
        graph.texture("bloom").unwrap()
    );
    assert_ne!(
        graph.texture("shadow_map").unwrap(),
        graph.texture("gbuffer_color").unwrap()
    );

    graph.destroy(device.as_ref());
}

#[test]
fn two_backbuffer_writers_are_rejected() {
    let mut data = deferred_renderpack();
    data.passes
        .push(RenderPassCreateInfo::new("overlay").writes(BACKBUFFER_NAME));

    let device = device();
    match RenderGraph::build(device.as_ref(), &data) {
        Err(GraphCompileError::MultipleBackbufferWriters { first, second }) => {
            assert_eq!(first, "composite");
            assert_eq!(second, "overlay");
        }
        other => panic!("expected MultipleBackbufferWriters, got {:?}", other.err()),
    }
}

#[test]
fn missing_backbuffer_writer_is_rejected() {
    let mut data = deferred_renderpack();
    data.passes.pop();

    let device = device();
    assert!(matches!(
        RenderGraph::build(device.as_ref(), &data),
        Err(GraphCompileError::NoBackbufferWriter)
    ));
}

#[test]
fn unknown_texture_reference_is_rejected() {
    let mut data = deferred_renderpack();
    data.passes[1] = RenderPassCreateInfo::new("gbuffer")
        .reads("not_a_texture")
        .writes("gbuffer_color");

    let device = device();
    match RenderGraph::build(device.as_ref(), &data) {
        Err(GraphCompileError::UnknownResource { pass, texture }) => {
            assert_eq!(pass, "gbuffer");
            assert_eq!(texture, "not_a_texture");
        }
        other => panic!("expected UnknownResource, got {:?}", other.err()),
    }
}

#[test]
fn dependency_cycle_fails_the_compile() {
    let data = RenderpackData {
        passes: vec![
            RenderPassCreateInfo::new("a").reads("tex_b").writes("tex_a"),
            RenderPassCreateInfo::new("b").reads("tex_a").writes("tex_b"),
            RenderPassCreateInfo::new("present")
                .reads("tex_a")
                .writes(BACKBUFFER_NAME),
        ],
        textures: vec![
            TextureCreateInfo::render_target("tex_a", PixelFormat::Rgba16F),
            TextureCreateInfo::render_target("tex_b", PixelFormat::Rgba16F),
        ],
        ..Default::default()
    };

    let device = device();
    assert!(matches!(
        RenderGraph::build(device.as_ref(), &data),
        Err(GraphCompileError::CyclicDependency { .. })
    ));
}
