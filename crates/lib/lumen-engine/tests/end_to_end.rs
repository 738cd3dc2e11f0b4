//! One full frame of a deferred-style renderpack on the headless backend,
//! checked against the recorded command stream.

use std::sync::Arc;

use lumen_engine::{
    Engine, Mat4, MeshData, RenderpackLoader, StaticMeshRenderCommand, StaticRenderpackLoader,
};
use lumen_rhi::backend::headless::{HeadlessDevice, RecordedCommand};
use lumen_rhi::device::RenderDevice;
use lumen_rhi::handle::RenderpassHandle;
use lumen_rhi::renderpack::{
    PipelineCreateInfo, PixelFormat, RenderPassCreateInfo, RenderpackData, ShaderSource,
    TextureCreateInfo, BACKBUFFER_NAME,
};
use lumen_rhi::types::ResourceState;
use lumen_rhi::{BackendType, OffscreenWindow, RhiConfig};

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

fn quad() -> MeshData {
    MeshData {
        // four vec3 positions
        vertex_data: vec![0u8; 4 * 12],
        indices: vec![0, 1, 2, 2, 3, 0],
    }
}

#[test]
fn one_frame_of_a_deferred_pack() {
    let config = RhiConfig {
        backend: BackendType::Headless,
        ..Default::default()
    };
    let device =
        HeadlessDevice::new(&config, &OffscreenWindow { width: 1280, height: 720 }).unwrap();

    let mut engine = Engine::new(device.clone() as Arc<dyn RenderDevice>).unwrap();

    let mut loader = StaticRenderpackLoader::new();
    loader.insert("deferred", deferred_pack());
    engine.load_renderpack("deferred", Arc::new(loader)).unwrap();

    let mesh = engine.add_mesh(&quad()).unwrap();
    engine.add_renderable(StaticMeshRenderCommand {
        mesh,
        transform: Mat4::IDENTITY,
        is_visible: true,
    });

    engine.execute_frame().unwrap();
    assert_eq!(engine.frame_count(), 1);

    let renderpass_of = |name: &str| -> RenderpassHandle {
        engine
            .active_graph()
            .unwrap()
            .passes()
            .iter()
            .find(|pass| pass.name == name)
            .unwrap()
            .renderpass
    };
    let expected_order = vec![
        renderpass_of("shadow"),
        renderpass_of("gbuffer"),
        renderpass_of("composite"),
    ];

    let submissions = device.drain_submissions();
    assert_eq!(submissions.len(), 1, "one command list per frame");
    assert!(submissions[0].fence.is_some(), "frame fence not attached");
    assert_eq!(submissions[0].signal_semaphores.len(), 1);
    let commands = &submissions[0].commands;

    // passes run in dependency order
    let begun: Vec<RenderpassHandle> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginRenderpass { renderpass, .. } => Some(*renderpass),
            _ => None,
        })
        .collect();
    assert_eq!(begun, expected_order);

    // the backbuffer is transitioned exactly once each way, hugging the
    // composite pass
    let barrier_positions = |from: ResourceState, to: ResourceState| -> Vec<usize> {
        commands
            .iter()
            .enumerate()
            .filter(|(_, command)| match command {
                RecordedCommand::ResourceBarriers { barriers, .. } => barriers
                    .iter()
                    .any(|b| b.old_state == from && b.new_state == to),
                _ => false,
            })
            .map(|(index, _)| index)
            .collect()
    };
    let to_render_target =
        barrier_positions(ResourceState::PresentSource, ResourceState::RenderTarget);
    let to_present =
        barrier_positions(ResourceState::RenderTarget, ResourceState::PresentSource);
    assert_eq!(to_render_target.len(), 1);
    assert_eq!(to_present.len(), 1);

    let composite_begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRenderpass { renderpass, .. } if *renderpass == expected_order[2]))
        .unwrap();
    let last_end = commands
        .iter()
        .rposition(|c| matches!(c, RecordedCommand::EndRenderpass))
        .unwrap();
    assert_eq!(to_render_target[0], composite_begin - 1);
    assert_eq!(to_present[0], last_end + 1);

    // the renderable was drawn once, instanced, inside the gbuffer pass
    let gbuffer_begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRenderpass { renderpass, .. } if *renderpass == expected_order[1]))
        .unwrap();
    let draw = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::DrawIndexed { index_count: 6, instance_count: 1, first_instance: 0 }))
        .unwrap();
    assert!(draw > gbuffer_begin);
    assert!(
        matches!(commands[gbuffer_begin + 1..draw].iter().find(|c| matches!(c, RecordedCommand::EndRenderpass)), None),
        "draw landed outside the gbuffer pass"
    );
}

#[test]
fn batches_draw_from_their_transform_slots() {
    let config = RhiConfig {
        backend: BackendType::Headless,
        ..Default::default()
    };
    let device =
        HeadlessDevice::new(&config, &OffscreenWindow { width: 1280, height: 720 }).unwrap();
    let mut engine = Engine::new(device.clone() as Arc<dyn RenderDevice>).unwrap();

    let mut loader = StaticRenderpackLoader::new();
    loader.insert("deferred", deferred_pack());
    engine.load_renderpack("deferred", Arc::new(loader)).unwrap();

    let quad_mesh = engine.add_mesh(&quad()).unwrap();
    let triangle_mesh = engine
        .add_mesh(&MeshData {
            vertex_data: vec![0u8; 3 * 12],
            indices: vec![0, 1, 2],
        })
        .unwrap();

    for _ in 0..2 {
        engine.add_renderable(StaticMeshRenderCommand {
            mesh: quad_mesh,
            transform: Mat4::IDENTITY,
            is_visible: true,
        });
    }
    let hidden = engine.add_renderable(StaticMeshRenderCommand {
        mesh: quad_mesh,
        transform: Mat4::IDENTITY,
        is_visible: true,
    });
    assert!(engine.set_renderable_visibility(hidden, false));
    engine.add_renderable(StaticMeshRenderCommand {
        mesh: triangle_mesh,
        transform: Mat4::IDENTITY,
        is_visible: true,
    });

    engine.execute_frame().unwrap();

    let submissions = device.drain_submissions();
    let draws: Vec<_> = submissions[0]
        .commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::DrawIndexed { index_count, instance_count, first_instance } => {
                Some((*index_count, *instance_count, *first_instance))
            }
            _ => None,
        })
        .collect();
    // the quads share one instanced draw; the triangle's instance ID starts
    // past their transform slots
    assert_eq!(draws, vec![(6, 2, 0), (3, 1, 2)]);
}

#[test]
fn failed_load_keeps_the_previous_pack() {
    let config = RhiConfig {
        backend: BackendType::Headless,
        ..Default::default()
    };
    let device =
        HeadlessDevice::new(&config, &OffscreenWindow { width: 1280, height: 720 }).unwrap();
    let mut engine = Engine::new(device.clone() as Arc<dyn RenderDevice>).unwrap();

    let mut loader = StaticRenderpackLoader::new();
    loader.insert("deferred", deferred_pack());

    // a pack whose only pass depends on itself never compiles
    let mut broken = deferred_pack();
    broken.passes[0].dependencies.push("shadow".to_owned());
    loader.insert("broken", broken);

    let loader: Arc<dyn RenderpackLoader> = Arc::new(loader);
    engine.load_renderpack("deferred", Arc::clone(&loader)).unwrap();

    assert!(engine.load_renderpack("broken", Arc::clone(&loader)).is_err());
    assert!(engine.load_renderpack("missing", loader).is_err());

    // the deferred pack is still active and still renders
    engine.execute_frame().unwrap();
    assert_eq!(device.drain_submissions().len(), 1);
}
