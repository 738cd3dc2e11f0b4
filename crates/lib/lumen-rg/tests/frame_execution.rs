use lumen_rg::{ExecutorError, FrameExecutor, FrameStage, FrameSync, RenderGraph};
use lumen_rhi::backend::headless::{HeadlessDevice, RecordedCommand};
use lumen_rhi::device::RenderDevice;
use lumen_rhi::renderpack::{
    PixelFormat, RenderPassCreateInfo, RenderpackData, TextureCreateInfo, BACKBUFFER_NAME,
};
use lumen_rhi::types::ResourceState;
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

fn run_one_frame(device: &HeadlessDevice, graph: &RenderGraph) {
    let mut executor = FrameExecutor::new(device, graph);
    executor.begin_frame().unwrap();
    executor.record_passes().unwrap();
    executor.end_frame(FrameSync::default()).unwrap();
    assert_eq!(executor.stage(), FrameStage::Ended);
}

#[test]
fn frame_submits_passes_in_graph_order() {
    let device = device();
    let graph = RenderGraph::build(device.as_ref(), &deferred_renderpack()).unwrap();

    run_one_frame(&device, &graph);

    let submissions = device.drain_submissions();
    assert_eq!(submissions.len(), 1);

    let renderpass_begins: Vec<_> = submissions[0]
        .commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::BeginRenderpass { .. }))
        .collect();
    assert_eq!(renderpass_begins.len(), 3);

    graph.destroy(device.as_ref());
}

#[test]
fn backbuffer_gets_exactly_one_barrier_each_way() {
    let device = device();
    let graph = RenderGraph::build(device.as_ref(), &deferred_renderpack()).unwrap();

    run_one_frame(&device, &graph);

    let submissions = device.drain_submissions();
    let mut to_render_target = 0;
    let mut to_present = 0;
    for command in &submissions[0].commands {
        if let RecordedCommand::ResourceBarriers { barriers, .. } = command {
            for barrier in barriers {
                if barrier.old_state == ResourceState::PresentSource
                    && barrier.new_state == ResourceState::RenderTarget
                {
                    to_render_target += 1;
                }
                if barrier.old_state == ResourceState::RenderTarget
                    && barrier.new_state == ResourceState::PresentSource
                {
                    to_present += 1;
                }
            }
        }
    }
    // three passes, but the backbuffer transitions only once in and once out
    assert_eq!(to_render_target, 1);
    assert_eq!(to_present, 1);

    // both transitions hug the backbuffer-writing pass: in right before its
    // begin, out right after its end
    let commands = &submissions[0].commands;
    let composite_begin = commands
        .iter()
        .rposition(|c| matches!(c, RecordedCommand::BeginRenderpass { .. }))
        .unwrap();
    let last_end = commands
        .iter()
        .rposition(|c| matches!(c, RecordedCommand::EndRenderpass))
        .unwrap();
    let render_target_barrier = commands
        .iter()
        .position(|c| {
            matches!(c, RecordedCommand::ResourceBarriers { barriers, .. }
                if barriers.iter().any(|b| b.new_state == ResourceState::RenderTarget
                    && b.old_state == ResourceState::PresentSource))
        })
        .unwrap();
    let present_barrier = commands
        .iter()
        .rposition(|c| {
            matches!(c, RecordedCommand::ResourceBarriers { barriers, .. }
                if barriers.iter().any(|b| b.new_state == ResourceState::PresentSource))
        })
        .unwrap();
    assert_eq!(render_target_barrier, composite_begin - 1);
    assert_eq!(present_barrier, last_end + 1);

    graph.destroy(device.as_ref());
}

#[test]
fn read_barriers_precede_each_sampling_pass() {
    let device = device();
    let graph = RenderGraph::build(device.as_ref(), &deferred_renderpack()).unwrap();

    run_one_frame(&device, &graph);

    let submissions = device.drain_submissions();
    let shader_read_barriers = submissions[0]
        .commands
        .iter()
        .filter(|command| {
            matches!(command, RecordedCommand::ResourceBarriers { barriers, .. }
                if barriers.iter().any(|b| b.new_state == ResourceState::ShaderRead))
        })
        .count();
    // gbuffer samples the shadow map, composite samples the gbuffer
    assert_eq!(shader_read_barriers, 2);

    graph.destroy(device.as_ref());
}

#[test]
fn stages_out_of_order_are_rejected() {
    let device = device();
    let graph = RenderGraph::build(device.as_ref(), &deferred_renderpack()).unwrap();

    let mut executor = FrameExecutor::new(device.as_ref(), &graph);

    assert!(matches!(
        executor.record_passes(),
        Err(ExecutorError::WrongStage {
            expected: FrameStage::BarriersInserted,
            actual: FrameStage::NotStarted,
        })
    ));
    assert!(matches!(
        executor.end_frame(FrameSync::default()),
        Err(ExecutorError::WrongStage { .. })
    ));

    executor.begin_frame().unwrap();
    assert!(matches!(
        executor.begin_frame(),
        Err(ExecutorError::WrongStage { .. })
    ));
    assert!(matches!(
        executor.end_frame(FrameSync::default()),
        Err(ExecutorError::WrongStage { .. })
    ));

    executor.record_passes().unwrap();
    executor.end_frame(FrameSync::default()).unwrap();
    assert!(matches!(
        executor.end_frame(FrameSync::default()),
        Err(ExecutorError::WrongStage { .. })
    ));

    graph.destroy(device.as_ref());
}

#[test]
fn pass_callbacks_record_into_the_frame_list() {
    let device = device();
    let mut graph = RenderGraph::build(device.as_ref(), &deferred_renderpack()).unwrap();

    assert!(graph.set_record_fn(
        "composite",
        Box::new(|list, context| {
            assert_eq!(context.pass_name, "composite");
            assert!(context.textures.contains_key("gbuffer_color"));
            list.draw_indexed(6, 1, 0)?;
            Ok(())
        }),
    ));
    assert!(!graph.set_record_fn("no_such_pass", Box::new(|_, _| Ok(()))));

    run_one_frame(&device, &graph);

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
    assert_eq!(draws, vec![(6, 1, 0)]);

    graph.destroy(device.as_ref());
}

#[test]
fn frame_submission_signals_its_sync_primitives() {
    let device = device();
    let graph = RenderGraph::build(device.as_ref(), &deferred_renderpack()).unwrap();

    let fence = device.create_fences(1, false).unwrap()[0];
    let render_finished = device.create_semaphores(1).unwrap()[0];

    let mut executor = FrameExecutor::new(device.as_ref(), &graph);
    executor.begin_frame().unwrap();
    executor.record_passes().unwrap();
    executor
        .end_frame(FrameSync {
            fence: Some(fence),
            render_finished: Some(render_finished),
        })
        .unwrap();

    // headless submissions complete on the spot
    assert!(device.is_fence_signaled(fence));

    let submissions = device.drain_submissions();
    assert_eq!(submissions[0].fence, Some(fence));
    assert_eq!(submissions[0].signal_semaphores, vec![render_finished]);

    device.destroy_fences(vec![fence]);
    device.destroy_semaphores(vec![render_finished]);
    graph.destroy(device.as_ref());
}
