use lumen_rhi::backend::headless::{HeadlessDevice, RecordedCommand};
use lumen_rhi::command_list::CommandListLevel;
use lumen_rhi::device::{AttachmentDesc, RenderDevice};
use lumen_rhi::renderpack::{PipelineCreateInfo, PixelFormat, ShaderSource, TextureCreateInfo};
use lumen_rhi::types::{BufferCreateInfo, BufferResidency, BufferUsage, QueueType};
use lumen_rhi::{BackendType, OffscreenWindow, RhiConfig, RhiError, NUM_IN_FLIGHT_FRAMES};

fn device() -> std::sync::Arc<HeadlessDevice> {
    let config = RhiConfig {
        backend: BackendType::Headless,
        num_recording_threads: 2,
        ..Default::default()
    };
    HeadlessDevice::new(&config, &OffscreenWindow { width: 800, height: 600 }).unwrap()
}

fn staging_buffer(size: u64) -> BufferCreateInfo {
    BufferCreateInfo {
        size,
        usage: BufferUsage::StagingBuffer,
        residency: BufferResidency::HostVisible,
    }
}

#[test]
fn command_list_survives_until_its_pool_cycles_back() {
    let device = device();

    let token = device.begin_frame().unwrap();
    let mut list = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
        .unwrap();
    assert!(list.is_valid());
    device.end_frame(token).unwrap();

    // other swapchain images come and go without touching our pool
    for _ in 1..NUM_IN_FLIGHT_FRAMES {
        let token = device.begin_frame().unwrap();
        assert!(list.is_valid());
        device.end_frame(token).unwrap();
    }

    // now the frame wraps around to our image and the pool is recycled
    let token = device.begin_frame().unwrap();
    assert!(!list.is_valid());
    assert!(matches!(
        list.draw_indexed(3, 1, 0),
        Err(RhiError::CommandListExpired)
    ));
    device.end_frame(token).unwrap();
}

#[test]
fn expired_list_cannot_be_submitted() {
    let device = device();

    let token = device.begin_frame().unwrap();
    let list = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
        .unwrap();
    device.end_frame(token).unwrap();

    for _ in 0..NUM_IN_FLIGHT_FRAMES {
        let token = device.begin_frame().unwrap();
        device.end_frame(token).unwrap();
    }

    assert!(matches!(
        device.submit_command_list(list, QueueType::Graphics, None, &[], &[]),
        Err(RhiError::CommandListExpired)
    ));
}

#[test]
fn buffer_copies_are_bounds_checked() {
    let device = device();
    let src = device.create_buffer(&staging_buffer(64), "copy source").unwrap();
    let dst = device.create_buffer(&staging_buffer(32), "copy target").unwrap();

    let token = device.begin_frame().unwrap();
    let mut list = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
        .unwrap();

    // in-bounds copy records fine
    list.copy_buffer(dst, 0, src, 0, 32).unwrap();

    // destination overrun
    match list.copy_buffer(dst, 16, src, 0, 32) {
        Err(RhiError::OutOfBounds { offset, num_bytes, size, .. }) => {
            assert_eq!((offset, num_bytes, size), (16, 32, 32));
        }
        other => panic!("expected OutOfBounds, got {:?}", other),
    }

    // source overrun
    assert!(matches!(
        list.copy_buffer(dst, 0, src, 48, 32),
        Err(RhiError::OutOfBounds { .. })
    ));

    // offset + size overflow must not wrap around
    assert!(matches!(
        list.copy_buffer(dst, u64::MAX, src, 0, 2),
        Err(RhiError::OutOfBounds { .. })
    ));

    device.submit_command_list(list, QueueType::Graphics, None, &[], &[]).unwrap();
    device.end_frame(token).unwrap();
}

#[test]
fn buffer_writes_are_bounds_checked() {
    let device = device();
    let buffer = device.create_buffer(&staging_buffer(16), "uniforms").unwrap();

    device.write_buffer(buffer, 0, &[0xAB; 16]).unwrap();
    device.write_buffer(buffer, 8, &[0xCD; 8]).unwrap();

    assert!(matches!(
        device.write_buffer(buffer, 9, &[0; 8]),
        Err(RhiError::OutOfBounds { .. })
    ));
    assert_eq!(device.buffer_size(buffer).unwrap(), 16);
}

#[test]
fn recording_thread_index_is_validated() {
    let device = device();
    let token = device.begin_frame().unwrap();

    assert!(device
        .allocate_command_list(1, QueueType::Graphics, CommandListLevel::Primary)
        .is_ok());
    assert!(device
        .allocate_command_list(2, QueueType::Graphics, CommandListLevel::Primary)
        .is_err());

    device.end_frame(token).unwrap();
}

#[test]
fn pool_exhaustion_is_reported() {
    let device = device();
    let token = device.begin_frame().unwrap();

    let mut lists = Vec::new();
    loop {
        match device.allocate_command_list(0, QueueType::Transfer, CommandListLevel::Primary) {
            Ok(list) => lists.push(list),
            Err(RhiError::PoolExhausted { thread_index, queue }) => {
                assert_eq!(thread_index, 0);
                assert_eq!(queue, QueueType::Transfer);
                break;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
        assert!(lists.len() <= 1024, "pool never reported exhaustion");
    }

    device.end_frame(token).unwrap();
}

#[test]
fn renderpasses_must_be_balanced_and_unnested() {
    let device = device();
    let image = device
        .create_texture(&TextureCreateInfo::render_target("color", PixelFormat::Rgba16F))
        .unwrap();
    let renderpass = device
        .create_renderpass("color pass", &[AttachmentDesc::color(PixelFormat::Rgba16F)])
        .unwrap();
    let framebuffer = device.create_framebuffer(renderpass, &[image], [800, 600]).unwrap();

    let token = device.begin_frame().unwrap();
    let mut list = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
        .unwrap();

    // an end with no begin is a recording error
    assert!(matches!(
        list.end_renderpass(),
        Err(RhiError::UnbalancedRenderpass(_))
    ));

    list.begin_renderpass(renderpass, framebuffer).unwrap();
    // renderpasses do not nest
    assert!(matches!(
        list.begin_renderpass(renderpass, framebuffer),
        Err(RhiError::UnbalancedRenderpass(_))
    ));
    list.end_renderpass().unwrap();
    assert!(matches!(
        list.end_renderpass(),
        Err(RhiError::UnbalancedRenderpass(_))
    ));

    // balanced pairs keep working afterwards
    list.begin_renderpass(renderpass, framebuffer).unwrap();
    list.end_renderpass().unwrap();

    device.submit_command_list(list, QueueType::Graphics, None, &[], &[]).unwrap();
    device.end_frame(token).unwrap();
}

#[test]
fn binds_reject_destroyed_handles() {
    let device = device();

    let buffer = device.create_buffer(&staging_buffer(64), "mesh data").unwrap();
    device.destroy_buffer(buffer);

    let renderpass = device
        .create_renderpass("color pass", &[AttachmentDesc::color(PixelFormat::Rgba16F)])
        .unwrap();
    let pipeline = device
        .create_pipeline(
            renderpass,
            &PipelineCreateInfo {
                name: "solid".to_owned(),
                pass: "color pass".to_owned(),
                vertex_shader: ShaderSource {
                    filename: "solid.vert.spv".to_owned(),
                    spirv: vec![0x0723_0203],
                },
                fragment_shader: None,
                vertex_fields: Vec::new(),
                depth_test: false,
                depth_write: false,
                bindings: Vec::new(),
            },
        )
        .unwrap();
    device.destroy_pipeline(pipeline);

    let token = device.begin_frame().unwrap();
    let mut list = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
        .unwrap();

    assert!(matches!(
        list.bind_vertex_buffers(&[buffer]),
        Err(RhiError::ResourceNotFound(_))
    ));
    assert!(matches!(
        list.bind_index_buffer(buffer),
        Err(RhiError::ResourceNotFound(_))
    ));
    assert!(matches!(
        list.bind_pipeline(pipeline),
        Err(RhiError::ResourceNotFound(_))
    ));
    assert!(matches!(
        list.bind_descriptor_sets(pipeline, &[]),
        Err(RhiError::ResourceNotFound(_))
    ));

    // live handles still record
    let live = device.create_buffer(&staging_buffer(64), "replacement").unwrap();
    list.bind_vertex_buffers(&[live]).unwrap();
    list.bind_index_buffer(live).unwrap();

    device.end_frame(token).unwrap();
}

#[test]
fn submissions_signal_their_fence() {
    let device = device();
    let fences = device.create_fences(1, false).unwrap();
    assert!(!device.is_fence_signaled(fences[0]));

    let token = device.begin_frame().unwrap();
    let list = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
        .unwrap();
    device
        .submit_command_list(list, QueueType::Graphics, Some(fences[0]), &[], &[])
        .unwrap();
    device.end_frame(token).unwrap();

    assert!(device.is_fence_signaled(fences[0]));
}

#[test]
fn samplers_get_distinct_handles() {
    let device = device();
    let linear = device.create_sampler("linear repeat").unwrap();
    let shadow = device.create_sampler("shadow compare").unwrap();
    assert_ne!(linear, shadow);
}

#[test]
fn secondary_lists_inline_into_their_primary() {
    let device = device();

    let token = device.begin_frame().unwrap();
    let mut secondary = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Secondary)
        .unwrap();
    secondary.draw_indexed(36, 4, 2).unwrap();

    let mut primary = device
        .allocate_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
        .unwrap();
    primary.execute_command_lists(vec![secondary]).unwrap();
    device
        .submit_command_list(primary, QueueType::Graphics, None, &[], &[])
        .unwrap();
    device.end_frame(token).unwrap();

    let submissions = device.drain_submissions();
    let inlined = submissions[0]
        .commands
        .iter()
        .find_map(|command| match command {
            RecordedCommand::ExecuteCommands(commands) => Some(commands),
            _ => None,
        })
        .unwrap();
    assert!(matches!(
        inlined.as_slice(),
        [RecordedCommand::DrawIndexed {
            index_count: 36,
            instance_count: 4,
            first_instance: 2,
        }]
    ));
}
