//! Engine context tying the device, the render graph and the scene stores
//! together behind a small frame/load API.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;

extern crate log as glog;

use lumen_rg::{FrameExecutor, FrameSync, RenderGraph};
use lumen_rhi::device::RenderDevice;
use lumen_rhi::handle::{DescriptorSetHandle, FenceHandle, PipelineHandle, SemaphoreHandle};
use lumen_rhi::renderpack::PipelineCreateInfo;
use lumen_thread::TaskPool;

pub mod loader;
pub mod log;
mod renderer;

pub use glam::Mat4;
pub use loader::{RenderpackLoader, StaticRenderpackLoader};
pub use renderer::{
    MeshData, MeshId, RenderableId, StaticMeshRenderCommand, MODEL_MATRIX_BUFFER_NAME,
};

use renderer::SceneStore;

/// A pipeline compiled for one pass, with the descriptor set its resources
/// are bound through.
struct PassPipeline {
    pipeline: PipelineHandle,
    descriptor_set: DescriptorSetHandle,
}

/// Engine context owning the device, the active render graph and the scene.
///
/// There is no global state; everything the engine touches hangs off this
/// object and multiple instances can coexist (one device each).
pub struct Engine {
    device: Arc<dyn RenderDevice>,
    task_pool: TaskPool,
    scene: SceneStore,
    graph: Option<RenderGraph>,
    /// Pipelines of the active pack, grouped by the pass they render in.
    pass_pipelines: HashMap<String, Vec<PassPipeline>>,
    /// Signaled by each frame's submission.
    frame_fence: FenceHandle,
    render_finished: SemaphoreHandle,
    frame_count: u64,
}

impl Engine {
    pub fn new(device: Arc<dyn RenderDevice>) -> anyhow::Result<Self> {
        let mut task_pool = TaskPool::default();
        task_pool.spawn_workers();

        let scene =
            SceneStore::new(device.as_ref()).context("Failed to create builtin scene buffers")?;

        let frame_fence = device
            .create_fences(1, false)
            .context("Failed to create the frame fence")?[0];
        let render_finished = device
            .create_semaphores(1)
            .context("Failed to create the render-finished semaphore")?[0];

        glog::trace!(
            "Engine initialized on adapter {:?}",
            device.adapter().name
        );
        Ok(Self {
            device,
            task_pool,
            scene,
            graph: None,
            pass_pipelines: HashMap::new(),
            frame_fence,
            render_finished,
            frame_count: 0,
        })
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn active_graph(&self) -> Option<&RenderGraph> {
        self.graph.as_ref()
    }

    pub fn add_mesh(&mut self, data: &MeshData) -> anyhow::Result<MeshId> {
        self.scene
            .add_mesh(self.device.as_ref(), data)
            .context("Failed to upload mesh")
    }

    pub fn add_renderable(&mut self, command: StaticMeshRenderCommand) -> RenderableId {
        self.scene.add_renderable(command)
    }

    pub fn set_renderable_visibility(&mut self, id: RenderableId, visible: bool) -> bool {
        self.scene.set_visibility(id, visible)
    }

    /// Load `name` through `loader` and make it the active renderpack.
    ///
    /// The load itself runs on the task pool. Compilation is transactional:
    /// on any failure the previous pack stays active and already created
    /// objects are destroyed; only a fully built pack replaces the old one.
    pub fn load_renderpack(
        &mut self,
        name: &str,
        loader: Arc<dyn RenderpackLoader>,
    ) -> anyhow::Result<()> {
        let result = Arc::new(Mutex::new(None));
        let task = {
            let result = Arc::clone(&result);
            let loader = Arc::clone(&loader);
            let name = name.to_owned();
            self.task_pool
                .schedule(move || *result.lock() = Some(loader.load(&name)))
        };
        while !task.is_complete() {
            self.task_pool.help_once();
        }
        let data = match result.lock().take() {
            Some(data) => data.with_context(|| format!("Failed to load renderpack {:?}", name))?,
            None => anyhow::bail!("Renderpack load task for {:?} produced no result", name),
        };

        let graph = RenderGraph::build(self.device.as_ref(), &data)
            .with_context(|| format!("Failed to compile renderpack {:?}", name))?;

        let pass_pipelines = match create_pass_pipelines(self.device.as_ref(), &graph, &data.pipelines)
        {
            Ok(pipelines) => pipelines,
            Err(err) => {
                graph.destroy(self.device.as_ref());
                return Err(err.context(format!("Failed to build pipelines of {:?}", name)));
            }
        };

        self.drop_active_pack()?;
        glog::info!("Renderpack {:?} is now active", name);
        self.graph = Some(graph);
        self.pass_pipelines = pass_pipelines;
        Ok(())
    }

    /// Record and submit one frame of the active renderpack.
    pub fn execute_frame(&mut self) -> anyhow::Result<()> {
        let graph = self
            .graph
            .as_mut()
            .context("No renderpack is loaded")?;

        let batches = self.scene.upload_transforms(self.device.as_ref())?;
        let draws: Vec<_> = batches
            .iter()
            .filter_map(|batch| {
                self.scene
                    .mesh_buffers(batch.mesh)
                    .map(|buffers| (buffers, batch.instance_count, batch.first_slot))
            })
            .collect();

        // Each pass that owns pipelines redraws this frame's batches; the
        // batches change every frame, so the callbacks are reinstalled here.
        for (pass_name, pipelines) in &self.pass_pipelines {
            let bindings: Vec<(PipelineHandle, DescriptorSetHandle)> = pipelines
                .iter()
                .map(|p| (p.pipeline, p.descriptor_set))
                .collect();
            let draws = draws.clone();
            graph.set_record_fn(
                pass_name,
                Box::new(move |list, _context| {
                    for &(pipeline, descriptor_set) in &bindings {
                        list.bind_pipeline(pipeline)?;
                        list.bind_descriptor_sets(pipeline, &[descriptor_set])?;
                        for &(buffers, instance_count, first_instance) in &draws {
                            list.bind_vertex_buffers(&[buffers.vertex_buffer])?;
                            list.bind_index_buffer(buffers.index_buffer)?;
                            list.draw_indexed(
                                buffers.index_count,
                                instance_count,
                                first_instance,
                            )?;
                        }
                    }
                    Ok(())
                }),
            );
        }

        let mut executor = FrameExecutor::new(self.device.as_ref(), graph);
        executor.begin_frame()?;
        executor.record_passes()?;
        executor.end_frame(FrameSync {
            fence: Some(self.frame_fence),
            render_finished: Some(self.render_finished),
        })?;

        self.frame_count += 1;
        Ok(())
    }

    fn drop_active_pack(&mut self) -> anyhow::Result<()> {
        if let Some(old) = self.graph.take() {
            self.device.wait_idle()?;
            for pipelines in self.pass_pipelines.drain() {
                for pass_pipeline in pipelines.1 {
                    self.device.destroy_pipeline(pass_pipeline.pipeline);
                }
            }
            old.destroy(self.device.as_ref());
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.drop_active_pack() {
            glog::error!("Engine teardown failed to drop the active pack: {}", err);
        }
        self.device.destroy_fences(vec![self.frame_fence]);
        self.device.destroy_semaphores(vec![self.render_finished]);
        self.scene.destroy(self.device.as_ref());
        self.task_pool.terminate_until_finished();
        glog::trace!("Engine shut down after {} frames", self.frame_count);
    }
}

fn create_pass_pipelines(
    device: &dyn RenderDevice,
    graph: &RenderGraph,
    pipelines: &[PipelineCreateInfo],
) -> anyhow::Result<HashMap<String, Vec<PassPipeline>>> {
    let mut created: HashMap<String, Vec<PassPipeline>> = HashMap::new();

    let rollback = |created: HashMap<String, Vec<PassPipeline>>| {
        for (_, pipelines) in created {
            for pass_pipeline in pipelines {
                device.destroy_pipeline(pass_pipeline.pipeline);
            }
        }
    };

    for info in pipelines {
        let pass = match graph.passes().iter().find(|pass| pass.name == info.pass) {
            Some(pass) => pass,
            None => {
                rollback(created);
                anyhow::bail!(
                    "Pipeline {:?} targets unknown pass {:?}",
                    info.name,
                    info.pass
                );
            }
        };

        let pipeline = match device.create_pipeline(pass.renderpass, info) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                rollback(created);
                return Err(anyhow::Error::from(err)
                    .context(format!("Failed to create pipeline {:?}", info.name)));
            }
        };
        let descriptor_set = match device.create_descriptor_set(pipeline) {
            Ok(set) => set,
            Err(err) => {
                device.destroy_pipeline(pipeline);
                rollback(created);
                return Err(anyhow::Error::from(err).context(format!(
                    "Failed to allocate descriptors for pipeline {:?}",
                    info.name
                )));
            }
        };

        created
            .entry(info.pass.clone())
            .or_default()
            .push(PassPipeline {
                pipeline,
                descriptor_set,
            });
    }
    Ok(created)
}
