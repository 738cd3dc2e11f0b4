//! Mesh and renderable bookkeeping plus the per-frame transform upload.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::Mat4;
use lumen_rhi::device::RenderDevice;
use lumen_rhi::handle::BufferHandle;
use lumen_rhi::types::{BufferCreateInfo, BufferResidency, BufferUsage};
use lumen_rhi::RhiError;

/// Well-known name of the per-frame model matrix buffer. Renderpack shaders
/// bind it to read instance transforms.
pub const MODEL_MATRIX_BUFFER_NAME: &str = "ModelMatrixBuffer";

/// Capacity of the model matrix buffer, in transforms.
const MAX_RENDERABLES: u32 = 1024;

const MATRIX_SIZE: u64 = std::mem::size_of::<Mat4>() as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderableId(u32);

/// Mesh geometry as the application supplies it: raw vertex data laid out
/// the way the pack's pipelines expect, plus an index list.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertex_data: Vec<u8>,
    pub indices: Vec<u32>,
}

struct Mesh {
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
}

/// One thing to draw: a mesh instance with its transform.
#[derive(Debug, Clone, Copy)]
pub struct StaticMeshRenderCommand {
    pub mesh: MeshId,
    pub transform: Mat4,
    pub is_visible: bool,
}

/// Visible renderables of one mesh, occupying `instance_count` consecutive
/// transform slots starting at `first_slot`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MeshBatch {
    pub mesh: MeshId,
    pub first_slot: u32,
    pub instance_count: u32,
}

/// GPU geometry a batch draws with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MeshBuffers {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

fn matrix_bytes(matrix: &Mat4) -> [u8; 64] {
    let mut bytes = [0u8; 64];
    for (i, value) in matrix.to_cols_array().iter().enumerate() {
        bytes[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn index_bytes(indices: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(indices.len() * 4);
    for index in indices {
        bytes.extend_from_slice(&index.to_le_bytes());
    }
    bytes
}

/// Everything the engine draws: meshes, renderables and the builtin model
/// matrix buffer their transforms are streamed into each frame.
pub(crate) struct SceneStore {
    meshes: Vec<Mesh>,
    renderables: Vec<StaticMeshRenderCommand>,
    model_matrix_buffer: BufferHandle,
    next_transform_slot: AtomicU32,
}

impl SceneStore {
    pub fn new(device: &dyn RenderDevice) -> Result<Self, RhiError> {
        let model_matrix_buffer = device.create_buffer(
            &BufferCreateInfo {
                size: MATRIX_SIZE * MAX_RENDERABLES as u64,
                usage: BufferUsage::UniformBuffer,
                residency: BufferResidency::HostVisible,
            },
            MODEL_MATRIX_BUFFER_NAME,
        )?;

        Ok(Self {
            meshes: Vec::new(),
            renderables: Vec::new(),
            model_matrix_buffer,
            next_transform_slot: AtomicU32::new(0),
        })
    }

    pub fn model_matrix_buffer(&self) -> BufferHandle {
        self.model_matrix_buffer
    }

    pub fn add_mesh(
        &mut self,
        device: &dyn RenderDevice,
        data: &MeshData,
    ) -> Result<MeshId, RhiError> {
        let id = MeshId(self.meshes.len() as u32);

        let vertex_buffer = device.create_buffer(
            &BufferCreateInfo {
                size: data.vertex_data.len() as u64,
                usage: BufferUsage::VertexBuffer,
                residency: BufferResidency::HostVisible,
            },
            &format!("mesh {} vertices", id.0),
        )?;
        if let Err(err) = device.write_buffer(vertex_buffer, 0, &data.vertex_data) {
            device.destroy_buffer(vertex_buffer);
            return Err(err);
        }

        let index_buffer = match device.create_buffer(
            &BufferCreateInfo {
                size: (data.indices.len() * 4) as u64,
                usage: BufferUsage::IndexBuffer,
                residency: BufferResidency::HostVisible,
            },
            &format!("mesh {} indices", id.0),
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_buffer(vertex_buffer);
                return Err(err);
            }
        };
        if let Err(err) = device.write_buffer(index_buffer, 0, &index_bytes(&data.indices)) {
            device.destroy_buffer(index_buffer);
            device.destroy_buffer(vertex_buffer);
            return Err(err);
        }

        self.meshes.push(Mesh {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        });
        Ok(id)
    }

    pub fn mesh_buffers(&self, id: MeshId) -> Option<MeshBuffers> {
        self.meshes.get(id.0 as usize).map(|mesh| MeshBuffers {
            vertex_buffer: mesh.vertex_buffer,
            index_buffer: mesh.index_buffer,
            index_count: mesh.index_count,
        })
    }

    pub fn add_renderable(&mut self, command: StaticMeshRenderCommand) -> RenderableId {
        let id = RenderableId(self.renderables.len() as u32);
        self.renderables.push(command);
        id
    }

    pub fn set_visibility(&mut self, id: RenderableId, visible: bool) -> bool {
        match self.renderables.get_mut(id.0 as usize) {
            Some(renderable) => {
                renderable.is_visible = visible;
                true
            }
            None => false,
        }
    }

    /// Stream the transforms of every visible renderable into the model
    /// matrix buffer and group them into per-mesh instance batches.
    ///
    /// Slot allocation restarts at zero each frame; visible renderables of
    /// the same mesh land in consecutive slots so one instanced draw covers
    /// the whole batch.
    pub fn upload_transforms(
        &self,
        device: &dyn RenderDevice,
    ) -> Result<Vec<MeshBatch>, RhiError> {
        self.next_transform_slot.store(0, Ordering::Release);

        let mut visible: Vec<&StaticMeshRenderCommand> = self
            .renderables
            .iter()
            .filter(|renderable| renderable.is_visible)
            .collect();
        visible.sort_by_key(|renderable| renderable.mesh.0);

        let mut batches: Vec<MeshBatch> = Vec::new();
        for renderable in visible {
            let slot = self.next_transform_slot.fetch_add(1, Ordering::AcqRel);
            if slot >= MAX_RENDERABLES {
                log::warn!(
                    "Model matrix buffer full ({} slots), dropping remaining renderables",
                    MAX_RENDERABLES
                );
                break;
            }
            device.write_buffer(
                self.model_matrix_buffer,
                slot as u64 * MATRIX_SIZE,
                &matrix_bytes(&renderable.transform),
            )?;

            match batches.last_mut() {
                Some(batch) if batch.mesh == renderable.mesh => batch.instance_count += 1,
                _ => batches.push(MeshBatch {
                    mesh: renderable.mesh,
                    first_slot: slot,
                    instance_count: 1,
                }),
            }
        }
        Ok(batches)
    }

    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        for mesh in self.meshes.drain(..) {
            device.destroy_buffer(mesh.vertex_buffer);
            device.destroy_buffer(mesh.index_buffer);
        }
        self.renderables.clear();
        device.destroy_buffer(self.model_matrix_buffer);
    }
}
