use std::sync::Arc;

use ash::vk;

use crate::device::{pick_suitable_adapter, AdapterInfo, AdapterType};
use crate::error::RhiError;

use super::{debug, Instance, Surface};

#[derive(Copy, Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

pub struct PhysicalDevice {
    pub raw: vk::PhysicalDevice,
    pub(crate) instance: Arc<Instance>,
    pub(crate) queue_families: Vec<QueueFamily>,
    pub properties: vk::PhysicalDeviceProperties,
    pub adapter_info: AdapterInfo,
}

fn adapter_type(device_type: vk::PhysicalDeviceType) -> AdapterType {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterType::Virtual,
        _ => AdapterType::Software,
    }
}

fn dedicated_video_memory(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

fn enumerate(instance: &Arc<Instance>) -> Result<Vec<PhysicalDevice>, RhiError> {
    let raw_devices = unsafe { instance.raw.enumerate_physical_devices() }?;

    Ok(raw_devices
        .into_iter()
        .map(|raw| {
            let features = unsafe { instance.raw.get_physical_device_features(raw) };
            let properties = unsafe { instance.raw.get_physical_device_properties(raw) };
            let memory = unsafe { instance.raw.get_physical_device_memory_properties(raw) };

            let queue_families = unsafe {
                instance.raw.get_physical_device_queue_family_properties(raw)
            }
            .into_iter()
            .enumerate()
            .map(|(index, properties)| QueueFamily {
                index: index as u32,
                properties,
            })
            .collect();

            let adapter_info = AdapterInfo {
                name: debug::vk_to_string(&properties.device_name),
                adapter_type: adapter_type(properties.device_type),
                supports_geometry_shaders: features.geometry_shader == vk::TRUE,
                dedicated_video_memory: dedicated_video_memory(&memory),
            };

            PhysicalDevice {
                raw,
                instance: instance.clone(),
                queue_families,
                properties,
                adapter_info,
            }
        })
        .collect())
}

/// Pick the physical device that can present to `surface` and scores highest
/// under the shared adapter ranking.
pub fn pick_physical_device(
    instance: &Arc<Instance>,
    surface: &Surface,
) -> Result<PhysicalDevice, RhiError> {
    let mut devices: Vec<PhysicalDevice> = enumerate(instance)?
        .into_iter()
        .filter(|device| {
            device.queue_families.iter().any(|queue| {
                queue.properties.queue_count > 0
                    && queue.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && unsafe {
                        surface
                            .func_loader
                            .get_physical_device_surface_support(device.raw, queue.index, surface.raw)
                            .unwrap_or(false)
                    }
            })
        })
        .collect();

    let infos: Vec<AdapterInfo> = devices.iter().map(|d| d.adapter_info.clone()).collect();
    let picked = pick_suitable_adapter(&infos)?;
    Ok(devices.swap_remove(picked))
}
