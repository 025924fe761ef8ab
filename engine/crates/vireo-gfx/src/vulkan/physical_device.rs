use std::ffi::CStr;

use ash::vk;

use crate::adapter::{AdapterInfo, AdapterType, QueueCaps, QueueFamilyInfo};
use crate::error::GfxResult;
use crate::types::MemoryTypeInfo;
use crate::vulkan::swapchain::VulkanSurface;

/// 一个候选物理设备，以及从它上面查询到的信息
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub info: AdapterInfo,
    pub memory_types: Vec<MemoryTypeInfo>,
}

/// 列出所有物理设备，并查询选择所需的信息
pub fn enumerate_physical_devices(
    instance: &ash::Instance,
    surface: Option<&VulkanSurface>,
) -> GfxResult<Vec<PhysicalDeviceCandidate>> {
    let handles = unsafe { instance.enumerate_physical_devices() }?;
    let mut candidates = Vec::with_capacity(handles.len());
    for handle in handles {
        let candidate = query_physical_device(instance, handle, surface)?;
        log::info!(
            "found physical device: {} ({:?}, {} MB, required features: {})",
            candidate.info.name,
            candidate.info.adapter_type,
            candidate.info.vram_mb(),
            candidate.info.supports_required_features
        );
        candidates.push(candidate);
    }
    Ok(candidates)
}

fn query_physical_device(
    instance: &ash::Instance,
    handle: vk::PhysicalDevice,
    surface: Option<&VulkanSurface>,
) -> GfxResult<PhysicalDeviceCandidate> {
    let props = unsafe { instance.get_physical_device_properties(handle) };
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy().into_owned();

    let mem_props = unsafe { instance.get_physical_device_memory_properties(handle) };
    let heaps = &mem_props.memory_heaps[..mem_props.memory_heap_count as usize];
    let memory_types = mem_props.memory_types[..mem_props.memory_type_count as usize]
        .iter()
        .map(|ty| MemoryTypeInfo {
            property_flags: ty.property_flags,
            heap_index: ty.heap_index,
            heap_size: heaps[ty.heap_index as usize].size,
        })
        .collect();
    let device_local_bytes = heaps
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();

    let family_props = unsafe { instance.get_physical_device_queue_family_properties(handle) };
    let mut queue_families = Vec::with_capacity(family_props.len());
    for (index, family) in family_props.iter().enumerate() {
        let supports_present = match surface {
            Some(surface) => surface.supports_present(handle, index as u32)?,
            None => false,
        };
        queue_families.push(QueueFamilyInfo {
            caps: QueueCaps::from(family.queue_flags),
            queue_count: family.queue_count,
            supports_present,
        });
    }

    let supports_required_features = props.api_version >= vk::API_VERSION_1_3 && {
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(handle, &mut features2) };
        features13.dynamic_rendering == vk::TRUE && features13.synchronization2 == vk::TRUE
    };

    Ok(PhysicalDeviceCandidate {
        handle,
        info: AdapterInfo {
            name,
            vendor_id: props.vendor_id,
            adapter_type: AdapterType::from(props.device_type),
            device_local_bytes,
            queue_families,
            supports_required_features,
        },
        memory_types,
    })
}
