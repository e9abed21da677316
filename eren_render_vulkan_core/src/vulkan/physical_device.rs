use std::ffi::CStr;

use ash::{khr, vk};
use thiserror::Error;

use crate::vulkan::{
    instance::VulkanInstanceManager,
    queue::{QueueFamilyIndices, find_queue_family_indices},
    surface::SurfaceManager,
    swapchain::get_swapchain_support_details,
};

const MINIMUM_API_VERSION: u32 = vk::API_VERSION_1_3;
const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum PhysicalDeviceManagerError {
    #[error("Failed to enumerate physical devices: {0}")]
    EnumeratePhysicalDevicesFailed(String),

    #[error("Failed to find a suitable GPU")]
    FindSuitableGpuFailed,
}

/// Why a physical device was skipped during selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceRejection {
    #[error("Vulkan {0} is older than 1.3")]
    ApiVersionTooOld(String),

    #[error("CPU implementations are not accepted")]
    CpuDevice,

    #[error("No graphics and present queue families")]
    MissingQueueFamilies,

    #[error("Missing required device extensions")]
    MissingExtensions,

    #[error("Surface exposes no formats or present modes")]
    InadequateSwapchain,

    #[error("Missing synchronization2 or separateDepthStencilLayouts")]
    MissingFeatures,
}

/// Everything the selection gate looks at for one candidate device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceCapabilities {
    pub api_version: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_family_indices: QueueFamilyIndices,
    pub extensions_supported: bool,
    pub swapchain_adequate: bool,
    pub synchronization2: bool,
    pub separate_depth_stencil_layouts: bool,
}

impl DeviceCapabilities {
    pub fn evaluate(&self) -> Result<(), DeviceRejection> {
        if self.api_version < MINIMUM_API_VERSION {
            return Err(DeviceRejection::ApiVersionTooOld(format_api_version(
                self.api_version,
            )));
        }
        if self.device_type == vk::PhysicalDeviceType::CPU {
            return Err(DeviceRejection::CpuDevice);
        }
        if !self.queue_family_indices.is_complete() {
            return Err(DeviceRejection::MissingQueueFamilies);
        }
        if !self.extensions_supported {
            return Err(DeviceRejection::MissingExtensions);
        }
        if !self.swapchain_adequate {
            return Err(DeviceRejection::InadequateSwapchain);
        }
        if !self.synchronization2 || !self.separate_depth_stencil_layouts {
            return Err(DeviceRejection::MissingFeatures);
        }
        Ok(())
    }
}

pub fn format_api_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

/// Human-readable summary of the selected device, logged once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub name: String,
    pub driver: String,
    pub api_version: String,
    pub total_memory_mb: u64,
    pub free_memory_mb: Option<u64>,
}

impl DeviceReport {
    pub fn log(&self) {
        tracing::info!("Device: {}", self.name);
        tracing::info!("Driver: {}", self.driver);
        tracing::info!("Vulkan: {}", self.api_version);
        tracing::info!("Total memory: {}MB", self.total_memory_mb);
        match self.free_memory_mb {
            Some(free) => tracing::info!("Available free memory: {}MB", free),
            None => tracing::info!("Available free memory: unknown"),
        }
    }
}

/// Sums the device-local heaps, and their budgets when the driver reports them.
pub fn device_local_memory_mb(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    heap_budgets: Option<&[vk::DeviceSize]>,
) -> (u64, Option<u64>) {
    let count = (memory_properties.memory_heap_count as usize).min(vk::MAX_MEMORY_HEAPS);
    let mut total = 0;
    let mut free = 0;

    for (i, heap) in memory_properties.memory_heaps[..count].iter().enumerate() {
        if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
            total += heap.size;
            if let Some(budgets) = heap_budgets {
                free += budgets.get(i).copied().unwrap_or(0);
            }
        }
    }

    (total / BYTES_PER_MB, heap_budgets.map(|_| free / BYTES_PER_MB))
}

pub fn get_required_device_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![khr::swapchain::NAME];
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        extensions.push(ash::khr::portability_subset::NAME);
    }
    extensions
}

pub struct PhysicalDeviceManager {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_indices: QueueFamilyIndices,
    pub memory_budget_supported: bool,
    pub report: DeviceReport,
}

impl PhysicalDeviceManager {
    pub fn new(
        instance_manager: &VulkanInstanceManager,
        surface_manager: &SurfaceManager,
    ) -> Result<Self, PhysicalDeviceManagerError> {
        let instance = &instance_manager.instance;
        let physical_devices = unsafe {
            instance.enumerate_physical_devices().map_err(|e| {
                PhysicalDeviceManagerError::EnumeratePhysicalDevicesFailed(e.to_string())
            })?
        };

        let (physical_device, queue_family_indices) = physical_devices
            .into_iter()
            .find_map(|physical_device| {
                let capabilities =
                    query_device_capabilities(instance, surface_manager, physical_device);
                match capabilities.evaluate() {
                    Ok(()) => Some((physical_device, capabilities.queue_family_indices)),
                    Err(reason) => {
                        tracing::debug!(
                            "Skipping {}: {}",
                            device_name(instance, physical_device),
                            reason
                        );
                        None
                    }
                }
            })
            .ok_or(PhysicalDeviceManagerError::FindSuitableGpuFailed)?;

        let memory_budget_supported = extension_supported(
            instance,
            physical_device,
            ash::ext::memory_budget::NAME,
        );
        let report = build_device_report(instance, physical_device, memory_budget_supported);
        report.log();

        Ok(Self {
            physical_device,
            queue_family_indices,
            memory_budget_supported,
            report,
        })
    }
}

fn query_device_capabilities(
    instance: &ash::Instance,
    surface_manager: &SurfaceManager,
    physical_device: vk::PhysicalDevice,
) -> DeviceCapabilities {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };

    let queue_family_indices = find_queue_family_indices(
        instance,
        &surface_manager.surface_loader,
        surface_manager.surface,
        physical_device,
    );

    let extensions_supported = get_required_device_extensions()
        .into_iter()
        .all(|name| extension_supported(instance, physical_device, name));

    let swapchain_adequate = extensions_supported
        && get_swapchain_support_details(
            &surface_manager.surface_loader,
            surface_manager.surface,
            physical_device,
        )
        .map(|details| !details.formats.is_empty() && !details.present_modes.is_empty())
        .unwrap_or(false);

    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    if properties.api_version >= MINIMUM_API_VERSION {
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
    }

    DeviceCapabilities {
        api_version: properties.api_version,
        device_type: properties.device_type,
        queue_family_indices,
        extensions_supported,
        swapchain_adequate,
        synchronization2: features13.synchronization2 == vk::TRUE,
        separate_depth_stencil_layouts: features12.separate_depth_stencil_layouts == vk::TRUE,
    }
}

fn extension_supported(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: &CStr,
) -> bool {
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .unwrap_or_default();
    available
        .iter()
        .any(|ext| ext.extension_name_as_c_str().is_ok_and(|ext_name| ext_name == name))
}

fn device_name(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> String {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn build_device_report(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    memory_budget_supported: bool,
) -> DeviceReport {
    let mut driver_properties = vk::PhysicalDeviceDriverProperties::default();
    let mut properties2 = vk::PhysicalDeviceProperties2::default().push_next(&mut driver_properties);
    unsafe { instance.get_physical_device_properties2(physical_device, &mut properties2) };
    let properties = properties2.properties;

    let mut budget = vk::PhysicalDeviceMemoryBudgetPropertiesEXT::default();
    let memory_properties = if memory_budget_supported {
        let mut memory_properties2 =
            vk::PhysicalDeviceMemoryProperties2::default().push_next(&mut budget);
        unsafe {
            instance.get_physical_device_memory_properties2(physical_device, &mut memory_properties2)
        };
        memory_properties2.memory_properties
    } else {
        unsafe { instance.get_physical_device_memory_properties(physical_device) }
    };

    let budgets = memory_budget_supported.then_some(&budget.heap_budget[..]);
    let (total_memory_mb, free_memory_mb) = device_local_memory_mb(&memory_properties, budgets);

    DeviceReport {
        name: properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        driver: driver_properties
            .driver_info_as_c_str()
            .map(|info| info.to_string_lossy().into_owned())
            .unwrap_or_default(),
        api_version: format_api_version(properties.api_version),
        total_memory_mb,
        free_memory_mb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable_device() -> DeviceCapabilities {
        DeviceCapabilities {
            api_version: vk::make_api_version(0, 1, 3, 250),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_family_indices: QueueFamilyIndices {
                graphics_queue_family_index: Some(0),
                present_queue_family_index: Some(0),
            },
            extensions_supported: true,
            swapchain_adequate: true,
            synchronization2: true,
            separate_depth_stencil_layouts: true,
        }
    }

    #[test]
    fn accepts_capable_device() {
        assert_eq!(capable_device().evaluate(), Ok(()));
    }

    #[test]
    fn rejects_vulkan_1_2() {
        let device = DeviceCapabilities {
            api_version: vk::make_api_version(0, 1, 2, 198),
            ..capable_device()
        };

        assert_eq!(
            device.evaluate(),
            Err(DeviceRejection::ApiVersionTooOld("1.2.198".to_string()))
        );
    }

    #[test]
    fn rejects_cpu_implementations() {
        let device = DeviceCapabilities {
            device_type: vk::PhysicalDeviceType::CPU,
            ..capable_device()
        };

        assert_eq!(device.evaluate(), Err(DeviceRejection::CpuDevice));
    }

    #[test]
    fn rejects_missing_synchronization2() {
        let device = DeviceCapabilities {
            synchronization2: false,
            ..capable_device()
        };

        assert_eq!(device.evaluate(), Err(DeviceRejection::MissingFeatures));
    }

    #[test]
    fn rejects_missing_present_queue() {
        let device = DeviceCapabilities {
            queue_family_indices: QueueFamilyIndices {
                graphics_queue_family_index: Some(0),
                present_queue_family_index: None,
            },
            ..capable_device()
        };

        assert_eq!(device.evaluate(), Err(DeviceRejection::MissingQueueFamilies));
    }

    #[test]
    fn counts_only_device_local_heaps() {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 2,
            ..Default::default()
        };
        properties.memory_heaps[0] = vk::MemoryHeap {
            size: 8192 * BYTES_PER_MB,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        properties.memory_heaps[1] = vk::MemoryHeap {
            size: 16384 * BYTES_PER_MB,
            flags: vk::MemoryHeapFlags::empty(),
        };

        let budgets = [6000 * BYTES_PER_MB, 12000 * BYTES_PER_MB];

        assert_eq!(device_local_memory_mb(&properties, None), (8192, None));
        assert_eq!(
            device_local_memory_mb(&properties, Some(&budgets)),
            (8192, Some(6000))
        );
    }
}
