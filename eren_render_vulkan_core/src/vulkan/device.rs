use ash::vk;
use thiserror::Error;

use crate::vulkan::{physical_device::get_required_device_extensions, queue::QueueFamilyIndices};

#[derive(Debug, Error)]
pub enum DeviceManagerError {
    #[error("Queue family indices are incomplete")]
    IncompleteQueueFamilies,

    #[error("Failed to create device: {0}")]
    CreateDeviceFailed(String),
}

pub struct DeviceManager {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl DeviceManager {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_indices: &QueueFamilyIndices,
        enable_memory_budget: bool,
    ) -> Result<Self, DeviceManagerError> {
        let (graphics_index, present_index) = queue_family_indices
            .resolved()
            .ok_or(DeviceManagerError::IncompleteQueueFamilies)?;

        let queue_priority = [1.0f32];
        let mut queue_infos = vec![
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_index)
                .queue_priorities(&queue_priority),
        ];
        if graphics_index != present_index {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(present_index)
                    .queue_priorities(&queue_priority),
            );
        }

        let mut required_extensions = get_required_device_extensions();
        if enable_memory_budget {
            required_extensions.push(ash::ext::memory_budget::NAME);
        }
        let raw_required_extensions: Vec<*const std::ffi::c_char> =
            required_extensions.iter().map(|s| s.as_ptr()).collect();

        let mut features12 =
            vk::PhysicalDeviceVulkan12Features::default().separate_depth_stencil_layouts(true);
        let mut features13 =
            vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&raw_required_extensions)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe {
            instance
                .create_device(physical_device, &device_info, None)
                .map_err(|e| DeviceManagerError::CreateDeviceFailed(e.to_string()))?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_index, 0) };
        let present_queue = unsafe { device.get_device_queue(present_index, 0) };

        tracing::debug!(
            "Logical device created (graphics family {}, present family {})",
            graphics_index,
            present_index
        );

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
        })
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
