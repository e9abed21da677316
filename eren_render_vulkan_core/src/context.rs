use ash::vk;
use thiserror::Error;
use winit::window::Window;

use crate::vulkan::{
    device::{DeviceManager, DeviceManagerError},
    instance::{VulkanInstanceManager, VulkanInstanceManagerError},
    memory::MemoryAllocator,
    physical_device::{PhysicalDeviceManager, PhysicalDeviceManagerError},
    surface::{SurfaceManager, SurfaceManagerError},
    swapchain::{
        SwapchainManager, SwapchainManagerError, SwapchainSupportError,
        get_swapchain_support_details,
    },
};

#[derive(Debug, Error)]
pub enum GraphicsContextError {
    #[error("Failed to load Vulkan entry: {0}")]
    LoadEntryFailed(String),

    #[error(transparent)]
    Instance(#[from] VulkanInstanceManagerError),

    #[error(transparent)]
    Surface(#[from] SurfaceManagerError),

    #[error(transparent)]
    PhysicalDevice(#[from] PhysicalDeviceManagerError),

    #[error(transparent)]
    Device(#[from] DeviceManagerError),

    #[error(transparent)]
    SwapchainSupport(#[from] SwapchainSupportError),

    #[error(transparent)]
    Swapchain(#[from] SwapchainManagerError),
}

/// Swapchain parameters requested at setup, clamped to the surface limits.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsConfig {
    pub swapchain_extent: vk::Extent2D,
    pub min_image_count: u32,
    pub enable_validation: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            swapchain_extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            min_image_count: 2,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

/// Everything needed to talk to the GPU and present to one window.
///
/// Fields are declared in reverse creation order so they are released
/// child-first once [`Drop`] has waited for the device to go idle.
pub struct GraphicsContext {
    swapchain: SwapchainManager,
    allocator: MemoryAllocator,
    device: DeviceManager,
    physical_device: PhysicalDeviceManager,
    surface: SurfaceManager,
    instance: VulkanInstanceManager,
    _entry: ash::Entry,
}

impl GraphicsContext {
    pub fn new(
        window: &Window,
        app_name: &str,
        config: &GraphicsConfig,
    ) -> Result<Self, GraphicsContextError> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GraphicsContextError::LoadEntryFailed(e.to_string()))?;

        let instance =
            VulkanInstanceManager::new(&entry, window, app_name, config.enable_validation)?;
        let surface = SurfaceManager::new(&entry, &instance, window)?;
        let physical_device = PhysicalDeviceManager::new(&instance, &surface)?;

        let device = DeviceManager::new(
            &instance.instance,
            physical_device.physical_device,
            &physical_device.queue_family_indices,
            physical_device.memory_budget_supported,
        )?;

        let allocator = MemoryAllocator::new(
            &instance.instance,
            physical_device.physical_device,
            device.device.clone(),
        );

        let support_details = get_swapchain_support_details(
            &surface.surface_loader,
            surface.surface,
            physical_device.physical_device,
        )?;

        let swapchain = SwapchainManager::new(
            &instance.instance,
            &device.device,
            surface.surface,
            &physical_device.queue_family_indices,
            &support_details,
            config.swapchain_extent,
            config.min_image_count,
        )?;

        tracing::info!("Graphics context ready");

        Ok(Self {
            swapchain,
            allocator,
            device,
            physical_device,
            surface,
            instance,
            _entry: entry,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device.device
    }

    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    pub fn graphics_queue_family_index(&self) -> u32 {
        self.physical_device
            .queue_family_indices
            .graphics_queue_family_index
            .unwrap_or_default()
    }

    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device.device_wait_idle() } {
            tracing::error!("Failed to wait for device idle: {}", e);
        }
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.wait_idle();
        tracing::debug!("Destroying graphics context");
    }
}
