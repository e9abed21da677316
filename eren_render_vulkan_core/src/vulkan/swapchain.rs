use ash::{khr::swapchain, vk};
use thiserror::Error;

use crate::vulkan::queue::QueueFamilyIndices;

#[derive(Debug, Error)]
pub enum SwapchainSupportError {
    #[error("Failed to enumerate swapchain support: {0}")]
    EnumerateSwapchainSupportFailed(String),

    #[error("Failed to enumerate swapchain formats: {0}")]
    EnumerateSwapchainFormatsFailed(String),

    #[error("Failed to enumerate swapchain present modes: {0}")]
    EnumerateSwapchainPresentModesFailed(String),
}

pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub fn get_swapchain_support_details(
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Result<SwapchainSupportDetails, SwapchainSupportError> {
    Ok(unsafe {
        SwapchainSupportDetails {
            capabilities: surface_loader
                .get_physical_device_surface_capabilities(device, surface)
                .map_err(|e| {
                    SwapchainSupportError::EnumerateSwapchainSupportFailed(e.to_string())
                })?,
            formats: surface_loader
                .get_physical_device_surface_formats(device, surface)
                .map_err(|e| {
                    SwapchainSupportError::EnumerateSwapchainFormatsFailed(e.to_string())
                })?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(device, surface)
                .map_err(|e| {
                    SwapchainSupportError::EnumerateSwapchainPresentModesFailed(e.to_string())
                })?,
        }
    })
}

#[derive(Debug, Error)]
pub enum SwapchainManagerError {
    #[error("Surface reports no formats")]
    NoSurfaceFormat,

    #[error("Surface does not support {0:?} usage")]
    UnsupportedImageUsage(vk::ImageUsageFlags),

    #[error("Failed to create swapchain: {0}")]
    CreateSwapchainFailed(String),

    #[error("Failed to get swapchain images: {0}")]
    GetSwapchainImagesFailed(String),

    #[error("Failed to acquire swapchain image: {0}")]
    AcquireImageFailed(String),

    #[error("Failed to present swapchain image: {0}")]
    PresentFailed(String),
}

/// Swapchain images are written by a blit, never rendered to directly.
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

pub struct SwapchainManager {
    pub swapchain_loader: swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_images: Vec<vk::Image>,
    pub amount_of_images: usize,
    pub preferred_surface_format: vk::Format,
    pub image_extent: vk::Extent2D,
}

impl SwapchainManager {
    pub fn new(
        instance: &ash::Instance,
        logical_device: &ash::Device,
        surface: vk::SurfaceKHR,
        queue_family_indices: &QueueFamilyIndices,
        support_details: &SwapchainSupportDetails,
        requested_extent: vk::Extent2D,
        requested_image_count: u32,
    ) -> Result<Self, SwapchainManagerError> {
        let capabilities = &support_details.capabilities;
        if !capabilities
            .supported_usage_flags
            .contains(SWAPCHAIN_IMAGE_USAGE)
        {
            return Err(SwapchainManagerError::UnsupportedImageUsage(
                SWAPCHAIN_IMAGE_USAGE,
            ));
        }

        let surface_format = select_preferred_surface_format(&support_details.formats)
            .ok_or(SwapchainManagerError::NoSurfaceFormat)?;
        let image_extent = determine_swapchain_extent(capabilities, requested_extent);
        let min_image_count = select_min_image_count(capabilities, requested_image_count);
        let present_mode = select_preferred_present_mode(&support_details.present_modes);

        let mut swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let indices: Vec<u32> = match queue_family_indices.resolved() {
            Some((graphics, present)) if graphics != present => vec![graphics, present],
            _ => Vec::new(),
        };
        if indices.is_empty() {
            swapchain_create_info =
                swapchain_create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        } else {
            swapchain_create_info = swapchain_create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&indices);
        }

        let swapchain_loader = swapchain::Device::new(instance, logical_device);

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| SwapchainManagerError::CreateSwapchainFailed(e.to_string()))
        }?;

        let swapchain_images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(SwapchainManagerError::GetSwapchainImagesFailed(
                    e.to_string(),
                ));
            }
        };

        let amount_of_images = swapchain_images.len();

        tracing::info!(
            "Swapchain created: {} images, {:?}, {}x{}, {:?}",
            amount_of_images,
            surface_format.format,
            image_extent.width,
            image_extent.height,
            present_mode
        );

        Ok(Self {
            swapchain_loader,
            swapchain,
            swapchain_images,
            amount_of_images,
            preferred_surface_format: surface_format.format,
            image_extent,
        })
    }

    pub fn acquire_next_image(
        &self,
        image_available: vk::Semaphore,
    ) -> Result<u32, SwapchainManagerError> {
        let (image_index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, image_available, vk::Fence::null())
                .map_err(|e| SwapchainManagerError::AcquireImageFailed(e.to_string()))?
        };
        if suboptimal {
            tracing::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(image_index)
    }

    pub fn present(
        &self,
        present_queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<(), SwapchainManagerError> {
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(std::slice::from_ref(&wait_semaphore))
            .swapchains(std::slice::from_ref(&self.swapchain))
            .image_indices(std::slice::from_ref(&image_index));

        unsafe {
            self.swapchain_loader
                .queue_present(present_queue, &present_info)
                .map_err(|e| SwapchainManagerError::PresentFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

fn select_preferred_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

fn determine_swapchain_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn select_min_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

fn select_preferred_present_mode(
    available_present_modes: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if available_present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // Always available.
        vk::PresentModeKHR::FIFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: vk::Extent2D, min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2160,
            },
            min_image_count: min_images,
            max_image_count: max_images,
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn surface_extent_wins_when_defined() {
        let caps = capabilities(
            vk::Extent2D {
                width: 1600,
                height: 900,
            },
            2,
            8,
        );

        let extent = determine_swapchain_extent(
            &caps,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );

        assert_eq!((extent.width, extent.height), (1600, 900));
    }

    #[test]
    fn requested_extent_is_clamped() {
        let caps = capabilities(UNDEFINED_EXTENT, 2, 8);

        let extent = determine_swapchain_extent(
            &caps,
            vk::Extent2D {
                width: 8000,
                height: 900,
            },
        );

        assert_eq!((extent.width, extent.height), (4096, 900));
    }

    #[test]
    fn image_count_respects_surface_limits() {
        assert_eq!(select_min_image_count(&capabilities(UNDEFINED_EXTENT, 3, 8), 2), 3);
        assert_eq!(select_min_image_count(&capabilities(UNDEFINED_EXTENT, 1, 2), 4), 2);
        assert_eq!(select_min_image_count(&capabilities(UNDEFINED_EXTENT, 1, 0), 2), 2);
    }

    #[test]
    fn prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = select_preferred_surface_format(&formats).unwrap();

        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
        assert!(select_preferred_surface_format(&[]).is_none());
    }

    #[test]
    fn falls_back_to_fifo() {
        assert_eq!(
            select_preferred_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            select_preferred_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
    }
}
