use ash::vk;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_queue_family_index: Option<u32>,
    pub present_queue_family_index: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_queue_family_index.is_some() && self.present_queue_family_index.is_some()
    }

    /// Both indices, once the search has found them.
    pub fn resolved(&self) -> Option<(u32, u32)> {
        Some((
            self.graphics_queue_family_index?,
            self.present_queue_family_index?,
        ))
    }
}

/// Prefers a single family that can both draw and present; otherwise takes the
/// first graphics family and the first presenting family.
pub fn select_queue_families(
    queue_families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, queue_family) in queue_families.iter().enumerate() {
        let index = i as u32;
        let graphics = queue_family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = supports_present(index);

        if graphics && present {
            return QueueFamilyIndices {
                graphics_queue_family_index: Some(index),
                present_queue_family_index: Some(index),
            };
        }
        if graphics && indices.graphics_queue_family_index.is_none() {
            indices.graphics_queue_family_index = Some(index);
        }
        if present && indices.present_queue_family_index.is_none() {
            indices.present_queue_family_index = Some(index);
        }
    }

    indices
}

pub fn find_queue_family_indices(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> QueueFamilyIndices {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    select_queue_families(&queue_families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(physical_device, index, surface)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];

        let indices = select_queue_families(&families, |index| index != 0);

        assert_eq!(indices.resolved(), Some((2, 2)));
    }

    #[test]
    fn splits_families_when_needed() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];

        let indices = select_queue_families(&families, |index| index == 1);

        assert_eq!(indices.resolved(), Some((0, 1)));
    }

    #[test]
    fn incomplete_without_graphics() {
        let families = [family(vk::QueueFlags::COMPUTE)];

        let indices = select_queue_families(&families, |_| true);

        assert!(!indices.is_complete());
        assert_eq!(indices.resolved(), None);
    }
}
