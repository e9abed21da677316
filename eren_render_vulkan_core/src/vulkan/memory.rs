use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Failed to find suitable memory type")]
    FindSuitableMemoryTypeFailed,

    #[error("Failed to create image: {0}")]
    CreateImageFailed(String),

    #[error("Failed to allocate memory: {0}")]
    AllocateMemoryFailed(String),

    #[error("Failed to bind memory to image: {0}")]
    BindMemoryToImageFailed(String),

    #[error("Failed to create buffer: {0}")]
    CreateBufferFailed(String),

    #[error("Failed to bind memory to buffer: {0}")]
    BindMemoryToBufferFailed(String),

    #[error("Failed to map memory: {0}")]
    MapMemoryFailed(String),

    #[error("Failed to flush mapped memory: {0}")]
    FlushMemoryFailed(String),

    #[error("Resource {index} would be placed at offset {offset}, not a multiple of {alignment}")]
    MisalignedPlacement {
        index: usize,
        offset: vk::DeviceSize,
        alignment: vk::DeviceSize,
    },

    #[error("Write of {size} bytes at offset {offset} exceeds allocation of {capacity} bytes")]
    WriteOutOfBounds {
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },
}

/// Alignment-rounded footprint of one resource inside a shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySegment {
    pub segment_size: vk::DeviceSize,
    pub segment_count: vk::DeviceSize,
}

impl MemorySegment {
    pub fn from_size_alignment(size: vk::DeviceSize, alignment: vk::DeviceSize) -> Self {
        let alignment = alignment.max(1);
        Self {
            segment_size: alignment,
            segment_count: size.div_ceil(alignment),
        }
    }

    pub fn from_requirements(requirements: &vk::MemoryRequirements) -> Self {
        Self::from_size_alignment(requirements.size, requirements.alignment)
    }

    /// Bytes reserved for the resource, always a multiple of its alignment.
    pub fn span(&self) -> vk::DeviceSize {
        self.segment_size * self.segment_count
    }
}

pub fn compute_memory_segment(requirements: &vk::MemoryRequirements) -> MemorySegment {
    MemorySegment::from_requirements(requirements)
}

/// Returns the byte offset of every segment when they are packed back to back,
/// plus the total allocation size.
pub fn placement_offsets(segments: &[MemorySegment]) -> (Vec<vk::DeviceSize>, vk::DeviceSize) {
    let mut offsets = Vec::with_capacity(segments.len());
    let mut cursor: vk::DeviceSize = 0;
    for segment in segments {
        offsets.push(cursor);
        cursor += segment.span();
    }
    (offsets, cursor)
}

/// Index of the first segment whose offset breaks its own alignment. Packing
/// keeps every offset aligned as long as no segment follows one with a
/// smaller alignment.
pub fn find_misaligned_placement(
    segments: &[MemorySegment],
    offsets: &[vk::DeviceSize],
) -> Option<usize> {
    segments
        .iter()
        .zip(offsets)
        .position(|(segment, &offset)| offset % segment.segment_size != 0)
}

/// Picks the first memory type allowed by `type_bits` whose flags contain all of
/// `flags`. Falls back to index 0 when nothing matches, so callers that need a
/// guarantee should go through [`find_memory_type`].
pub fn select_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> u32 {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            (type_bits & (1u32 << *index)) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
        .unwrap_or(0)
}

fn memory_type_satisfies(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    index: u32,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> bool {
    index < memory_properties.memory_type_count
        && (type_bits & (1 << index)) != 0
        && memory_properties.memory_types[index as usize]
            .property_flags
            .contains(flags)
}

pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, MemoryError> {
    let index = select_memory_type(memory_properties, type_bits, flags);
    if memory_type_satisfies(memory_properties, index, type_bits, flags) {
        Ok(index)
    } else {
        Err(MemoryError::FindSuitableMemoryTypeFailed)
    }
}

/// Device-facing half of the memory helper: owns a copy of the device and the
/// memory properties queried once at setup.
#[derive(Clone)]
pub struct MemoryAllocator {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// One allocation shared by several resources, with each resource's offset in
/// binding order.
#[derive(Debug)]
pub struct SharedAllocation {
    pub memory: vk::DeviceMemory,
    pub offsets: Vec<vk::DeviceSize>,
    pub size: vk::DeviceSize,
}

impl MemoryAllocator {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        Self {
            device,
            memory_properties,
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn allocate(
        &self,
        size: vk::DeviceSize,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory, MemoryError> {
        let memory_type_index = find_memory_type(&self.memory_properties, type_bits, flags)?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        unsafe { self.device.allocate_memory(&alloc_info, None) }
            .map_err(|e| MemoryError::AllocateMemoryFailed(e.to_string()))
    }

    pub fn create_image_with_memory(
        &self,
        image_info: &vk::ImageCreateInfo,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory), MemoryError> {
        let image = unsafe {
            self.device
                .create_image(image_info, None)
                .map_err(|e| MemoryError::CreateImageFailed(e.to_string()))?
        };

        match self.bind_images_to_shared_memory(&[image], memory_flags) {
            Ok(allocation) => Ok((image, allocation.memory)),
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    pub fn create_buffer_with_memory(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory), MemoryError> {
        let buffer = self.create_buffer(size, usage)?;

        match self.bind_buffers_to_shared_memory(&[buffer], memory_flags) {
            Ok(allocation) => Ok((buffer, allocation.memory)),
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<vk::Buffer, MemoryError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| MemoryError::CreateBufferFailed(e.to_string()))
    }

    /// Places every image in one allocation at alignment-respecting offsets.
    pub fn bind_images_to_shared_memory(
        &self,
        images: &[vk::Image],
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<SharedAllocation, MemoryError> {
        let requirements: Vec<vk::MemoryRequirements> = images
            .iter()
            .map(|&image| unsafe { self.device.get_image_memory_requirements(image) })
            .collect();

        let allocation = self.allocate_for(&requirements, memory_flags)?;

        for (&image, &offset) in images.iter().zip(&allocation.offsets) {
            if let Err(e) = unsafe { self.device.bind_image_memory(image, allocation.memory, offset) }
            {
                unsafe { self.device.free_memory(allocation.memory, None) };
                return Err(MemoryError::BindMemoryToImageFailed(e.to_string()));
            }
        }

        Ok(allocation)
    }

    /// Places every buffer in one allocation at alignment-respecting offsets.
    pub fn bind_buffers_to_shared_memory(
        &self,
        buffers: &[vk::Buffer],
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<SharedAllocation, MemoryError> {
        let requirements: Vec<vk::MemoryRequirements> = buffers
            .iter()
            .map(|&buffer| unsafe { self.device.get_buffer_memory_requirements(buffer) })
            .collect();

        let allocation = self.allocate_for(&requirements, memory_flags)?;

        for (&buffer, &offset) in buffers.iter().zip(&allocation.offsets) {
            if let Err(e) =
                unsafe { self.device.bind_buffer_memory(buffer, allocation.memory, offset) }
            {
                unsafe { self.device.free_memory(allocation.memory, None) };
                return Err(MemoryError::BindMemoryToBufferFailed(e.to_string()));
            }
        }

        Ok(allocation)
    }

    fn allocate_for(
        &self,
        requirements: &[vk::MemoryRequirements],
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<SharedAllocation, MemoryError> {
        let segments: Vec<MemorySegment> = requirements
            .iter()
            .map(compute_memory_segment)
            .collect();
        let (offsets, size) = placement_offsets(&segments);

        if let Some(index) = find_misaligned_placement(&segments, &offsets) {
            return Err(MemoryError::MisalignedPlacement {
                index,
                offset: offsets[index],
                alignment: segments[index].segment_size,
            });
        }

        let type_bits = requirements
            .iter()
            .fold(u32::MAX, |bits, r| bits & r.memory_type_bits);

        let memory = self.allocate(size, type_bits, memory_flags)?;

        tracing::debug!(
            "Allocated {} bytes for {} resources at offsets {:?}",
            size,
            requirements.len(),
            offsets
        );

        Ok(SharedAllocation {
            memory,
            offsets,
            size,
        })
    }

    /// Maps `memory`, copies each `(offset, bytes)` region, flushes the whole
    /// range and unmaps again.
    pub fn write_host_visible(
        &self,
        memory: vk::DeviceMemory,
        capacity: vk::DeviceSize,
        regions: &[(vk::DeviceSize, &[u8])],
    ) -> Result<(), MemoryError> {
        for &(offset, bytes) in regions {
            let size = bytes.len() as vk::DeviceSize;
            if offset + size > capacity {
                return Err(MemoryError::WriteOutOfBounds {
                    offset,
                    size,
                    capacity,
                });
            }
        }

        unsafe {
            let mapped = self
                .device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(|e| MemoryError::MapMemoryFailed(e.to_string()))?
                as *mut u8;

            for &(offset, bytes) in regions {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    mapped.add(offset as usize),
                    bytes.len(),
                );
            }

            let range = vk::MappedMemoryRange::default()
                .memory(memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            let flushed = self
                .device
                .flush_mapped_memory_ranges(std::slice::from_ref(&range))
                .map_err(|e| MemoryError::FlushMemoryFailed(e.to_string()));

            self.device.unmap_memory(memory);
            flushed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            properties.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        properties
    }

    #[test]
    fn segment_rounds_size_up_to_alignment() {
        let segment = MemorySegment::from_size_alignment(1000, 256);

        assert_eq!(segment.segment_size, 256);
        assert_eq!(segment.segment_count, 4);
        assert_eq!(segment.span(), 1024);
    }

    #[test]
    fn exact_multiple_needs_no_extra_segment() {
        let segment = MemorySegment::from_size_alignment(512, 256);
        assert_eq!(segment.segment_count, 2);
    }

    #[test]
    fn offsets_are_cumulative_spans() {
        let segments = [
            MemorySegment::from_size_alignment(100, 64),
            MemorySegment::from_size_alignment(10, 256),
            MemorySegment::from_size_alignment(3000, 1024),
        ];

        let (offsets, total) = placement_offsets(&segments);

        assert_eq!(offsets, vec![0, 128, 384]);
        assert_eq!(total, 384 + 3072);
    }

    #[test]
    fn placements_never_overlap() {
        let requests: [(vk::DeviceSize, vk::DeviceSize); 6] = [
            (36 * 12, 16),
            (6 * 12, 256),
            (1, 1),
            (1280 * 720 * 16, 65536),
            (4, 4),
            (144, 64),
        ];
        let segments: Vec<MemorySegment> = requests
            .iter()
            .map(|&(size, alignment)| MemorySegment::from_size_alignment(size, alignment))
            .collect();

        let (offsets, total) = placement_offsets(&segments);

        for (k, &(size, _)) in requests.iter().enumerate() {
            let expected: vk::DeviceSize = segments[..k].iter().map(MemorySegment::span).sum();
            assert_eq!(offsets[k], expected);
            assert!(offsets[k] + size <= total);
            if k + 1 < requests.len() {
                assert!(offsets[k] + size <= offsets[k + 1]);
            }
        }
    }

    #[test]
    fn equal_alignments_stay_aligned() {
        let segments: Vec<MemorySegment> = [100, 7, 4096, 1]
            .iter()
            .map(|&size| MemorySegment::from_size_alignment(size, 256))
            .collect();

        let (offsets, _) = placement_offsets(&segments);

        assert!(offsets.iter().all(|offset| offset % 256 == 0));
        assert_eq!(find_misaligned_placement(&segments, &offsets), None);
    }

    #[test]
    fn decreasing_alignments_stay_aligned() {
        let segments = [
            MemorySegment::from_size_alignment(1000, 1024),
            MemorySegment::from_size_alignment(10, 256),
            MemorySegment::from_size_alignment(33, 16),
            MemorySegment::from_size_alignment(3, 4),
        ];

        let (offsets, _) = placement_offsets(&segments);

        assert_eq!(find_misaligned_placement(&segments, &offsets), None);
    }

    #[test]
    fn increasing_alignment_is_detected() {
        let segments = [
            MemorySegment::from_size_alignment(16, 16),
            MemorySegment::from_size_alignment(16, 256),
        ];

        let (offsets, _) = placement_offsets(&segments);

        assert_eq!(offsets, vec![0, 16]);
        assert_eq!(find_misaligned_placement(&segments, &offsets), Some(1));
    }

    #[test]
    fn selector_returns_single_matching_type() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let index =
            select_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE);

        assert_eq!(index, 1);
    }

    #[test]
    fn selector_requires_every_requested_flag() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let index = select_memory_type(
            &properties,
            0b11,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        );

        assert_eq!(index, 1);
    }

    #[test]
    fn selector_respects_compatibility_mask() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        let index = select_memory_type(&properties, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);

        assert_eq!(index, 1);
    }

    #[test]
    fn selector_falls_back_to_zero() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        let index = select_memory_type(&properties, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE);

        assert_eq!(index, 0);
    }

    #[test]
    fn validated_lookup_rejects_fallback() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let result = find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);

        assert!(matches!(
            result,
            Err(MemoryError::FindSuitableMemoryTypeFailed)
        ));
    }

    #[test]
    fn validated_lookup_accepts_index_zero_when_it_matches() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let index =
            find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();

        assert_eq!(index, 0);
    }
}
