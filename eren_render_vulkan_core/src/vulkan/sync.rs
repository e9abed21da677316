use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameSyncError {
    #[error("Failed to create semaphore: {0}")]
    CreateSemaphoreFailed(String),

    #[error("Failed to create fence: {0}")]
    CreateFenceFailed(String),

    #[error("Failed to wait for fence: {0}")]
    WaitForFenceFailed(String),

    #[error("Failed to reset fence: {0}")]
    ResetFenceFailed(String),
}

/// CPU side of the in-flight fence. Waiting and re-arming are separate so a
/// frame that fails before submission leaves the fence signalled.
pub trait FrameFence {
    fn wait(&self) -> Result<(), FrameSyncError>;
    fn reset(&self) -> Result<(), FrameSyncError>;
}

/// The one fence and two semaphores a single frame in flight needs.
pub struct FrameSync {
    device: ash::Device,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self, FrameSyncError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Signalled so the first frame does not block.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| FrameSyncError::CreateSemaphoreFailed(e.to_string()))?;

            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(FrameSyncError::CreateSemaphoreFailed(e.to_string()));
                }
            };

            let in_flight = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_semaphore(image_available, None);
                    return Err(FrameSyncError::CreateFenceFailed(e.to_string()));
                }
            };

            Ok(Self {
                device: device.clone(),
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

}

impl FrameFence for FrameSync {
    /// Blocks until the previous submission has finished.
    fn wait(&self) -> Result<(), FrameSyncError> {
        unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(&self.in_flight), true, u64::MAX)
                .map_err(|e| FrameSyncError::WaitForFenceFailed(e.to_string()))
        }
    }

    /// Must be followed by a submission that signals `in_flight`.
    fn reset(&self) -> Result<(), FrameSyncError> {
        unsafe {
            self.device
                .reset_fences(std::slice::from_ref(&self.in_flight))
                .map_err(|e| FrameSyncError::ResetFenceFailed(e.to_string()))
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.in_flight, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_semaphore(self.image_available, None);
        }
    }
}
