use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandBufferManagerError {
    #[error("Failed to create command pool: {0}")]
    CreateCommandPoolFailed(String),

    #[error("Failed to allocate command buffer: {0}")]
    AllocateCommandBufferFailed(String),

    #[error("Failed to reset command buffer: {0}")]
    ResetCommandBufferFailed(String),

    #[error("Failed to begin command buffer: {0}")]
    BeginCommandBufferFailed(String),

    #[error("Failed to end command buffer: {0}")]
    EndCommandBufferFailed(String),
}

/// A resettable command pool with a single primary command buffer.
pub struct CommandBufferManager {
    device: ash::Device,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
}

impl CommandBufferManager {
    pub fn new(
        device: &ash::Device,
        queue_family_index: u32,
    ) -> Result<Self, CommandBufferManagerError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .map_err(|e| CommandBufferManagerError::CreateCommandPoolFailed(e.to_string()))?
        };

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(CommandBufferManagerError::AllocateCommandBufferFailed(
                    e.to_string(),
                ));
            }
        };

        Ok(Self {
            device: device.clone(),
            command_pool,
            command_buffer,
        })
    }

    pub fn reset_and_begin(&self) -> Result<(), CommandBufferManagerError> {
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| CommandBufferManagerError::ResetCommandBufferFailed(e.to_string()))?;

            let begin_info = vk::CommandBufferBeginInfo::default();
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| CommandBufferManagerError::BeginCommandBufferFailed(e.to_string()))?;
        }
        Ok(())
    }

    pub fn end(&self) -> Result<(), CommandBufferManagerError> {
        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| CommandBufferManagerError::EndCommandBufferFailed(e.to_string()))
        }
    }
}

impl Drop for CommandBufferManager {
    fn drop(&mut self) {
        unsafe {
            // Frees the command buffer with it.
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
