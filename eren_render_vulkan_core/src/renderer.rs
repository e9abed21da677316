use ash::vk;

use crate::vulkan::recorder::CommandRecorder;

#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
}

/// Records one frame's worth of passes into `frame_context.command_buffer`.
pub trait Renderer<R> {
    fn render<C: CommandRecorder>(
        &self,
        recorder: &C,
        frame_context: &FrameContext,
        render_items: &[R],
    );
}
