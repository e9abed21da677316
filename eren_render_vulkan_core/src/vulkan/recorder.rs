use std::cell::RefCell;

use ash::vk;

/// The subset of command-buffer recording the renderer uses.
///
/// Implemented for [`ash::Device`] for real frames and for [`CommandLog`] so
/// the order and shape of recorded commands can be inspected without a GPU.
pub trait CommandRecorder {
    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
    );

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer);

    fn bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    );

    fn bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );

    fn draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn image_barriers(
        &self,
        command_buffer: vk::CommandBuffer,
        barriers: &[vk::ImageMemoryBarrier2<'_>],
    );

    fn blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        dst_image: vk::Image,
        region: &vk::ImageBlit,
        filter: vk::Filter,
    );
}

impl CommandRecorder for ash::Device {
    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
    ) {
        let subpass_begin_info =
            vk::SubpassBeginInfo::default().contents(vk::SubpassContents::INLINE);
        unsafe { self.cmd_begin_render_pass2(command_buffer, begin_info, &subpass_begin_info) };
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        let subpass_end_info = vk::SubpassEndInfo::default();
        unsafe { self.cmd_end_render_pass2(command_buffer, &subpass_end_info) };
    }

    fn bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.cmd_bind_pipeline(command_buffer, bind_point, pipeline) };
    }

    fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.cmd_bind_descriptor_sets(command_buffer, bind_point, layout, 0, descriptor_sets, &[])
        };
    }

    fn bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe { self.cmd_bind_vertex_buffers(command_buffer, first_binding, buffers, offsets) };
    }

    fn draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.cmd_draw(
                command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }

    fn image_barriers(
        &self,
        command_buffer: vk::CommandBuffer,
        barriers: &[vk::ImageMemoryBarrier2<'_>],
    ) {
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(barriers);
        unsafe { self.cmd_pipeline_barrier2(command_buffer, &dependency_info) };
    }

    fn blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        dst_image: vk::Image,
        region: &vk::ImageBlit,
        filter: vk::Filter,
    ) {
        unsafe {
            self.cmd_blit_image(
                command_buffer,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
                filter,
            )
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_value_count: usize,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindDescriptorSets(Vec<vk::DescriptorSet>),
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    ImageBarriers(Vec<ImageTransition>),
    BlitImage {
        src_image: vk::Image,
        dst_image: vk::Image,
        src_offsets: [vk::Offset3D; 2],
        dst_offsets: [vk::Offset3D; 2],
        filter: vk::Filter,
    },
}

/// Records commands in memory instead of submitting them to a device.
#[derive(Debug, Default)]
pub struct CommandLog {
    commands: RefCell<Vec<RecordedCommand>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.borrow().clone()
    }

    /// `(vertex_count, instance_count, first_vertex, first_instance)` of every draw.
    pub fn draws(&self) -> Vec<(u32, u32, u32, u32)> {
        self.commands
            .borrow()
            .iter()
            .filter_map(|command| match *command {
                RecordedCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => Some((vertex_count, instance_count, first_vertex, first_instance)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, command: RecordedCommand) {
        self.commands.borrow_mut().push(command);
    }
}

impl CommandRecorder for CommandLog {
    fn begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
    ) {
        self.push(RecordedCommand::BeginRenderPass {
            render_pass: begin_info.render_pass,
            framebuffer: begin_info.framebuffer,
            extent: begin_info.render_area.extent,
            clear_value_count: begin_info.clear_value_count as usize,
        });
    }

    fn end_render_pass(&self, _command_buffer: vk::CommandBuffer) {
        self.push(RecordedCommand::EndRenderPass);
    }

    fn bind_pipeline(
        &self,
        _command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_sets(
        &self,
        _command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.push(RecordedCommand::BindDescriptorSets(descriptor_sets.to_vec()));
    }

    fn bind_vertex_buffers(
        &self,
        _command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.push(RecordedCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        });
    }

    fn draw(
        &self,
        _command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn image_barriers(
        &self,
        _command_buffer: vk::CommandBuffer,
        barriers: &[vk::ImageMemoryBarrier2<'_>],
    ) {
        self.push(RecordedCommand::ImageBarriers(
            barriers
                .iter()
                .map(|barrier| ImageTransition {
                    image: barrier.image,
                    old_layout: barrier.old_layout,
                    new_layout: barrier.new_layout,
                    src_stage_mask: barrier.src_stage_mask,
                    dst_stage_mask: barrier.dst_stage_mask,
                })
                .collect(),
        ));
    }

    fn blit_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        dst_image: vk::Image,
        region: &vk::ImageBlit,
        filter: vk::Filter,
    ) {
        self.push(RecordedCommand::BlitImage {
            src_image,
            dst_image,
            src_offsets: region.src_offsets,
            dst_offsets: region.dst_offsets,
            filter,
        });
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn log_keeps_recording_order() {
        let log = CommandLog::new();
        let command_buffer = vk::CommandBuffer::null();
        let pipeline = vk::Pipeline::from_raw(7);

        log.bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        log.draw(command_buffer, 36, 1, 0, 0);
        log.draw(command_buffer, 4, 1, 0, 0);

        assert_eq!(
            log.commands()[0],
            RecordedCommand::BindPipeline(vk::Pipeline::from_raw(7))
        );
        assert_eq!(log.draws(), vec![(36, 1, 0, 0), (4, 1, 0, 0)]);
    }

    #[test]
    fn begin_captures_clear_value_count() {
        let log = CommandLog::new();
        let clear_values = [vk::ClearValue::default(); 3];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk::RenderPass::from_raw(1))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: 1280,
                    height: 720,
                },
            })
            .clear_values(&clear_values);

        log.begin_render_pass(vk::CommandBuffer::null(), &begin_info);

        match &log.commands()[0] {
            RecordedCommand::BeginRenderPass {
                clear_value_count,
                extent,
                ..
            } => {
                assert_eq!(*clear_value_count, 3);
                assert_eq!(extent.width, 1280);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
