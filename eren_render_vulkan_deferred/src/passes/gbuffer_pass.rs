use ash::vk;
use eren_render_vulkan_core::{
    renderer::FrameContext,
    vulkan::{
        memory::{MemoryAllocator, MemoryError},
        recorder::CommandRecorder,
    },
};
use thiserror::Error;

use crate::{
    constants::{CLEAR_COLOR, GBUFFER_FORMAT},
    passes::{
        DepthAttachment, PassHandles, PassKind, PipelineDesc, PipelineError, color_clear,
        create_graphics_pipeline, create_image_view, create_uniform_buffer, external_dependency,
        full_area, image_2d_info, record_pass, vertex_stream_layout, wait_idle,
    },
    scene::SceneActor,
    shader::PassShaders,
    uniforms::SceneTransformUbo,
};

#[derive(Debug, Error)]
pub enum GBufferPassError {
    #[error("Failed to create image: {0}")]
    CreateImageFailed(String),

    #[error("Failed to bind G-buffer memory: {0}")]
    BindImageMemoryFailed(MemoryError),

    #[error("Failed to create image view: {0}")]
    CreateImageViewFailed(String),

    #[error("Failed to create uniform buffer: {0}")]
    CreateBufferFailed(MemoryError),

    #[error("Failed to create render pass: {0}")]
    RenderPassCreationFailed(String),

    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),

    #[error("Failed to create descriptor set layout: {0}")]
    DescriptorSetLayoutCreationFailed(String),

    #[error("Failed to create descriptor pool: {0}")]
    DescriptorPoolCreationFailed(String),

    #[error("Failed to allocate descriptor set: {0}")]
    DescriptorSetAllocationFailed(String),

    #[error("Failed to create pipeline layout: {0}")]
    PipelineLayoutCreationFailed(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

const CLEAR_VALUES: [vk::ClearValue; 3] = [
    color_clear(CLEAR_COLOR),
    color_clear(CLEAR_COLOR),
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: u32::MAX,
        },
    },
];

/// What the G-buffer pass borrows from its owner.
pub struct GBufferInputs<'a> {
    pub scene_depth: &'a DepthAttachment,
    pub extent: vk::Extent2D,
}

/// Writes view-space position and normal of every actor into two float
/// targets, depth-tested against the shared scene depth buffer.
pub struct GBufferPass {
    device: ash::Device,

    position_image: vk::Image,
    normal_image: vk::Image,
    target_memory: vk::DeviceMemory,
    position_view: vk::ImageView,
    normal_view: vk::ImageView,

    transform_buffer: vk::Buffer,
    transform_memory: vk::DeviceMemory,

    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,

    handles: PassHandles,
}

impl GBufferPass {
    pub fn new(
        allocator: &MemoryAllocator,
        shaders: &PassShaders,
        inputs: GBufferInputs<'_>,
    ) -> Result<Self, GBufferPassError> {
        let device = allocator.device();
        let extent = inputs.extent;

        // Null handles are skipped on drop, so a failure part-way through
        // releases exactly what was created.
        let mut pass = Self {
            device: device.clone(),
            position_image: vk::Image::null(),
            normal_image: vk::Image::null(),
            target_memory: vk::DeviceMemory::null(),
            position_view: vk::ImageView::null(),
            normal_view: vk::ImageView::null(),
            transform_buffer: vk::Buffer::null(),
            transform_memory: vk::DeviceMemory::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            handles: PassHandles {
                render_area: full_area(extent),
                ..Default::default()
            },
        };

        let image_info = image_2d_info(
            GBUFFER_FORMAT,
            extent,
            1,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
        );

        unsafe {
            pass.position_image = device
                .create_image(&image_info, None)
                .map_err(|e| GBufferPassError::CreateImageFailed(e.to_string()))?;
            pass.normal_image = device
                .create_image(&image_info, None)
                .map_err(|e| GBufferPassError::CreateImageFailed(e.to_string()))?;
        }

        let allocation = allocator
            .bind_images_to_shared_memory(
                &[pass.position_image, pass.normal_image],
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .map_err(GBufferPassError::BindImageMemoryFailed)?;
        pass.target_memory = allocation.memory;

        pass.position_view = create_image_view(
            device,
            pass.position_image,
            GBUFFER_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )
        .map_err(|e| GBufferPassError::CreateImageViewFailed(e.to_string()))?;
        pass.normal_view = create_image_view(
            device,
            pass.normal_image,
            GBUFFER_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )
        .map_err(|e| GBufferPassError::CreateImageViewFailed(e.to_string()))?;

        let transform = SceneTransformUbo::new(extent);
        (pass.transform_buffer, pass.transform_memory) =
            create_uniform_buffer(allocator, &transform)
                .map_err(GBufferPassError::CreateBufferFailed)?;

        let color_attachment = vk::AttachmentDescription2::default()
            .format(GBUFFER_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let depth_attachment = vk::AttachmentDescription2::default()
            .format(inputs.scene_depth.format())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);

        let attachments = [color_attachment, color_attachment, depth_attachment];

        let color_attachment_refs = [0, 1].map(|attachment| {
            vk::AttachmentReference2::default()
                .attachment(attachment)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .aspect_mask(vk::ImageAspectFlags::COLOR)
        });

        let depth_attachment_ref = vk::AttachmentReference2::default()
            .attachment(2)
            .layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .aspect_mask(vk::ImageAspectFlags::DEPTH);

        let subpass = vk::SubpassDescription2::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)
            .depth_stencil_attachment(&depth_attachment_ref);

        let dependency = external_dependency();

        let render_pass_info = vk::RenderPassCreateInfo2::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        pass.handles.render_pass = unsafe {
            device
                .create_render_pass2(&render_pass_info, None)
                .map_err(|e| GBufferPassError::RenderPassCreationFailed(e.to_string()))?
        };

        let framebuffer_attachments = [
            pass.position_view,
            pass.normal_view,
            inputs.scene_depth.view(),
        ];

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(pass.handles.render_pass)
            .attachments(&framebuffer_attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        pass.handles.framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(|e| GBufferPassError::FramebufferCreationFailed(e.to_string()))?
        };

        let transform_binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_count(1)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .stage_flags(vk::ShaderStageFlags::VERTEX);

        let descriptor_set_layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(std::slice::from_ref(&transform_binding));

        pass.descriptor_set_layout = unsafe {
            device
                .create_descriptor_set_layout(&descriptor_set_layout_info, None)
                .map_err(|e| GBufferPassError::DescriptorSetLayoutCreationFailed(e.to_string()))?
        };

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
        };

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(std::slice::from_ref(&pool_size));

        pass.descriptor_pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| GBufferPassError::DescriptorPoolCreationFailed(e.to_string()))?
        };

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pass.descriptor_pool)
            .set_layouts(std::slice::from_ref(&pass.descriptor_set_layout));

        pass.handles.descriptor_set = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| GBufferPassError::DescriptorSetAllocationFailed(e.to_string()))?[0]
        };

        let transform_buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(pass.transform_buffer)
            .offset(0)
            .range(std::mem::size_of::<SceneTransformUbo>() as vk::DeviceSize);

        let transform_write = vk::WriteDescriptorSet::default()
            .dst_set(pass.handles.descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&transform_buffer_info));

        unsafe {
            device.update_descriptor_sets(&[transform_write], &[]);
        }

        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(&pass.descriptor_set_layout));

        pass.handles.pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(|e| GBufferPassError::PipelineLayoutCreationFailed(e.to_string()))?
        };

        let (vertex_bindings, vertex_attributes) = vertex_stream_layout(2);

        pass.handles.pipeline = create_graphics_pipeline(
            device,
            &PipelineDesc {
                shaders,
                vertex_bindings: &vertex_bindings,
                vertex_attributes: &vertex_attributes,
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                extent,
                depth_test: true,
                color_attachment_count: 2,
                layout: pass.handles.pipeline_layout,
                render_pass: pass.handles.render_pass,
            },
        )?;

        tracing::debug!("G-buffer pass created ({}x{})", extent.width, extent.height);

        Ok(pass)
    }

    pub fn position_view(&self) -> vk::ImageView {
        self.position_view
    }

    pub fn normal_view(&self) -> vk::ImageView {
        self.normal_view
    }

    pub fn record<C: CommandRecorder>(
        &self,
        recorder: &C,
        frame_context: &FrameContext,
        actors: &[SceneActor],
    ) {
        record_pass(
            recorder,
            frame_context,
            PassKind::GBuffer,
            &self.handles,
            &CLEAR_VALUES,
            actors,
        );
    }
}

impl Drop for GBufferPass {
    fn drop(&mut self) {
        wait_idle(&self.device, PassKind::GBuffer);

        unsafe {
            self.device.destroy_pipeline(self.handles.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.handles.pipeline_layout, None);

            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);

            self.device
                .destroy_framebuffer(self.handles.framebuffer, None);
            self.device
                .destroy_render_pass(self.handles.render_pass, None);

            self.device.destroy_buffer(self.transform_buffer, None);
            self.device.free_memory(self.transform_memory, None);

            self.device.destroy_image_view(self.normal_view, None);
            self.device.destroy_image_view(self.position_view, None);
            self.device.destroy_image(self.normal_image, None);
            self.device.destroy_image(self.position_image, None);
            self.device.free_memory(self.target_memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_targets_and_depth() {
        let clear_values = CLEAR_VALUES;

        unsafe {
            assert_eq!(clear_values[0].color.float32, CLEAR_COLOR);
            assert_eq!(clear_values[1].color.float32, [0.05, 0.05, 0.05, 1.0]);
            assert_eq!(clear_values[2].depth_stencil.depth, 1.0);
            assert_eq!(clear_values[2].depth_stencil.stencil, u32::MAX);
        }
    }
}
