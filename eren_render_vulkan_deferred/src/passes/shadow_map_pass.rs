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
    config::ShadowProjection,
    constants::{CLEAR_COLOR, DEPTH_FORMAT, SHADOW_MAP_FORMAT, SHADOW_MAP_SIZE, mip_level_count},
    passes::{
        AttachmentError, DepthAttachment, PassHandles, PassKind, PipelineDesc, PipelineError,
        color_clear, create_graphics_pipeline, create_image_view, create_uniform_buffer,
        external_dependency, full_area, image_2d_info, record_pass, vertex_stream_layout,
        wait_idle,
    },
    scene::SceneActor,
    shader::PassShaders,
    uniforms::LightSpaceUbo,
};

const SHADOW_MAP_EXTENT: vk::Extent2D = vk::Extent2D {
    width: SHADOW_MAP_SIZE,
    height: SHADOW_MAP_SIZE,
};

const CLEAR_VALUES: [vk::ClearValue; 2] = [
    color_clear(CLEAR_COLOR),
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: u32::MAX,
        },
    },
];

#[derive(Debug, Error)]
pub enum ShadowMapPassError {
    #[error("Failed to create shadow map: {0}")]
    CreateImageFailed(MemoryError),

    #[error("Failed to create image view: {0}")]
    CreateImageViewFailed(String),

    #[error("Failed to create shadow depth buffer: {0}")]
    CreateDepthFailed(#[from] AttachmentError),

    #[error("Failed to create light-space buffer: {0}")]
    CreateBufferFailed(MemoryError),

    #[error("Failed to create render pass: {0}")]
    CreateRenderPassFailed(String),

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

/// Renders first and second depth moments from the light into a variance
/// shadow map. Only mip level 0 is ever written.
pub struct ShadowMapPass {
    device: ash::Device,

    shadow_map_image: vk::Image,
    shadow_map_memory: vk::DeviceMemory,
    shadow_map_view: vk::ImageView,
    depth: Option<DepthAttachment>,

    light_space_buffer: vk::Buffer,
    light_space_memory: vk::DeviceMemory,

    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,

    handles: PassHandles,
}

impl ShadowMapPass {
    pub fn new(
        allocator: &MemoryAllocator,
        shaders: &PassShaders,
        projection: ShadowProjection,
    ) -> Result<Self, ShadowMapPassError> {
        let device = allocator.device();

        let mut pass = Self {
            device: device.clone(),
            shadow_map_image: vk::Image::null(),
            shadow_map_memory: vk::DeviceMemory::null(),
            shadow_map_view: vk::ImageView::null(),
            depth: None,
            light_space_buffer: vk::Buffer::null(),
            light_space_memory: vk::DeviceMemory::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            handles: PassHandles {
                render_area: full_area(SHADOW_MAP_EXTENT),
                ..Default::default()
            },
        };

        let image_info = image_2d_info(
            SHADOW_MAP_FORMAT,
            SHADOW_MAP_EXTENT,
            mip_level_count(SHADOW_MAP_SIZE),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        );

        (pass.shadow_map_image, pass.shadow_map_memory) = allocator
            .create_image_with_memory(&image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .map_err(ShadowMapPassError::CreateImageFailed)?;

        pass.shadow_map_view = create_image_view(
            device,
            pass.shadow_map_image,
            SHADOW_MAP_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )
        .map_err(|e| ShadowMapPassError::CreateImageViewFailed(e.to_string()))?;

        let depth = pass
            .depth
            .insert(DepthAttachment::new(allocator, DEPTH_FORMAT, SHADOW_MAP_EXTENT)?);
        let depth_view = depth.view();

        let light_space = LightSpaceUbo::new(projection);
        (pass.light_space_buffer, pass.light_space_memory) =
            create_uniform_buffer(allocator, &light_space)
                .map_err(ShadowMapPassError::CreateBufferFailed)?;

        let shadow_map_attachment = vk::AttachmentDescription2::default()
            .format(SHADOW_MAP_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let depth_attachment = vk::AttachmentDescription2::default()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);

        let attachments = [shadow_map_attachment, depth_attachment];

        let color_attachment_ref = vk::AttachmentReference2::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .aspect_mask(vk::ImageAspectFlags::COLOR);

        let depth_attachment_ref = vk::AttachmentReference2::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .aspect_mask(vk::ImageAspectFlags::DEPTH);

        let subpass = vk::SubpassDescription2::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_attachment_ref))
            .depth_stencil_attachment(&depth_attachment_ref);

        let dependency = external_dependency();

        let render_pass_info = vk::RenderPassCreateInfo2::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        pass.handles.render_pass = unsafe {
            device
                .create_render_pass2(&render_pass_info, None)
                .map_err(|e| ShadowMapPassError::CreateRenderPassFailed(e.to_string()))?
        };

        let framebuffer_attachments = [pass.shadow_map_view, depth_view];

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(pass.handles.render_pass)
            .attachments(&framebuffer_attachments)
            .width(SHADOW_MAP_SIZE)
            .height(SHADOW_MAP_SIZE)
            .layers(1);

        pass.handles.framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(|e| ShadowMapPassError::FramebufferCreationFailed(e.to_string()))?
        };

        let light_space_binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_count(1)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .stage_flags(vk::ShaderStageFlags::VERTEX);

        let descriptor_set_layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(std::slice::from_ref(&light_space_binding));

        pass.descriptor_set_layout = unsafe {
            device
                .create_descriptor_set_layout(&descriptor_set_layout_info, None)
                .map_err(|e| ShadowMapPassError::DescriptorSetLayoutCreationFailed(e.to_string()))?
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
                .map_err(|e| ShadowMapPassError::DescriptorPoolCreationFailed(e.to_string()))?
        };

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pass.descriptor_pool)
            .set_layouts(std::slice::from_ref(&pass.descriptor_set_layout));

        pass.handles.descriptor_set = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| ShadowMapPassError::DescriptorSetAllocationFailed(e.to_string()))?[0]
        };

        let light_space_buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(pass.light_space_buffer)
            .offset(0)
            .range(std::mem::size_of::<LightSpaceUbo>() as vk::DeviceSize);

        let light_space_write = vk::WriteDescriptorSet::default()
            .dst_set(pass.handles.descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&light_space_buffer_info));

        unsafe {
            device.update_descriptor_sets(&[light_space_write], &[]);
        }

        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(&pass.descriptor_set_layout));

        pass.handles.pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(|e| ShadowMapPassError::PipelineLayoutCreationFailed(e.to_string()))?
        };

        let (vertex_bindings, vertex_attributes) = vertex_stream_layout(1);

        pass.handles.pipeline = create_graphics_pipeline(
            device,
            &PipelineDesc {
                shaders,
                vertex_bindings: &vertex_bindings,
                vertex_attributes: &vertex_attributes,
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                extent: SHADOW_MAP_EXTENT,
                depth_test: true,
                color_attachment_count: 1,
                layout: pass.handles.pipeline_layout,
                render_pass: pass.handles.render_pass,
            },
        )?;

        tracing::debug!(
            "Shadow map pass created ({}x{}, {:?} projection)",
            SHADOW_MAP_SIZE,
            SHADOW_MAP_SIZE,
            projection
        );

        Ok(pass)
    }

    pub fn light_space_buffer(&self) -> vk::Buffer {
        self.light_space_buffer
    }

    pub fn shadow_map_view(&self) -> vk::ImageView {
        self.shadow_map_view
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
            PassKind::ShadowMap,
            &self.handles,
            &CLEAR_VALUES,
            actors,
        );
    }
}

impl Drop for ShadowMapPass {
    fn drop(&mut self) {
        wait_idle(&self.device, PassKind::ShadowMap);

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

            self.device.destroy_buffer(self.light_space_buffer, None);
            self.device.free_memory(self.light_space_memory, None);
        }

        self.depth = None;

        unsafe {
            self.device.destroy_image_view(self.shadow_map_view, None);
            self.device.destroy_image(self.shadow_map_image, None);
            self.device.free_memory(self.shadow_map_memory, None);
        }
    }
}
