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
    constants::{GBUFFER_FORMAT, RESULT_FORMAT},
    passes::{
        PassHandles, PassKind, PipelineDesc, PipelineError, color_clear, create_graphics_pipeline,
        create_image_view, full_area, gbuffer_pass::GBufferPass, image_2d_info, record_pass,
        shadow_map_pass::ShadowMapPass, wait_idle,
    },
    shader::PassShaders,
    uniforms::LightSpaceUbo,
};

const CLEAR_VALUES: [vk::ClearValue; 1] = [color_clear([0.0, 0.0, 0.0, 1.0])];

const LIGHT_SPACE_BINDING: u32 = 0;
const POSITION_BINDING: u32 = 1;
const NORMAL_BINDING: u32 = 2;
const SHADOW_MAP_BINDING: u32 = 3;

#[derive(Debug, Error)]
pub enum DeferredPassError {
    #[error("Failed to create result image: {0}")]
    CreateImageFailed(MemoryError),

    #[error("Failed to create image view: {0}")]
    CreateImageViewFailed(String),

    #[error("Failed to create sampler: {0}")]
    SamplerCreationFailed(String),

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

/// The producer passes whose outputs the composition reads.
pub struct DeferredInputs<'a> {
    pub gbuffer: &'a GBufferPass,
    pub shadow_map: &'a ShadowMapPass,
    pub extent: vk::Extent2D,
}

/// Lights the G-buffer with a single directional light and the variance
/// shadow map, writing into an image that is later blitted to the swapchain.
pub struct DeferredPass {
    device: ash::Device,

    result_image: vk::Image,
    result_memory: vk::DeviceMemory,
    result_view: vk::ImageView,
    result_extent: vk::Extent2D,

    shadow_map_sampler: vk::Sampler,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,

    handles: PassHandles,
}

impl DeferredPass {
    pub fn new(
        allocator: &MemoryAllocator,
        shaders: &PassShaders,
        inputs: DeferredInputs<'_>,
    ) -> Result<Self, DeferredPassError> {
        let device = allocator.device();
        let extent = inputs.extent;

        let mut pass = Self {
            device: device.clone(),
            result_image: vk::Image::null(),
            result_memory: vk::DeviceMemory::null(),
            result_view: vk::ImageView::null(),
            result_extent: extent,
            shadow_map_sampler: vk::Sampler::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            handles: PassHandles {
                render_area: full_area(extent),
                ..Default::default()
            },
        };

        let image_info = image_2d_info(
            RESULT_FORMAT,
            extent,
            1,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        );

        (pass.result_image, pass.result_memory) = allocator
            .create_image_with_memory(&image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .map_err(DeferredPassError::CreateImageFailed)?;

        pass.result_view = create_image_view(
            device,
            pass.result_image,
            RESULT_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )
        .map_err(|e| DeferredPassError::CreateImageViewFailed(e.to_string()))?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .anisotropy_enable(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(1.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        pass.shadow_map_sampler = unsafe {
            device
                .create_sampler(&sampler_info, None)
                .map_err(|e| DeferredPassError::SamplerCreationFailed(e.to_string()))?
        };

        let result_attachment = vk::AttachmentDescription2::default()
            .format(RESULT_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let gbuffer_attachment = vk::AttachmentDescription2::default()
            .format(GBUFFER_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::NONE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .final_layout(vk::ImageLayout::READ_ONLY_OPTIMAL);

        // Attachment order matches the framebuffer: result, position, normal.
        let attachments = [result_attachment, gbuffer_attachment, gbuffer_attachment];

        let color_attachment_ref = vk::AttachmentReference2::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .aspect_mask(vk::ImageAspectFlags::COLOR);

        let input_attachment_refs = [1, 2].map(|attachment| {
            vk::AttachmentReference2::default()
                .attachment(attachment)
                .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .aspect_mask(vk::ImageAspectFlags::COLOR)
        });

        let subpass = vk::SubpassDescription2::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .input_attachments(&input_attachment_refs)
            .color_attachments(std::slice::from_ref(&color_attachment_ref));

        let dependency = vk::SubpassDependency2::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(
                vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(
                vk::AccessFlags::INPUT_ATTACHMENT_READ
                    | vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            );

        let render_pass_info = vk::RenderPassCreateInfo2::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        pass.handles.render_pass = unsafe {
            device
                .create_render_pass2(&render_pass_info, None)
                .map_err(|e| DeferredPassError::RenderPassCreationFailed(e.to_string()))?
        };

        let position_view = inputs.gbuffer.position_view();
        let normal_view = inputs.gbuffer.normal_view();
        let framebuffer_attachments = [pass.result_view, position_view, normal_view];

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(pass.handles.render_pass)
            .attachments(&framebuffer_attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        pass.handles.framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(|e| DeferredPassError::FramebufferCreationFailed(e.to_string()))?
        };

        let bindings = [
            (LIGHT_SPACE_BINDING, vk::DescriptorType::UNIFORM_BUFFER),
            (POSITION_BINDING, vk::DescriptorType::INPUT_ATTACHMENT),
            (NORMAL_BINDING, vk::DescriptorType::INPUT_ATTACHMENT),
            (SHADOW_MAP_BINDING, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ]
        .map(|(binding, descriptor_type)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_count(1)
                .descriptor_type(descriptor_type)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        });

        let descriptor_set_layout_info =
            vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        pass.descriptor_set_layout = unsafe {
            device
                .create_descriptor_set_layout(&descriptor_set_layout_info, None)
                .map_err(|e| DeferredPassError::DescriptorSetLayoutCreationFailed(e.to_string()))?
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::INPUT_ATTACHMENT,
                descriptor_count: 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        pass.descriptor_pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| DeferredPassError::DescriptorPoolCreationFailed(e.to_string()))?
        };

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pass.descriptor_pool)
            .set_layouts(std::slice::from_ref(&pass.descriptor_set_layout));

        pass.handles.descriptor_set = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| DeferredPassError::DescriptorSetAllocationFailed(e.to_string()))?[0]
        };

        let light_space_info = vk::DescriptorBufferInfo::default()
            .buffer(inputs.shadow_map.light_space_buffer())
            .offset(0)
            .range(std::mem::size_of::<LightSpaceUbo>() as vk::DeviceSize);

        let position_info = vk::DescriptorImageInfo::default()
            .image_view(position_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let normal_info = vk::DescriptorImageInfo::default()
            .image_view(normal_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let shadow_map_info = vk::DescriptorImageInfo::default()
            .image_view(inputs.shadow_map.shadow_map_view())
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .sampler(pass.shadow_map_sampler);

        let descriptor_set = pass.handles.descriptor_set;
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(LIGHT_SPACE_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(&light_space_info)),
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(POSITION_BINDING)
                .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                .image_info(std::slice::from_ref(&position_info)),
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(NORMAL_BINDING)
                .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                .image_info(std::slice::from_ref(&normal_info)),
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(SHADOW_MAP_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(&shadow_map_info)),
        ];

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }

        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(&pass.descriptor_set_layout));

        pass.handles.pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(|e| DeferredPassError::PipelineLayoutCreationFailed(e.to_string()))?
        };

        // Full-screen quad generated in the vertex shader.
        pass.handles.pipeline = create_graphics_pipeline(
            device,
            &PipelineDesc {
                shaders,
                vertex_bindings: &[],
                vertex_attributes: &[],
                topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
                extent,
                depth_test: false,
                color_attachment_count: 1,
                layout: pass.handles.pipeline_layout,
                render_pass: pass.handles.render_pass,
            },
        )?;

        tracing::debug!("Deferred pass created ({}x{})", extent.width, extent.height);

        Ok(pass)
    }

    pub fn result_image(&self) -> vk::Image {
        self.result_image
    }

    pub fn result_extent(&self) -> vk::Extent2D {
        self.result_extent
    }

    pub fn record<C: CommandRecorder>(&self, recorder: &C, frame_context: &FrameContext) {
        record_pass(
            recorder,
            frame_context,
            PassKind::Deferred,
            &self.handles,
            &CLEAR_VALUES,
            &[],
        );
    }
}

impl Drop for DeferredPass {
    fn drop(&mut self) {
        wait_idle(&self.device, PassKind::Deferred);

        unsafe {
            self.device.destroy_pipeline(self.handles.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.handles.pipeline_layout, None);

            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.device.destroy_sampler(self.shadow_map_sampler, None);

            self.device
                .destroy_framebuffer(self.handles.framebuffer, None);
            self.device
                .destroy_render_pass(self.handles.render_pass, None);

            self.device.destroy_image_view(self.result_view, None);
            self.device.destroy_image(self.result_image, None);
            self.device.free_memory(self.result_memory, None);
        }
    }
}
