use std::{ffi::CStr, fmt};

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
    scene::SceneActor,
    shader::{PassShaders, create_shader_module},
};

pub mod deferred_pass;
pub mod gbuffer_pass;
pub mod shadow_map_pass;

const SHADER_ENTRY_POINT: &CStr = c"main";

/// The three passes of a frame, in recording order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    GBuffer,
    ShadowMap,
    Deferred,
}

impl PassKind {
    pub const RECORDING_ORDER: [PassKind; 3] =
        [PassKind::GBuffer, PassKind::ShadowMap, PassKind::Deferred];

    /// Vertex and fragment SPIR-V file names.
    pub fn shader_file_names(self) -> (&'static str, &'static str) {
        match self {
            PassKind::GBuffer => (
                "gbuffer_generation_pass_vert.spv",
                "gbuffer_generation_pass_frag.spv",
            ),
            PassKind::ShadowMap => (
                "shadow_map_generation_vert.spv",
                "shadow_map_generation_frag.spv",
            ),
            PassKind::Deferred => (
                "deferred_shading_pass_vert.spv",
                "deferred_shading_pass_frag.spv",
            ),
        }
    }

    /// Buffers bound per actor, starting at binding 0.
    fn actor_buffers(self, actor: &SceneActor) -> Option<&[vk::Buffer]> {
        match self {
            PassKind::GBuffer => Some(&actor.vertex_buffers[..]),
            PassKind::ShadowMap => Some(&actor.vertex_buffers[..1]),
            PassKind::Deferred => None,
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassKind::GBuffer => "G-buffer",
            PassKind::ShadowMap => "shadow map",
            PassKind::Deferred => "deferred shading",
        };
        f.write_str(name)
    }
}

/// Handles a pass needs at record time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassHandles {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub descriptor_set: vk::DescriptorSet,
}

/// Begins the render pass, binds pipeline and descriptor set once, issues the
/// draws `kind` calls for and ends the render pass.
///
/// Actors are drawn in slice order. The deferred pass ignores them and draws
/// a single four-vertex strip.
pub fn record_pass<C: CommandRecorder>(
    recorder: &C,
    frame_context: &FrameContext,
    kind: PassKind,
    handles: &PassHandles,
    clear_values: &[vk::ClearValue],
    actors: &[SceneActor],
) {
    let command_buffer = frame_context.command_buffer;

    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(handles.render_pass)
        .framebuffer(handles.framebuffer)
        .render_area(handles.render_area)
        .clear_values(clear_values);

    recorder.begin_render_pass(command_buffer, &begin_info);
    recorder.bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, handles.pipeline);
    recorder.bind_descriptor_sets(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        handles.pipeline_layout,
        std::slice::from_ref(&handles.descriptor_set),
    );

    match kind {
        PassKind::GBuffer | PassKind::ShadowMap => {
            for actor in actors {
                if let Some(buffers) = kind.actor_buffers(actor) {
                    let offsets = [0; 2];
                    recorder.bind_vertex_buffers(command_buffer, 0, buffers, &offsets[..buffers.len()]);
                    recorder.draw(command_buffer, actor.vertex_count, 1, 0, 0);
                }
            }
        }
        PassKind::Deferred => {
            recorder.draw(command_buffer, 4, 1, 0, 0);
        }
    }

    recorder.end_render_pass(command_buffer);
}

pub(crate) fn full_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D::default()
        .offset(vk::Offset2D::default())
        .extent(extent)
}

pub(crate) const fn color_clear(color: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }
}

/// Dependency that orders the pass after earlier attachment writes.
pub(crate) fn external_dependency() -> vk::SubpassDependency2<'static> {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let access =
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

    vk::SubpassDependency2::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .src_access_mask(access)
        .dst_access_mask(access)
}

pub(crate) fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView, vk::Result> {
    let image_view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    unsafe { device.create_image_view(&image_view_info, None) }
}

pub(crate) fn image_2d_info(
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
    usage: vk::ImageUsageFlags,
) -> vk::ImageCreateInfo<'static> {
    vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(mip_levels)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

/// Creates a HOST_VISIBLE uniform buffer holding `value`.
pub(crate) fn create_uniform_buffer<T: bytemuck::Pod>(
    allocator: &MemoryAllocator,
    value: &T,
) -> Result<(vk::Buffer, vk::DeviceMemory), MemoryError> {
    let bytes = bytemuck::bytes_of(value);
    let size = bytes.len() as vk::DeviceSize;

    let (buffer, memory) = allocator.create_buffer_with_memory(
        size,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE,
    )?;

    if let Err(e) = allocator.write_host_visible(memory, size, &[(0, bytes)]) {
        unsafe {
            allocator.device().destroy_buffer(buffer, None);
            allocator.device().free_memory(memory, None);
        }
        return Err(e);
    }

    Ok((buffer, memory))
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Failed to create attachment image: {0}")]
    CreateImageFailed(#[from] MemoryError),

    #[error("Failed to create attachment view: {0}")]
    CreateImageViewFailed(String),
}

/// A single-sampled `D32_SFLOAT` depth buffer with its view.
pub struct DepthAttachment {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
}

impl DepthAttachment {
    pub fn new(
        allocator: &MemoryAllocator,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self, AttachmentError> {
        let image_info = image_2d_info(
            format,
            extent,
            1,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        let (image, memory) = allocator
            .create_image_with_memory(&image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let device = allocator.device().clone();
        let view = match create_image_view(&device, image, format, vk::ImageAspectFlags::DEPTH) {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(AttachmentError::CreateImageViewFailed(e.to_string()));
            }
        };

        tracing::debug!("Depth attachment {}x{} created", extent.width, extent.height);

        Ok(Self {
            device,
            image,
            memory,
            view,
            format,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for DepthAttachment {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to create shader module: {0}")]
    ShaderModuleCreationFailed(String),

    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
}

/// Fixed-function state that differs between the three passes.
pub(crate) struct PipelineDesc<'a> {
    pub shaders: &'a PassShaders,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub topology: vk::PrimitiveTopology,
    pub extent: vk::Extent2D,
    pub depth_test: bool,
    pub color_attachment_count: usize,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
}

pub(crate) fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
) -> Result<vk::Pipeline, PipelineError> {
    let vertex_shader_module = create_shader_module(device, &desc.shaders.vertex)
        .map_err(|e| PipelineError::ShaderModuleCreationFailed(e.to_string()))?;

    let fragment_shader_module = match create_shader_module(device, &desc.shaders.fragment) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.destroy_shader_module(vertex_shader_module, None) };
            return Err(PipelineError::ShaderModuleCreationFailed(e.to_string()));
        }
    };

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_shader_module)
            .name(SHADER_ENTRY_POINT),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_shader_module)
            .name(SHADER_ENTRY_POINT),
    ];

    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(desc.vertex_bindings)
        .vertex_attribute_descriptions(desc.vertex_attributes);

    let input_assembly_info =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology);

    let viewport = vk::Viewport {
        x: 0.,
        y: 0.,
        width: desc.extent.width as f32,
        height: desc.extent.height as f32,
        min_depth: 0.,
        max_depth: 1.,
    };

    let scissors = full_area(desc.extent);

    let viewport_info = vk::PipelineViewportStateCreateInfo::default()
        .viewports(std::slice::from_ref(&viewport))
        .scissors(std::slice::from_ref(&scissors));

    let rasterizer_info = vk::PipelineRasterizationStateCreateInfo::default()
        .line_width(1.0)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .cull_mode(vk::CullModeFlags::NONE)
        .polygon_mode(vk::PolygonMode::FILL);

    let multisampler_info = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_test)
        .depth_compare_op(vk::CompareOp::LESS)
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    let color_blend_attachments = vec![color_blend_attachment; desc.color_attachment_count];

    let color_blend_info =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly_info)
        .viewport_state(&viewport_info)
        .rasterization_state(&rasterizer_info)
        .multisample_state(&multisampler_info)
        .depth_stencil_state(&depth_stencil_info)
        .color_blend_state(&color_blend_info)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(0);

    let pipeline = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    unsafe {
        device.destroy_shader_module(vertex_shader_module, None);
        device.destroy_shader_module(fragment_shader_module, None);
    }

    pipeline
        .map(|pipelines| pipelines[0])
        .map_err(|(_, e)| PipelineError::PipelineCreationFailed(e.to_string()))
}

/// Position and normal streams, one tightly packed `vec3` per vertex each.
pub(crate) fn vertex_stream_layout(
    streams: u32,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    (0..streams)
        .map(|binding| {
            (
                vk::VertexInputBindingDescription {
                    binding,
                    stride: std::mem::size_of::<[f32; 3]>() as u32,
                    input_rate: vk::VertexInputRate::VERTEX,
                },
                vk::VertexInputAttributeDescription {
                    location: binding,
                    binding,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 0,
                },
            )
        })
        .unzip()
}

pub(crate) fn wait_idle(device: &ash::Device, what: PassKind) {
    if let Err(e) = unsafe { device.device_wait_idle() } {
        tracing::error!("Failed to wait for device idle before destroying {} pass: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use eren_render_vulkan_core::vulkan::recorder::{CommandLog, RecordedCommand};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{constants::CLEAR_COLOR, scene::SceneActor};

    fn handles(seed: u64) -> PassHandles {
        PassHandles {
            render_pass: vk::RenderPass::from_raw(seed),
            framebuffer: vk::Framebuffer::from_raw(seed + 1),
            render_area: full_area(vk::Extent2D {
                width: 1280,
                height: 720,
            }),
            pipeline_layout: vk::PipelineLayout::from_raw(seed + 2),
            pipeline: vk::Pipeline::from_raw(seed + 3),
            descriptor_set: vk::DescriptorSet::from_raw(seed + 4),
        }
    }

    fn actor(name: &str, first_buffer: u64, vertex_count: u32) -> SceneActor {
        SceneActor {
            name: name.to_string(),
            vertex_buffers: [
                vk::Buffer::from_raw(first_buffer),
                vk::Buffer::from_raw(first_buffer + 1),
            ],
            memory: vk::DeviceMemory::null(),
            vertex_count,
        }
    }

    fn frame() -> FrameContext {
        FrameContext {
            command_buffer: vk::CommandBuffer::null(),
            image_index: 0,
        }
    }

    #[test]
    fn gbuffer_draws_each_actor_with_both_streams() {
        let log = CommandLog::new();
        let actors = [actor("cube", 10, 36), actor("plane", 20, 6)];
        let clear_values = [color_clear(CLEAR_COLOR); 3];

        record_pass(&log, &frame(), PassKind::GBuffer, &handles(100), &clear_values, &actors);

        assert_eq!(
            log.commands(),
            vec![
                RecordedCommand::BeginRenderPass {
                    render_pass: vk::RenderPass::from_raw(100),
                    framebuffer: vk::Framebuffer::from_raw(101),
                    extent: vk::Extent2D {
                        width: 1280,
                        height: 720
                    },
                    clear_value_count: 3,
                },
                RecordedCommand::BindPipeline(vk::Pipeline::from_raw(103)),
                RecordedCommand::BindDescriptorSets(vec![vk::DescriptorSet::from_raw(104)]),
                RecordedCommand::BindVertexBuffers {
                    first_binding: 0,
                    buffers: vec![vk::Buffer::from_raw(10), vk::Buffer::from_raw(11)],
                },
                RecordedCommand::Draw {
                    vertex_count: 36,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
                RecordedCommand::BindVertexBuffers {
                    first_binding: 0,
                    buffers: vec![vk::Buffer::from_raw(20), vk::Buffer::from_raw(21)],
                },
                RecordedCommand::Draw {
                    vertex_count: 6,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
                RecordedCommand::EndRenderPass,
            ]
        );
    }

    #[test]
    fn shadow_map_binds_positions_only() {
        let log = CommandLog::new();
        let actors = [actor("cube", 10, 36)];

        record_pass(&log, &frame(), PassKind::ShadowMap, &handles(200), &[], &actors);

        assert!(log.commands().contains(&RecordedCommand::BindVertexBuffers {
            first_binding: 0,
            buffers: vec![vk::Buffer::from_raw(10)],
        }));
        assert_eq!(log.draws(), vec![(36, 1, 0, 0)]);
    }

    #[test]
    fn deferred_draws_one_strip_regardless_of_actors() {
        for actor_count in [0, 1, 5] {
            let log = CommandLog::new();
            let actors: Vec<SceneActor> = (0..actor_count)
                .map(|i| actor("a", 10 * (i as u64 + 1), 3))
                .collect();

            record_pass(&log, &frame(), PassKind::Deferred, &handles(300), &[], &actors);

            assert_eq!(log.draws(), vec![(4, 1, 0, 0)]);
            assert!(
                !log.commands()
                    .iter()
                    .any(|c| matches!(c, RecordedCommand::BindVertexBuffers { .. }))
            );
        }
    }

    #[test]
    fn empty_scene_still_begins_and_ends_each_pass() {
        let log = CommandLog::new();

        record_pass(&log, &frame(), PassKind::GBuffer, &handles(1), &[], &[]);

        let commands = log.commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands.last(), Some(&RecordedCommand::EndRenderPass));
        assert!(log.draws().is_empty());
    }

    #[test]
    fn two_object_frame_issues_five_draws() {
        let log = CommandLog::new();
        let actors = [actor("cube", 10, 36), actor("plane", 20, 6)];

        for (i, kind) in PassKind::RECORDING_ORDER.into_iter().enumerate() {
            record_pass(&log, &frame(), kind, &handles(100 * i as u64 + 100), &[], &actors);
        }

        assert_eq!(
            log.draws(),
            vec![
                (36, 1, 0, 0),
                (6, 1, 0, 0),
                (36, 1, 0, 0),
                (6, 1, 0, 0),
                (4, 1, 0, 0)
            ]
        );
    }

    #[test]
    fn vertex_streams_are_packed_vec3() {
        let (bindings, attributes) = vertex_stream_layout(2);

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].stride, 12);
        assert_eq!(attributes[1].location, 1);
        assert_eq!(attributes[0].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn shader_names_follow_pass() {
        assert_eq!(
            PassKind::ShadowMap.shader_file_names().0,
            "shadow_map_generation_vert.spv"
        );
        assert_eq!(PassKind::Deferred.to_string(), "deferred shading");
    }
}
