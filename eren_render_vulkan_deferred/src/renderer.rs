use ash::vk;
use eren_render_vulkan_core::{
    context::GraphicsContext,
    renderer::{FrameContext, Renderer},
    vulkan::recorder::CommandRecorder,
};
use thiserror::Error;

use crate::{
    config::RendererConfig,
    constants::{DEPTH_FORMAT, RENDER_EXTENT},
    passes::{
        AttachmentError, DepthAttachment, PassKind,
        deferred_pass::{DeferredInputs, DeferredPass, DeferredPassError},
        gbuffer_pass::{GBufferInputs, GBufferPass, GBufferPassError},
        shadow_map_pass::{ShadowMapPass, ShadowMapPassError},
    },
    scene::SceneActor,
    shader::{PassShaders, ShaderError},
};

#[derive(Debug, Error)]
pub enum DeferredRendererError {
    #[error("Failed to load shaders: {0}")]
    ShaderLoadFailed(#[from] ShaderError),

    #[error("Failed to create scene depth buffer: {0}")]
    SceneDepthCreationFailed(#[from] AttachmentError),

    #[error("Failed to create G-buffer pass: {0}")]
    GBufferPassCreationFailed(#[from] GBufferPassError),

    #[error("Failed to create shadow map pass: {0}")]
    ShadowMapPassCreationFailed(#[from] ShadowMapPassError),

    #[error("Failed to create deferred pass: {0}")]
    DeferredPassCreationFailed(#[from] DeferredPassError),
}

/// The three passes of a frame plus the depth buffer they share.
///
/// Consumers are declared before producers so they are dropped first.
pub struct DeferredRenderer {
    deferred_pass: DeferredPass,
    shadow_map_pass: ShadowMapPass,
    gbuffer_pass: GBufferPass,
    scene_depth: DepthAttachment,
}

impl DeferredRenderer {
    pub fn new(
        context: &GraphicsContext,
        config: &RendererConfig,
    ) -> Result<Self, DeferredRendererError> {
        let gbuffer_shaders = PassShaders::load(&config.shader_dir, PassKind::GBuffer)?;
        let shadow_map_shaders = PassShaders::load(&config.shader_dir, PassKind::ShadowMap)?;
        let deferred_shaders = PassShaders::load(&config.shader_dir, PassKind::Deferred)?;

        let allocator = context.allocator();

        let scene_depth = DepthAttachment::new(allocator, DEPTH_FORMAT, RENDER_EXTENT)?;

        let gbuffer_pass = GBufferPass::new(
            allocator,
            &gbuffer_shaders,
            GBufferInputs {
                scene_depth: &scene_depth,
                extent: RENDER_EXTENT,
            },
        )?;

        let shadow_map_pass =
            ShadowMapPass::new(allocator, &shadow_map_shaders, config.shadow_projection)?;

        let deferred_pass = DeferredPass::new(
            allocator,
            &deferred_shaders,
            DeferredInputs {
                gbuffer: &gbuffer_pass,
                shadow_map: &shadow_map_pass,
                extent: RENDER_EXTENT,
            },
        )?;

        tracing::info!("Deferred renderer ready");

        Ok(Self {
            deferred_pass,
            shadow_map_pass,
            gbuffer_pass,
            scene_depth,
        })
    }

    pub fn result_image(&self) -> vk::Image {
        self.deferred_pass.result_image()
    }

    pub fn result_extent(&self) -> vk::Extent2D {
        self.deferred_pass.result_extent()
    }
}

impl Renderer<SceneActor> for DeferredRenderer {
    fn render<C: CommandRecorder>(
        &self,
        recorder: &C,
        frame_context: &FrameContext,
        actors: &[SceneActor],
    ) {
        for kind in PassKind::RECORDING_ORDER {
            match kind {
                PassKind::GBuffer => self.gbuffer_pass.record(recorder, frame_context, actors),
                PassKind::ShadowMap => self.shadow_map_pass.record(recorder, frame_context, actors),
                PassKind::Deferred => self.deferred_pass.record(recorder, frame_context),
            }
        }
    }
}
