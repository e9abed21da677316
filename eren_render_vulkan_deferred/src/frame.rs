use ash::vk;
use eren_render_vulkan_core::{
    context::GraphicsContext,
    renderer::{FrameContext, Renderer},
    vulkan::{
        command::{CommandBufferManager, CommandBufferManagerError},
        recorder::CommandRecorder,
        swapchain::SwapchainManagerError,
        sync::{FrameFence, FrameSync, FrameSyncError},
    },
};
use thiserror::Error;

use crate::{renderer::DeferredRenderer, scene::SceneActor};

const TRANSITION_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::ALL_GRAPHICS.as_raw() | vk::PipelineStageFlags2::ALL_TRANSFER.as_raw(),
);

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Sync(#[from] FrameSyncError),

    #[error(transparent)]
    CommandBuffer(#[from] CommandBufferManagerError),

    #[error(transparent)]
    Swapchain(#[from] SwapchainManagerError),

    #[error("Failed to submit frame: {0}")]
    SubmitFailed(String),
}

/// An image and the extent of its level 0.
#[derive(Debug, Clone, Copy)]
pub struct BlitTarget {
    pub image: vk::Image,
    pub extent: vk::Extent2D,
}

/// Drives one frame at a time: wait, acquire, record, submit, present.
pub struct FrameOrchestrator {
    device: ash::Device,
    sync: FrameSync,
    commands: CommandBufferManager,
}

impl FrameOrchestrator {
    pub fn new(context: &GraphicsContext) -> Result<Self, FrameError> {
        let commands =
            CommandBufferManager::new(context.device(), context.graphics_queue_family_index())?;
        let sync = FrameSync::new(context.device())?;

        Ok(Self {
            device: context.device().clone(),
            sync,
            commands,
        })
    }

    pub fn draw_frame(
        &self,
        context: &GraphicsContext,
        renderer: &DeferredRenderer,
        actors: &[SceneActor],
    ) -> Result<(), FrameError> {
        let swapchain = context.swapchain();
        let image_index = acquire_frame(&self.sync, || {
            swapchain.acquire_next_image(self.sync.image_available)
        })?;

        self.commands.reset_and_begin()?;

        let frame_context = FrameContext {
            command_buffer: self.commands.command_buffer,
            image_index,
        };
        let device = context.device();

        renderer.render(device, &frame_context, actors);

        record_present_blit(
            device,
            frame_context.command_buffer,
            BlitTarget {
                image: renderer.result_image(),
                extent: renderer.result_extent(),
            },
            BlitTarget {
                image: swapchain.swapchain_images[image_index as usize],
                extent: swapchain.image_extent,
            },
        );

        self.commands.end()?;

        let wait_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.sync.image_available)
            .stage_mask(
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT | TRANSITION_STAGES,
            );
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.sync.render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let command_buffer_info =
            vk::CommandBufferSubmitInfo::default().command_buffer(frame_context.command_buffer);

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(std::slice::from_ref(&wait_info))
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info))
            .signal_semaphore_infos(std::slice::from_ref(&signal_info));

        unsafe {
            device
                .queue_submit2(
                    context.graphics_queue(),
                    std::slice::from_ref(&submit_info),
                    self.sync.in_flight,
                )
                .map_err(|e| FrameError::SubmitFailed(e.to_string()))?;
        }

        swapchain.present(context.present_queue(), image_index, self.sync.render_finished)?;

        Ok(())
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        // The last submission may still be using the semaphores.
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            tracing::error!("Failed to wait for the last frame: {}", e);
        }
    }
}

/// Waits for the previous frame and acquires the next image. The fence is
/// re-armed only once the acquire succeeded, so a failed acquire never leaves
/// it unsignalled with no submission pending.
fn acquire_frame<F: FrameFence>(
    fence: &F,
    acquire: impl FnOnce() -> Result<u32, SwapchainManagerError>,
) -> Result<u32, FrameError> {
    fence.wait()?;
    let image_index = acquire()?;
    fence.reset()?;
    Ok(image_index)
}

fn layout_transition(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(TRANSITION_STAGES)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(TRANSITION_STAGES)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}

fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

/// Copies the composed image into the acquired swapchain image and leaves the
/// latter ready for presentation.
pub fn record_present_blit<C: CommandRecorder>(
    recorder: &C,
    command_buffer: vk::CommandBuffer,
    source: BlitTarget,
    swapchain_image: BlitTarget,
) {
    recorder.image_barriers(
        command_buffer,
        &[
            layout_transition(
                source.image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            layout_transition(
                swapchain_image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        ],
    );

    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    let region = vk::ImageBlit::default()
        .src_subresource(layers)
        .src_offsets([vk::Offset3D::default(), far_corner(source.extent)])
        .dst_subresource(layers)
        .dst_offsets([vk::Offset3D::default(), far_corner(swapchain_image.extent)]);

    recorder.blit_image(
        command_buffer,
        source.image,
        swapchain_image.image,
        &region,
        vk::Filter::NEAREST,
    );

    recorder.image_barriers(
        command_buffer,
        &[layout_transition(
            swapchain_image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )],
    );
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ash::vk::Handle;
    use eren_render_vulkan_core::vulkan::recorder::{CommandLog, ImageTransition, RecordedCommand};
    use pretty_assertions::assert_eq;

    use super::*;

    fn transition(image: u64, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> ImageTransition {
        ImageTransition {
            image: vk::Image::from_raw(image),
            old_layout,
            new_layout,
            src_stage_mask: TRANSITION_STAGES,
            dst_stage_mask: TRANSITION_STAGES,
        }
    }

    #[test]
    fn blit_is_fenced_by_layout_transitions() {
        let log = CommandLog::new();

        record_present_blit(
            &log,
            vk::CommandBuffer::null(),
            BlitTarget {
                image: vk::Image::from_raw(1),
                extent: vk::Extent2D {
                    width: 1280,
                    height: 720,
                },
            },
            BlitTarget {
                image: vk::Image::from_raw(2),
                extent: vk::Extent2D {
                    width: 1600,
                    height: 900,
                },
            },
        );

        assert_eq!(
            log.commands(),
            vec![
                RecordedCommand::ImageBarriers(vec![
                    transition(
                        1,
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
                    ),
                    transition(
                        2,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL
                    ),
                ]),
                RecordedCommand::BlitImage {
                    src_image: vk::Image::from_raw(1),
                    dst_image: vk::Image::from_raw(2),
                    src_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: 1280,
                            y: 720,
                            z: 1
                        }
                    ],
                    dst_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: 1600,
                            y: 900,
                            z: 1
                        }
                    ],
                    filter: vk::Filter::NEAREST,
                },
                RecordedCommand::ImageBarriers(vec![transition(
                    2,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR
                )]),
            ]
        );
    }

    #[test]
    fn transitions_publish_all_writes() {
        let barrier = layout_transition(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        assert!(barrier.src_stage_mask.contains(vk::PipelineStageFlags2::ALL_GRAPHICS));
        assert!(barrier.dst_stage_mask.contains(vk::PipelineStageFlags2::ALL_TRANSFER));
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::MEMORY_WRITE);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FenceEvent {
        Wait,
        Acquire,
        Reset,
    }

    #[derive(Default)]
    struct FenceLog(RefCell<Vec<FenceEvent>>);

    impl FenceLog {
        fn push(&self, event: FenceEvent) {
            self.0.borrow_mut().push(event);
        }

        fn events(&self) -> Vec<FenceEvent> {
            self.0.borrow().clone()
        }
    }

    impl FrameFence for FenceLog {
        fn wait(&self) -> Result<(), FrameSyncError> {
            self.push(FenceEvent::Wait);
            Ok(())
        }

        fn reset(&self) -> Result<(), FrameSyncError> {
            self.push(FenceEvent::Reset);
            Ok(())
        }
    }

    #[test]
    fn fence_is_reset_after_a_successful_acquire() {
        let fence = FenceLog::default();

        let image_index = acquire_frame(&fence, || {
            fence.push(FenceEvent::Acquire);
            Ok(2)
        })
        .unwrap();

        assert_eq!(image_index, 2);
        assert_eq!(
            fence.events(),
            vec![FenceEvent::Wait, FenceEvent::Acquire, FenceEvent::Reset]
        );
    }

    #[test]
    fn failed_acquire_leaves_fence_signalled() {
        let fence = FenceLog::default();

        let result = acquire_frame(&fence, || {
            fence.push(FenceEvent::Acquire);
            Err(SwapchainManagerError::AcquireImageFailed(
                vk::Result::ERROR_OUT_OF_DATE_KHR.to_string(),
            ))
        });

        assert!(matches!(
            result,
            Err(FrameError::Swapchain(SwapchainManagerError::AcquireImageFailed(_)))
        ));
        assert_eq!(fence.events(), vec![FenceEvent::Wait, FenceEvent::Acquire]);
    }
}
