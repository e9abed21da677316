use std::time::Instant;

use ash::vk;
use eren_render_vulkan_core::vulkan::memory::{MemoryAllocator, MemoryError};
use eren_wavefront::{error::WavefrontError, loader::WavefrontScene, object::WavefrontObject};
use thiserror::Error;

use crate::config::RendererConfig;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    Load(#[from] WavefrontError),

    #[error("Failed to upload object '{name}': {source}")]
    UploadFailed {
        name: String,
        #[source]
        source: MemoryError,
    },

    #[error("Object '{name}' has {count} vertices, more than a single draw can address")]
    TooManyVertices { name: String, count: usize },
}

/// GPU copy of one scene object: position and normal streams placed in a
/// single allocation.
#[derive(Debug)]
pub struct SceneActor {
    pub name: String,
    /// Positions at binding 0, normals at binding 1.
    pub vertex_buffers: [vk::Buffer; 2],
    pub memory: vk::DeviceMemory,
    pub vertex_count: u32,
}

/// Byte views of an object's vertex streams, ready to copy into mapped memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActorUpload<'a> {
    pub name: &'a str,
    pub positions: &'a [u8],
    pub normals: &'a [u8],
    pub vertex_count: u32,
}

impl<'a> ActorUpload<'a> {
    /// `None` for objects without geometry.
    pub fn from_object(object: &'a WavefrontObject) -> Result<Option<Self>, SceneError> {
        if object.positions.is_empty() {
            return Ok(None);
        }

        let vertex_count =
            u32::try_from(object.vertex_count()).map_err(|_| SceneError::TooManyVertices {
                name: object.name.clone(),
                count: object.vertex_count(),
            })?;

        Ok(Some(Self {
            name: &object.name,
            positions: bytemuck::cast_slice(&object.positions),
            normals: bytemuck::cast_slice(&object.normals),
            vertex_count,
        }))
    }
}

/// Owns every uploaded actor and releases their buffers on drop.
pub struct ActorRegistry {
    device: ash::Device,
    actors: Vec<SceneActor>,
}

impl ActorRegistry {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            actors: Vec::new(),
        }
    }

    /// Reads the configured OBJ (and MTL) files and uploads every object.
    pub fn load(
        allocator: &MemoryAllocator,
        config: &RendererConfig,
    ) -> Result<Self, SceneError> {
        tracing::info!("Loading scene from {}", config.scene_obj.display());
        let start = Instant::now();

        let scene = WavefrontScene::load(
            &config.scene_obj,
            Some(config.scene_mtl.as_path()),
            config.load_options,
        )?;

        let mut registry = Self::new(allocator.device().clone());
        for object in &scene.objects {
            match ActorUpload::from_object(object)? {
                Some(upload) => {
                    registry.upload(allocator, &upload)?;
                    tracing::info!(
                        "Loaded object '{}': {} triangles",
                        object.name,
                        object.triangle_count()
                    );
                }
                None => tracing::warn!("Skipping object '{}' without geometry", object.name),
            }
        }

        tracing::info!(
            "Scene loaded in {:.2?}: {} actors",
            start.elapsed(),
            registry.len()
        );

        Ok(registry)
    }

    pub fn upload(
        &mut self,
        allocator: &MemoryAllocator,
        upload: &ActorUpload<'_>,
    ) -> Result<(), SceneError> {
        let actor = create_actor(allocator, upload).map_err(|source| SceneError::UploadFailed {
            name: upload.name.to_string(),
            source,
        })?;
        self.actors.push(actor);
        Ok(())
    }

    pub fn actors(&self) -> &[SceneActor] {
        &self.actors
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl Drop for ActorRegistry {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            tracing::error!("Failed to wait for device idle before releasing actors: {}", e);
        }

        for actor in self.actors.drain(..) {
            destroy_actor(&self.device, &actor);
        }
    }
}

fn create_actor(
    allocator: &MemoryAllocator,
    upload: &ActorUpload<'_>,
) -> Result<SceneActor, MemoryError> {
    let device = allocator.device();
    let usage = vk::BufferUsageFlags::VERTEX_BUFFER;

    let position_buffer = allocator.create_buffer(upload.positions.len() as vk::DeviceSize, usage)?;
    let normal_buffer = match allocator.create_buffer(upload.normals.len() as vk::DeviceSize, usage) {
        Ok(buffer) => buffer,
        Err(e) => {
            unsafe { device.destroy_buffer(position_buffer, None) };
            return Err(e);
        }
    };

    let mut actor = SceneActor {
        name: upload.name.to_string(),
        vertex_buffers: [position_buffer, normal_buffer],
        memory: vk::DeviceMemory::null(),
        vertex_count: upload.vertex_count,
    };

    let written = allocator
        .bind_buffers_to_shared_memory(&actor.vertex_buffers, vk::MemoryPropertyFlags::HOST_VISIBLE)
        .and_then(|allocation| {
            actor.memory = allocation.memory;
            allocator.write_host_visible(
                allocation.memory,
                allocation.size,
                &[
                    (allocation.offsets[0], upload.positions),
                    (allocation.offsets[1], upload.normals),
                ],
            )
        });

    match written {
        Ok(()) => Ok(actor),
        Err(e) => {
            destroy_actor(device, &actor);
            Err(e)
        }
    }
}

fn destroy_actor(device: &ash::Device, actor: &SceneActor) {
    unsafe {
        for &buffer in &actor.vertex_buffers {
            device.destroy_buffer(buffer, None);
        }
        device.free_memory(actor.memory, None);
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use eren_render_vulkan_core::{renderer::FrameContext, vulkan::recorder::CommandLog};
    use eren_wavefront::{loader::LoadOptions, object::parse_objects};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::passes::{PassHandles, PassKind, record_pass};

    const SCENE_OBJ: &str = include_str!("../assets/scene.obj");

    fn triangle(name: &str) -> WavefrontObject {
        WavefrontObject {
            name: name.to_string(),
            material_name: None,
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            texture_coords: vec![[0.0, 0.0]; 3],
        }
    }

    #[test]
    fn upload_views_both_streams() {
        let object = triangle("tri");

        let upload = ActorUpload::from_object(&object).unwrap().unwrap();

        assert_eq!(upload.name, "tri");
        assert_eq!(upload.vertex_count, 3);
        assert_eq!(upload.positions.len(), 36);
        assert_eq!(upload.normals.len(), 36);
        assert_eq!(&upload.positions[12..16], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn objects_without_geometry_are_skipped() {
        let object = WavefrontObject {
            name: "empty".to_string(),
            ..Default::default()
        };

        assert_eq!(ActorUpload::from_object(&object).unwrap(), None);
    }

    #[test]
    fn bundled_scene_becomes_two_actors_and_five_draws() {
        let objects = parse_objects(
            SCENE_OBJ,
            &LoadOptions {
                flip_position_y: true,
                load_materials: false,
            },
        )
        .unwrap();

        let uploads: Vec<(&str, u32)> = objects
            .iter()
            .filter_map(|object| ActorUpload::from_object(object).unwrap())
            .map(|upload| (upload.name, upload.vertex_count))
            .collect();
        assert_eq!(uploads, vec![("Cube", 36), ("Plane", 6)]);

        let actors: Vec<SceneActor> = uploads
            .iter()
            .enumerate()
            .map(|(i, &(name, vertex_count))| SceneActor {
                name: name.to_string(),
                vertex_buffers: [
                    vk::Buffer::from_raw(10 * i as u64 + 10),
                    vk::Buffer::from_raw(10 * i as u64 + 11),
                ],
                memory: vk::DeviceMemory::null(),
                vertex_count,
            })
            .collect();

        let log = CommandLog::new();
        let frame_context = FrameContext {
            command_buffer: vk::CommandBuffer::null(),
            image_index: 0,
        };
        for kind in PassKind::RECORDING_ORDER {
            record_pass(&log, &frame_context, kind, &PassHandles::default(), &[], &actors);
        }

        let vertex_counts: Vec<u32> = log.draws().iter().map(|draw| draw.0).collect();
        assert_eq!(vertex_counts, vec![36, 6, 36, 6, 4]);
    }
}
