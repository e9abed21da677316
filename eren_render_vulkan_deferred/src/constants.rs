use ash::vk;

pub const APP_NAME: &str = "Eren Deferred";

/// Resolution of the G-buffer, the scene depth buffer and the composed image.
pub const RENDER_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1280,
    height: 720,
};

pub const GBUFFER_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::R32G32_SFLOAT;
pub const SHADOW_MAP_SIZE: u32 = 2048;
pub const RESULT_FORMAT: vk::Format = vk::Format::R16G16B16A16_UNORM;

pub const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.05, 1.0];

pub const DEFAULT_SHADER_DIR: &str = "shaders";
pub const DEFAULT_SCENE_OBJ: &str = "assets/scene.obj";
pub const DEFAULT_SCENE_MTL: &str = "assets/scene.mtl";

/// Number of mip levels in a full chain for a square image of `size` texels.
pub const fn mip_level_count(size: u32) -> u32 {
    u32::BITS - size.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_map_has_twelve_levels() {
        assert_eq!(mip_level_count(SHADOW_MAP_SIZE), 12);
        assert_eq!(mip_level_count(1), 1);
        assert_eq!(mip_level_count(1000), 10);
    }
}
