use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::config::ShadowProjection;

/// Camera matrices consumed by the G-buffer vertex shader (set 0, binding 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneTransformUbo {
    pub view: Mat4,
    pub projection: Mat4,
}

impl SceneTransformUbo {
    pub fn new(extent: vk::Extent2D) -> Self {
        let axis = Vec3::new(0.5, 0.7, 0.0).normalize();
        let view = Mat4::from_axis_angle(axis, (-48.0f32).to_radians())
            * Mat4::from_translation(Vec3::new(-9.0, 8.0, -8.0));
        let projection = Mat4::perspective_rh_gl(
            45.0f32.to_radians(),
            extent.width as f32 / extent.height as f32,
            0.1,
            100.0,
        );

        Self { view, projection }
    }
}

/// Light matrices shared by the shadow-map and composition passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightSpaceUbo {
    pub view: Mat4,
    pub projection: Mat4,
    pub light_direction: Vec4,
}

impl LightSpaceUbo {
    /// `light_direction` is the direction the light travels, from the eye
    /// toward the origin.
    pub fn new(projection: ShadowProjection) -> Self {
        let to_light = direction_to_light();
        let eye = to_light * LIGHT_DISTANCE;

        Self {
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
            projection: shadow_projection_matrix(projection),
            light_direction: (-to_light).extend(1.0),
        }
    }
}

const LIGHT_DISTANCE: f32 = 20.0;

/// Unit vector from the origin toward the light. Loaded positions have Y
/// flipped, so negative Y is above the ground plane.
pub fn direction_to_light() -> Vec3 {
    Vec3::new(-10.0, -25.0, 4.0).normalize()
}

pub fn shadow_projection_matrix(projection: ShadowProjection) -> Mat4 {
    match projection {
        ShadowProjection::Perspective => {
            Mat4::perspective_rh_gl(90.0f32.to_radians(), 1.0, 0.1, 30.0)
        }
        ShadowProjection::Orthographic => {
            Mat4::orthographic_rh_gl(-70.0, 70.0, -70.0, 70.0, 0.1, 180.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::constants::RENDER_EXTENT;

    #[test]
    fn std140_sizes() {
        assert_eq!(std::mem::size_of::<SceneTransformUbo>(), 128);
        assert_eq!(std::mem::size_of::<LightSpaceUbo>(), 144);
    }

    #[test]
    fn light_looks_at_origin_from_below() {
        let ubo = LightSpaceUbo::new(ShadowProjection::Perspective);
        let origin_in_view = ubo.view.transform_point3(Vec3::ZERO);

        // Right-handed view space looks down -Z, twenty units away.
        assert!((origin_in_view.z + 20.0).abs() < 1e-4);
        assert!(origin_in_view.x.abs() < 1e-4);
        assert_eq!(ubo.light_direction.w, 1.0);
        assert!((ubo.light_direction.truncate().length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn shading_and_shadows_share_one_light() {
        let ubo = LightSpaceUbo::new(ShadowProjection::Perspective);
        let eye = ubo.view.inverse().transform_point3(Vec3::ZERO);
        let travel = ubo.light_direction.truncate();

        // The shader lights from -light_direction, which must point at the eye.
        assert!((eye.normalize() + travel).length() < 1e-4);
        assert!((eye.length() - 20.0).abs() < 1e-3);
    }

    #[test]
    fn projection_follows_configuration() {
        let perspective = LightSpaceUbo::new(ShadowProjection::Perspective);
        let orthographic = LightSpaceUbo::new(ShadowProjection::Orthographic);

        assert_eq!(perspective.view, orthographic.view);
        assert_ne!(perspective.projection, orthographic.projection);
        // Orthographic projections keep w at 1.
        assert_eq!(orthographic.projection.w_axis.w, 1.0);
        assert_eq!(perspective.projection.z_axis.w, -1.0);
    }

    #[test]
    fn scene_projection_uses_render_aspect() {
        let ubo = SceneTransformUbo::new(RENDER_EXTENT);
        let expected = Mat4::perspective_rh_gl(45.0f32.to_radians(), 1280.0 / 720.0, 0.1, 100.0);

        assert_eq!(ubo.projection, expected);
    }
}
