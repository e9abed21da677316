use std::{path::PathBuf, str::FromStr};

use eren_wavefront::loader::LoadOptions;
use thiserror::Error;

use crate::constants::{DEFAULT_SCENE_MTL, DEFAULT_SCENE_OBJ, DEFAULT_SHADER_DIR};

pub const SHADER_DIR_VAR: &str = "EREN_SHADER_DIR";
pub const SCENE_OBJ_VAR: &str = "EREN_SCENE_OBJ";
pub const SCENE_MTL_VAR: &str = "EREN_SCENE_MTL";
pub const SHADOW_PROJECTION_VAR: &str = "EREN_SHADOW_PROJECTION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown shadow projection '{0}', expected 'perspective' or 'orthographic'")]
    UnknownShadowProjection(String),
}

/// Projection used to render the scene from the light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowProjection {
    #[default]
    Perspective,
    Orthographic,
}

impl FromStr for ShadowProjection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "perspective" => Ok(Self::Perspective),
            "orthographic" => Ok(Self::Orthographic),
            _ => Err(ConfigError::UnknownShadowProjection(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub shader_dir: PathBuf,
    pub scene_obj: PathBuf,
    pub scene_mtl: PathBuf,
    pub load_options: LoadOptions,
    pub shadow_projection: ShadowProjection,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from(DEFAULT_SHADER_DIR),
            scene_obj: PathBuf::from(DEFAULT_SCENE_OBJ),
            scene_mtl: PathBuf::from(DEFAULT_SCENE_MTL),
            load_options: LoadOptions {
                flip_position_y: true,
                load_materials: false,
            },
            shadow_projection: ShadowProjection::default(),
        }
    }
}

impl RendererConfig {
    /// Defaults overridden by the `EREN_*` environment variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup(SHADER_DIR_VAR) {
            config.shader_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(SCENE_OBJ_VAR) {
            config.scene_obj = PathBuf::from(path);
        }
        if let Some(path) = lookup(SCENE_MTL_VAR) {
            config.scene_mtl = PathBuf::from(path);
        }
        if let Some(projection) = lookup(SHADOW_PROJECTION_VAR) {
            config.shadow_projection = projection.parse()?;
        }

        Ok(config)
    }
}
