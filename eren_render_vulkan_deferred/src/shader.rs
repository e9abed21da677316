use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use ash::{util::read_spv, vk};
use thiserror::Error;

use crate::passes::PassKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShaderError {
    #[error("Failed to read shader {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Shader {path} is not valid SPIR-V: {reason}")]
    InvalidSpirv { path: String, reason: String },
}

/// SPIR-V words read from disk, validated but not yet handed to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub words: Vec<u32>,
}

impl ShaderSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ShaderError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| ShaderError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self, ShaderError> {
        let path = path.into();
        let words = read_spv(&mut Cursor::new(bytes)).map_err(|e| ShaderError::InvalidSpirv {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { path, words })
    }
}

/// Vertex and fragment stage of one pass.
#[derive(Debug, Clone)]
pub struct PassShaders {
    pub vertex: ShaderSource,
    pub fragment: ShaderSource,
}

impl PassShaders {
    pub fn load(shader_dir: &Path, kind: PassKind) -> Result<Self, ShaderError> {
        let (vertex, fragment) = kind.shader_file_names();
        let shaders = Self {
            vertex: ShaderSource::load(shader_dir.join(vertex))?,
            fragment: ShaderSource::load(shader_dir.join(fragment))?,
        };
        tracing::debug!("Loaded {} shaders from {}", kind, shader_dir.display());
        Ok(shaders)
    }
}

pub fn create_shader_module(
    device: &ash::Device,
    source: &ShaderSource,
) -> Result<vk::ShaderModule, vk::Result> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(&source.words);

    unsafe { device.create_shader_module(&create_info, None) }
}
