use std::{fs, path::Path};

use crate::{
    error::WavefrontError,
    material::{WavefrontMaterial, parse_materials},
    object::{WavefrontObject, parse_objects_with_materials},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Negates the Y component of every position.
    pub flip_position_y: bool,
    /// Parses the material file and resolves `usemtl` names against it. When
    /// unset the material file is never opened.
    pub load_materials: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WavefrontScene {
    pub objects: Vec<WavefrontObject>,
    pub materials: Vec<WavefrontMaterial>,
}

impl WavefrontScene {
    pub fn load(
        object_path: impl AsRef<Path>,
        material_path: Option<&Path>,
        options: LoadOptions,
    ) -> Result<Self, WavefrontError> {
        let material_text = if options.load_materials {
            let material_path = material_path.ok_or(WavefrontError::MissingMaterialFile)?;
            Some((material_path, read_file(material_path)?))
        } else {
            None
        };

        let materials = match &material_text {
            Some((material_path, text)) => {
                parse_materials(text).map_err(|source| WavefrontError::ParseFailed {
                    path: material_path.display().to_string(),
                    source,
                })?
            }
            None => Vec::new(),
        };

        let object_path = object_path.as_ref();
        let text = read_file(object_path)?;
        let objects = parse_objects_with_materials(
            &text,
            material_text.as_ref().map(|(_, text)| text.as_str()),
            &options,
        )
        .map_err(|source| WavefrontError::ParseFailed {
            path: object_path.display().to_string(),
            source,
        })?;

        tracing::debug!(
            "Parsed {} objects and {} materials from {}",
            objects.len(),
            materials.len(),
            object_path.display()
        );

        Ok(Self { objects, materials })
    }

    pub fn material(&self, name: &str) -> Option<&WavefrontMaterial> {
        self.materials.iter().find(|m| m.name == name)
    }
}

fn read_file(path: &Path) -> Result<String, WavefrontError> {
    fs::read_to_string(path).map_err(|e| WavefrontError::ReadFileFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "eren_wavefront_{}_{}",
            std::process::id(),
            name
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    const OBJECT: &str = "\
mtllib with.mtl
o Tri
v 0 0 0
v 1 0 0
v 0 1 0
vn 0 0 1
vt 0 0
usemtl Red
f 1/1/1 2/1/1 3/1/1
";

    #[test]
    fn skips_material_file_when_disabled() {
        let object_path = write_temp("skip.obj", OBJECT);
        let missing = Path::new("/nonexistent/scene.mtl");

        let scene = WavefrontScene::load(&object_path, Some(missing), LoadOptions::default())
            .unwrap();

        assert_eq!(scene.objects.len(), 1);
        assert!(scene.materials.is_empty());
        fs::remove_file(object_path).ok();
    }

    #[test]
    fn loads_materials_first_when_enabled() {
        let object_path = write_temp("with.obj", OBJECT);
        let material_path = write_temp("with.mtl", "newmtl Red\nKd 1 0 0\n");

        let scene = WavefrontScene::load(
            &object_path,
            Some(material_path.as_path()),
            LoadOptions {
                load_materials: true,
                ..LoadOptions::default()
            },
        )
        .unwrap();

        let material_name = scene.objects[0].material_name.as_deref().unwrap();
        assert_eq!(scene.material(material_name).unwrap().albedo_color, [1.0, 0.0, 0.0]);
        fs::remove_file(object_path).ok();
        fs::remove_file(material_path).ok();
    }

    #[test]
    fn enabled_materials_require_a_path() {
        let result = WavefrontScene::load(
            "unused.obj",
            None,
            LoadOptions {
                load_materials: true,
                ..LoadOptions::default()
            },
        );

        assert!(matches!(result, Err(WavefrontError::MissingMaterialFile)));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let object_path = write_temp("broken.obj", "v 1 2\n");

        let error = WavefrontScene::load(&object_path, None, LoadOptions::default()).unwrap_err();

        assert!(matches!(error, WavefrontError::ParseFailed { .. }));
        assert!(error.to_string().contains("broken.obj"));
        fs::remove_file(object_path).ok();
    }

    #[test]
    fn missing_object_file_is_reported() {
        let result = WavefrontScene::load("/nonexistent/scene.obj", None, LoadOptions::default());

        assert!(matches!(result, Err(WavefrontError::ReadFileFailed { .. })));
    }
}
