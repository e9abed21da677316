use std::io::Cursor;

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub struct WavefrontMaterial {
    pub name: String,

    pub ambient_color: [f32; 3],
    pub albedo_color: [f32; 3],
    pub specular_color: [f32; 3],
    pub emission_color: [f32; 3],

    pub specular_exponent: f32,
    pub refraction_index: f32,
    pub dissolve: f32,

    pub albedo_map: Option<String>,
    pub specular_map: Option<String>,
    pub normal_map: Option<String>,
}

const BUMP_KEYWORDS: [&str; 3] = ["map_bump", "map_Bump", "bump"];

/// Materials in `newmtl` order.
pub fn parse_materials(text: &str) -> Result<Vec<WavefrontMaterial>, ParseError> {
    let (materials, _) = tobj::load_mtl_buf(&mut Cursor::new(text))?;

    materials.into_iter().map(convert_material).collect()
}

fn convert_material(material: tobj::Material) -> Result<WavefrontMaterial, ParseError> {
    let emission_color = match material.unknown_param.get("Ke") {
        Some(value) => parse_color(value).ok_or_else(|| ParseError::InvalidValue {
            material: material.name.clone(),
            keyword: "Ke",
            value: value.clone(),
        })?,
        None => [0.0; 3],
    };

    let normal_map = material.normal_texture.as_deref().or_else(|| {
        BUMP_KEYWORDS
            .iter()
            .find_map(|keyword| material.unknown_param.get(*keyword).map(String::as_str))
    });

    Ok(WavefrontMaterial {
        ambient_color: material.ambient.unwrap_or([0.0; 3]),
        albedo_color: material.diffuse.unwrap_or([0.0; 3]),
        specular_color: material.specular.unwrap_or([0.0; 3]),
        emission_color,
        specular_exponent: material.shininess.unwrap_or(0.0),
        refraction_index: material.optical_density.unwrap_or(0.0),
        dissolve: material.dissolve.unwrap_or(1.0),
        albedo_map: material.diffuse_texture.as_deref().and_then(texture_file),
        specular_map: material.specular_texture.as_deref().and_then(texture_file),
        normal_map: normal_map.and_then(texture_file),
        name: material.name,
    })
}

fn parse_color(value: &str) -> Option<[f32; 3]> {
    let mut components = value.split_whitespace().map(str::parse::<f32>);
    let color = [
        components.next()?.ok()?,
        components.next()?.ok()?,
        components.next()?.ok()?,
    ];
    components.next().is_none().then_some(color)
}

/// Texture statements may carry options (`-bm 1.0 file.png`); the file is last.
fn texture_file(value: &str) -> Option<String> {
    value.split_whitespace().last().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MATERIALS: &str = "\
# Blender MTL File
newmtl Floor
Ns 250.0
Ka 1.0 1.0 1.0
Kd 0.8 0.8 0.8
Ks 0.5 0.5 0.5
Ke 0.1 0.2 0.3
Ni 1.45
d 1.0
illum 2
map_Kd floor_albedo.png

newmtl Metal
Kd 0.2 0.2 0.25
map_Ks metal_spec.png
map_bump -bm 1.0 metal_normal.png
";

    #[test]
    fn materials_keep_declaration_order() {
        let materials = parse_materials(MATERIALS).unwrap();
        let names: Vec<&str> = materials.iter().map(|m| m.name.as_str()).collect();

        assert_eq!(names, vec!["Floor", "Metal"]);
    }

    #[test]
    fn reads_colors_and_scalars() {
        let materials = parse_materials(MATERIALS).unwrap();
        let floor = &materials[0];

        assert_eq!(floor.ambient_color, [1.0, 1.0, 1.0]);
        assert_eq!(floor.albedo_color, [0.8, 0.8, 0.8]);
        assert_eq!(floor.specular_color, [0.5, 0.5, 0.5]);
        assert_eq!(floor.emission_color, [0.1, 0.2, 0.3]);
        assert_eq!(floor.specular_exponent, 250.0);
        assert_eq!(floor.refraction_index, 1.45);
        assert_eq!(floor.albedo_map.as_deref(), Some("floor_albedo.png"));
        assert_eq!(floor.normal_map, None);
    }

    #[test]
    fn texture_options_are_skipped() {
        let materials = parse_materials(MATERIALS).unwrap();
        let metal = &materials[1];

        assert_eq!(metal.specular_map.as_deref(), Some("metal_spec.png"));
        assert_eq!(metal.normal_map.as_deref(), Some("metal_normal.png"));
        assert_eq!(metal.dissolve, 1.0);
        assert_eq!(metal.emission_color, [0.0; 3]);
    }

    #[test]
    fn malformed_emission_is_an_error() {
        let error = parse_materials("newmtl Glow\nKe 1 bright 0\n").unwrap_err();

        assert_eq!(
            error,
            ParseError::InvalidValue {
                material: "Glow".to_string(),
                keyword: "Ke",
                value: "1 bright 0".to_string(),
            }
        );
    }
}
