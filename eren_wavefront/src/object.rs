use std::{io::Cursor, path::Path};

use crate::{error::ParseError, loader::LoadOptions};

/// A fully triangulated object. The three attribute lists are parallel: entry
/// `i` of each belongs to the `i`-th emitted vertex, in face-declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WavefrontObject {
    pub name: String,
    pub material_name: Option<String>,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub texture_coords: Vec<[f32; 2]>,
}

impl WavefrontObject {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }
}

pub fn parse_objects(text: &str, options: &LoadOptions) -> Result<Vec<WavefrontObject>, ParseError> {
    parse_objects_with_materials(text, None, options)
}

/// Like [`parse_objects`], resolving `usemtl` names against `material_text`
/// whenever the object file declares a `mtllib`.
pub fn parse_objects_with_materials(
    text: &str,
    material_text: Option<&str>,
    options: &LoadOptions,
) -> Result<Vec<WavefrontObject>, ParseError> {
    let (models, materials) = tobj::load_obj_buf(
        &mut Cursor::new(text),
        &tobj::LoadOptions {
            triangulate: false,
            single_index: false,
            ..Default::default()
        },
        |_: &Path| match material_text {
            Some(material_text) => tobj::load_mtl_buf(&mut Cursor::new(material_text)),
            None => Err(tobj::LoadError::OpenFileFailed),
        },
    )?;
    let materials = materials.unwrap_or_default();

    let mut objects = Vec::with_capacity(models.len());
    for model in models {
        // A material switch before the first face yields an empty model.
        if model.mesh.indices.is_empty() {
            continue;
        }

        let mut object = expand_faces(&model)?;
        object.material_name = model
            .mesh
            .material_id
            .and_then(|id| materials.get(id))
            .map(|material| material.name.clone());

        if options.flip_position_y {
            for position in &mut object.positions {
                position[1] = -position[1];
            }
        }

        objects.push(object);
    }

    Ok(objects)
}

fn expand_faces(model: &tobj::Model) -> Result<WavefrontObject, ParseError> {
    let mesh = &model.mesh;
    let corner_count = mesh.indices.len();

    if mesh.texcoord_indices.len() != corner_count {
        return Err(ParseError::MissingAttribute {
            object: model.name.clone(),
            attribute: "texture coordinate",
        });
    }
    if mesh.normal_indices.len() != corner_count {
        return Err(ParseError::MissingAttribute {
            object: model.name.clone(),
            attribute: "normal",
        });
    }

    // An empty arity list means every face is already a triangle.
    if let Some(&arity) = mesh.face_arities.iter().find(|&&arity| arity != 3) {
        return Err(ParseError::FaceNotTriangle {
            object: model.name.clone(),
            arity,
        });
    }
    if corner_count % 3 != 0 {
        return Err(ParseError::FaceNotTriangle {
            object: model.name.clone(),
            arity: (corner_count % 3) as u32,
        });
    }

    let out_of_range = |attribute| ParseError::IndexOutOfRange {
        object: model.name.clone(),
        attribute,
    };

    let mut object = WavefrontObject {
        name: model.name.clone(),
        positions: Vec::with_capacity(corner_count),
        normals: Vec::with_capacity(corner_count),
        texture_coords: Vec::with_capacity(corner_count),
        ..Default::default()
    };

    for corner in 0..corner_count {
        object.positions.push(
            attribute::<3>(&mesh.positions, mesh.indices[corner])
                .ok_or_else(|| out_of_range("position"))?,
        );
        object.texture_coords.push(
            attribute::<2>(&mesh.texcoords, mesh.texcoord_indices[corner])
                .ok_or_else(|| out_of_range("texture coordinate"))?,
        );
        object.normals.push(
            attribute::<3>(&mesh.normals, mesh.normal_indices[corner])
                .ok_or_else(|| out_of_range("normal"))?,
        );
    }

    Ok(object)
}

fn attribute<const N: usize>(values: &[f32], index: u32) -> Option<[f32; N]> {
    let start = index as usize * N;
    values.get(start..start + N)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TRIANGLE: &str = "\
o Triangle
v 0.0 1.0 0.0
v 1.0 2.0 0.0
v 2.0 3.0 1.0
vn 0.0 0.0 1.0
vn 0.0 1.0 0.0
vn 1.0 0.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
f 1/1/1 2/2/2 3/3/3
";

    #[test]
    fn single_triangle_yields_one_object() {
        let objects = parse_objects(TRIANGLE, &LoadOptions::default()).unwrap();

        assert_eq!(objects.len(), 1);
        let object = &objects[0];
        assert_eq!(object.name, "Triangle");
        assert_eq!(object.positions.len(), 3);
        assert_eq!(object.normals.len(), 3);
        assert_eq!(object.texture_coords.len(), 3);
        assert_eq!(object.triangle_count(), 1);
    }

    #[test]
    fn vertices_follow_face_order() {
        let text = TRIANGLE.replace("f 1/1/1 2/2/2 3/3/3", "f 3/2/1 1/3/2 2/1/3");
        let objects = parse_objects(&text, &LoadOptions::default()).unwrap();
        let object = &objects[0];

        assert_eq!(
            object.positions,
            vec![[2.0, 3.0, 1.0], [0.0, 1.0, 0.0], [1.0, 2.0, 0.0]]
        );
        assert_eq!(
            object.texture_coords,
            vec![[1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]
        );
        assert_eq!(
            object.normals,
            vec![[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]
        );
    }

    #[test]
    fn relative_indices_count_back_from_the_last_vertex() {
        let text = "\
o T
v 0 0 0
v 1 0 0
v 0 1 0
vn 0 0 1
vt 0 0
f -3/-1/-1 -2/-1/-1 -1/-1/-1
";
        let objects = parse_objects(text, &LoadOptions::default()).unwrap();

        assert_eq!(
            objects[0].positions,
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
        );
        assert_eq!(objects[0].normals, vec![[0.0, 0.0, 1.0]; 3]);
    }

    #[test]
    fn flip_negates_only_position_y() {
        let plain = parse_objects(TRIANGLE, &LoadOptions::default()).unwrap();
        let flipped = parse_objects(
            TRIANGLE,
            &LoadOptions {
                flip_position_y: true,
                ..LoadOptions::default()
            },
        )
        .unwrap();

        for (a, b) in plain[0].positions.iter().zip(&flipped[0].positions) {
            assert_eq!(a[0], b[0]);
            assert_eq!(a[1], -b[1]);
            assert_eq!(a[2], b[2]);
        }
        assert_eq!(plain[0].normals, flipped[0].normals);
    }

    #[test]
    fn indices_reference_global_pools() {
        let text = "\
v 0 0 0
v 1 0 0
v 0 1 0
v 5 5 5
vn 0 0 1
vt 0 0
o First
f 1/1/1 2/1/1 3/1/1
o Second
f 4/1/1 2/1/1 3/1/1
";
        let objects = parse_objects(text, &LoadOptions::default()).unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].name, "First");
        assert_eq!(objects[1].name, "Second");
        assert_eq!(objects[1].positions[0], [5.0, 5.0, 5.0]);
    }

    #[test]
    fn usemtl_names_the_object_when_materials_are_given() {
        let text = TRIANGLE.replace("f 1/1/1", "usemtl Red\nf 1/1/1");
        let text = format!("mtllib scene.mtl\n{}", text);

        let with_materials =
            parse_objects_with_materials(&text, Some("newmtl Red\nKd 1 0 0\n"), &LoadOptions::default())
                .unwrap();
        let without_materials = parse_objects(&text, &LoadOptions::default()).unwrap();

        assert_eq!(with_materials.len(), 1);
        assert_eq!(with_materials[0].material_name.as_deref(), Some("Red"));
        assert_eq!(without_materials[0].material_name, None);
        assert_eq!(without_materials[0].vertex_count(), 3);
    }

    #[test]
    fn faces_without_object_still_form_an_object() {
        let text = TRIANGLE.replace("o Triangle\n", "");
        let objects = parse_objects(&text, &LoadOptions::default()).unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].vertex_count(), 3);
    }

    #[test]
    fn quad_face_is_rejected() {
        let text = TRIANGLE.replace("f 1/1/1 2/2/2 3/3/3", "f 1/1/1 2/2/2 3/3/3 1/1/1");
        let error = parse_objects(&text, &LoadOptions::default()).unwrap_err();

        assert!(matches!(error, ParseError::FaceNotTriangle { ref object, .. } if object == "Triangle"));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let text = TRIANGLE.replace("f 1/1/1 2/2/2 3/3/3", "f 1/1/1 2/2/2 9/3/3");

        assert!(parse_objects(&text, &LoadOptions::default()).is_err());
    }

    #[test]
    fn missing_texcoord_index_is_rejected() {
        let text = TRIANGLE.replace("f 1/1/1 2/2/2 3/3/3", "f 1//1 2//2 3//3");

        assert!(parse_objects(&text, &LoadOptions::default()).is_err());
    }

    #[test]
    fn bad_number_is_malformed() {
        let text = TRIANGLE.replace("v 1.0 2.0 0.0", "v 1.0 two 0.0");
        let error = parse_objects(&text, &LoadOptions::default()).unwrap_err();

        assert!(matches!(error, ParseError::Malformed(_)));
    }
}
