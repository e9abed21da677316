use thiserror::Error;

#[derive(Debug, Error)]
pub enum WavefrontError {
    #[error("Failed to read {path}: {reason}")]
    ReadFileFailed { path: String, reason: String },

    #[error("Material loading is enabled but no material file was given")]
    MissingMaterialFile,

    #[error("Failed to parse {path}: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Rejected by the OBJ/MTL tokenizer.
    #[error("{0}")]
    Malformed(String),

    #[error("object '{object}' has a face with {arity} vertices, only triangles are supported")]
    FaceNotTriangle { object: String, arity: u32 },

    #[error("object '{object}' has faces without {attribute} indices")]
    MissingAttribute {
        object: String,
        attribute: &'static str,
    },

    #[error("object '{object}' references a {attribute} that does not exist")]
    IndexOutOfRange {
        object: String,
        attribute: &'static str,
    },

    #[error("material '{material}' has an invalid '{keyword}' value '{value}'")]
    InvalidValue {
        material: String,
        keyword: &'static str,
        value: String,
    },
}

impl From<tobj::LoadError> for ParseError {
    fn from(error: tobj::LoadError) -> Self {
        Self::Malformed(error.to_string())
    }
}
