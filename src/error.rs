use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// A retained value has no representation in the wire format.
    #[error("Encoding error at {path}: {message}")]
    Encoding { path: String, message: String },

    /// The byte stream is truncated, corrupt, or not a holder.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// The stream is well formed but names a type the decoding context
    /// cannot reconstruct.
    #[error("Unresolved type \"{type_name}\" at {path}")]
    UnresolvedType { type_name: String, path: String },

    /// An extension tried to claim a built-in type name.
    #[error("Type name \"{0}\" is reserved for a built-in type")]
    ReservedTypeName(String),
}

impl CodecError {
    pub(crate) fn encoding(path: &str, message: impl Into<String>) -> Self {
        CodecError::Encoding {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn decoding(path: &str, message: impl std::fmt::Display) -> Self {
        CodecError::Decoding(format!("{path}: {message}"))
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid repository name: \"{0}\"")]
    InvalidName(String),
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;
