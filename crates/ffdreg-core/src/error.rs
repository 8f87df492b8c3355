//! Error types for volume geometry and transform persistence.

use thiserror::Error;

/// Errors raised while building geometry or reading/writing transforms.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A transform and an image disagree on geometry.
    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// A persisted transform is corrupt or incompatible.
    #[error("Format error: {0}")]
    FormatError(String),

    /// Geometry parameters that cannot describe a volume.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a geometry mismatch error.
    pub fn geometry_mismatch(msg: impl Into<String>) -> Self {
        Self::GeometryMismatch(msg.into())
    }

    /// Create a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::FormatError(msg.into())
    }

    /// Create an invalid geometry error.
    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }
}
