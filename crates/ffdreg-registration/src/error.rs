//! Errors raised while setting up or running a registration.

use ffdreg_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Transform, volumes or masks disagree on geometry.
    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// A persisted transform could not be read.
    #[error("Format error: {0}")]
    FormatError(String),

    /// A setting is out of range.
    #[error("Bad registration setting: {0}")]
    InvalidConfiguration(String),

    /// A volume or ROI has unusable extents.
    #[error("Unusable extent: {0}")]
    DimensionMismatch(String),

    /// A mask does not have the shape of its volume.
    #[error("Mask shape {actual:?} differs from volume shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The score became NaN or infinite.
    #[error("Non-finite score: {0}")]
    NumericalInstability(String),

    /// Error raised by the volume/transform layer.
    #[error(transparent)]
    Core(CoreError),
}

pub type Result<T> = std::result::Result<T, RegistrationError>;

impl From<CoreError> for RegistrationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::GeometryMismatch(msg) => Self::GeometryMismatch(msg),
            CoreError::FormatError(msg) => Self::FormatError(msg),
            other => Self::Core(other),
        }
    }
}

impl RegistrationError {
    /// Create a geometry mismatch error.
    pub fn geometry_mismatch(msg: impl Into<String>) -> Self {
        Self::GeometryMismatch(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an unusable extent error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    /// Create a numerical instability error.
    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistrationError::invalid_configuration("bins");
        assert_eq!(err.to_string(), "Bad registration setting: bins");
    }

    #[test]
    fn test_shape_mismatch_names_both_shapes() {
        let err = RegistrationError::ShapeMismatch {
            expected: vec![8, 8, 8],
            actual: vec![8, 8, 7],
        };
        assert_eq!(
            err.to_string(),
            "Mask shape [8, 8, 7] differs from volume shape [8, 8, 8]"
        );
    }

    #[test]
    fn test_core_errors_keep_their_kind() {
        let err: RegistrationError = CoreError::format("bad tag").into();
        assert!(matches!(err, RegistrationError::FormatError(_)));

        let err: RegistrationError = CoreError::geometry_mismatch("origin").into();
        assert!(matches!(err, RegistrationError::GeometryMismatch(_)));

        let err: RegistrationError = CoreError::invalid_geometry("dims").into();
        assert!(matches!(err, RegistrationError::Core(CoreError::InvalidGeometry(_))));
    }
}
