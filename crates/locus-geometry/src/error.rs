//! Failure modes of the localization engine.
//!
//! Every numeric edge case that would otherwise leak a NaN or an infinity
//! into a coordinate is mapped onto one of these variants.

use locus_types::LocusError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocalizationError {
    #[error("insufficient measurements: need at least {needed}, got {got}")]
    InsufficientMeasurements { needed: usize, got: usize },

    #[error("dimension mismatch in {operation}: {left:?} vs {right:?}")]
    DimensionMismatch {
        operation: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("matrix is singular (determinant {determinant:e})")]
    SingularMatrix { determinant: f64 },

    #[error("degenerate anchor geometry at iteration {iteration}: {details}")]
    DegenerateGeometry { iteration: usize, details: String },

    #[error("no candidate solution lies inside the containment region")]
    AmbiguousGeometry,

    #[error("height is unresolvable: every range is shorter than its horizontal distance")]
    HeightUnresolvable,

    #[error("ranges do not form a triangle (cosine {cosine})")]
    InvalidTriangle { cosine: f64 },

    #[error("invalid measurement at index {index}: {value}")]
    InvalidMeasurement { index: usize, value: f64 },
}

impl From<LocalizationError> for LocusError {
    fn from(err: LocalizationError) -> Self {
        LocusError::Localization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = LocalizationError::InsufficientMeasurements { needed: 3, got: 2 };
        assert_eq!(err.to_string(), "insufficient measurements: need at least 3, got 2");

        let err = LocalizationError::InvalidTriangle { cosine: 1.5 };
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn converts_into_locus_error() {
        let err: LocusError = LocalizationError::AmbiguousGeometry.into();
        assert!(matches!(err, LocusError::Localization(ref s) if s.contains("containment region")));
    }
}
