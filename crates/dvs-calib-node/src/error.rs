use thiserror::Error;

use crate::{CameraId, SolverError};

/// Failures surfaced by the calibration session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("need at least {required} observations to calibrate, have {available}")]
    InsufficientObservations { available: usize, required: usize },
    #[error("calibration did not converge: {0}")]
    SolverDivergence(String),
    #[error("solver rejected the observations: {0}")]
    InvalidObservations(String),
    #[error("{field} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        field: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("camera-info store rejected the model: {0}")]
    PersistenceFailure(String),
    #[error("no camera model has been solved or loaded")]
    NoModelAvailable,
    #[error("camera {0} is not registered")]
    UnknownCamera(CameraId),
    #[error("detector reported {image_points} points, world pattern has {world_points}")]
    PatternSizeMismatch {
        image_points: usize,
        world_points: usize,
    },
    #[error("detector reported a non-finite coordinate for point {point} of camera {camera_id}")]
    NonFinitePattern { camera_id: CameraId, point: usize },
}

impl CalibrationError {
    /// True when collecting more observations may let a later solve succeed.
    pub fn wants_more_observations(&self) -> bool {
        matches!(
            self,
            Self::InsufficientObservations { .. } | Self::SolverDivergence(_)
        )
    }
}

impl From<SolverError> for CalibrationError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::InsufficientObservations {
                available,
                required,
            } => Self::InsufficientObservations {
                available,
                required,
            },
            SolverError::InvalidInput(msg) => Self::InvalidObservations(msg),
            SolverError::Divergence(msg) => Self::SolverDivergence(msg),
        }
    }
}
