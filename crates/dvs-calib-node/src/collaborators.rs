//! Interfaces to everything the calibration session does not own.
//!
//! The session talks to four collaborators: a pattern detector per camera, a
//! calibration solver, a persistent camera-info store and an output sink for
//! published results. Default implementations live in [`crate::adapters`]
//! and [`crate::solver`].

use std::fmt;

use dvs_calib_core::{CameraModel, Pt2, Pt3, Real, Resolution, Vec3};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a camera in a (possibly multi-camera) rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl Default for CameraId {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rendered diagnostic image, forwarded unchanged to the output sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticImage {
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    /// Interleaved pixel data, `width * height * channels` bytes.
    pub data: Vec<u8>,
}

impl DiagnosticImage {
    pub const BGR8: &'static str = "bgr8";

    /// Black BGR image of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            encoding: Self::BGR8.to_string(),
            data: vec![0; width as usize * height as usize * 3],
        }
    }
}

/// Source of detected calibration patterns for one camera.
pub trait PatternDetector {
    /// Image points of the most recent detection, in world-pattern order.
    fn pattern_points(&self) -> Vec<Pt2>;

    /// Drop any detection and visualization state.
    fn reset(&mut self);

    fn visualization_image(&self) -> DiagnosticImage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverFlags {
    /// Keep the third radial coefficient at zero.
    pub fix_k3: bool,
}

impl Default for SolverFlags {
    fn default() -> Self {
        Self { fix_k3: true }
    }
}

/// Raw solver output.
///
/// Shapes are dynamic on purpose: the publisher checks them against the
/// camera-info contract (3×3 `K`, 5 distortion coefficients).
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutput {
    pub camera_matrix: DMatrix<Real>,
    pub dist_coeffs: DVector<Real>,
    /// Per-view rotation vectors (axis-angle), camera from pattern.
    pub rvecs: Vec<Vec3>,
    pub tvecs: Vec<Vec3>,
    /// RMS reprojection error in pixels over all points.
    pub reprojection_error: Real,
    pub per_view_errors: Vec<Real>,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("solver needs at least {required} observations, got {available}")]
    InsufficientObservations { available: usize, required: usize },
    #[error("invalid observations: {0}")]
    InvalidInput(String),
    #[error("solver diverged: {0}")]
    Divergence(String),
}

/// Camera calibration from planar pattern correspondences.
pub trait CalibrationSolver {
    /// `object_points[i]` and `image_points[i]` are the i-th observation.
    fn solve(
        &mut self,
        object_points: &[Vec<Pt3>],
        image_points: &[Vec<Pt2>],
        resolution: Resolution,
        flags: SolverFlags,
    ) -> Result<SolverOutput, SolverError>;
}

/// Persistent camera-info storage owned by the camera driver.
pub trait CameraInfoStore {
    /// Currently stored model, if any.
    fn get(&self) -> Option<CameraModel>;

    fn set(&mut self, model: &CameraModel) -> anyhow::Result<()>;
}

/// Fire-and-forget publication of results.
pub trait OutputSink {
    fn publish_camera_info(&mut self, model: &CameraModel);
    fn publish_reprojection_error(&mut self, error: Real);
    fn publish_visualization(&mut self, image: &DiagnosticImage);
}
