//! Default [`CalibrationSolver`]: closed-form planar initialisation refined by
//! Levenberg–Marquardt (see `dvs_calib_optim::calibrate_camera`).

use dvs_calib_core::{mat3_to_row_major, ObservationPair, Pt2, Pt3, Resolution};
use dvs_calib_optim::{calibrate_camera, CalibrateError, PlanarIntrinsicsOptions, SolveOptions};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::{CalibrationSolver, SessionConfig, SolverError, SolverFlags, SolverOutput};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanarSolver {
    options: SolveOptions,
}

impl PlanarSolver {
    pub fn new(options: SolveOptions) -> Self {
        Self { options }
    }

    /// Solver using the refinement settings of `config.solver`.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.solver)
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }
}

impl CalibrationSolver for PlanarSolver {
    fn solve(
        &mut self,
        object_points: &[Vec<Pt3>],
        image_points: &[Vec<Pt2>],
        resolution: Resolution,
        flags: SolverFlags,
    ) -> Result<SolverOutput, SolverError> {
        if object_points.len() != image_points.len() {
            return Err(SolverError::InvalidInput(format!(
                "{} object point sets for {} image point sets",
                object_points.len(),
                image_points.len()
            )));
        }

        let views = object_points
            .iter()
            .zip(image_points)
            .map(|(world, image)| ObservationPair::new(image.clone(), world.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| SolverError::InvalidInput(err.to_string()))?;

        debug!(
            "planar solve: {} views at {}, fix_k3={}",
            views.len(),
            resolution,
            flags.fix_k3
        );
        let opts = PlanarIntrinsicsOptions {
            fix_k3: flags.fix_k3,
            solve: self.options,
        };
        let calib = calibrate_camera(&views, &opts).map_err(solver_error)?;

        let k = calib.camera.intrinsics;
        let (w, h) = (resolution.width as f64, resolution.height as f64);
        if !(0.0..=w).contains(&k.cx) || !(0.0..=h).contains(&k.cy) {
            warn!(
                "principal point ({:.2}, {:.2}) lies outside the {} sensor",
                k.cx, k.cy, resolution
            );
        }

        Ok(SolverOutput {
            camera_matrix: DMatrix::from_row_slice(3, 3, &mat3_to_row_major(&k.k_matrix())),
            dist_coeffs: DVector::from_row_slice(&calib.camera.distortion.coefficients()),
            rvecs: calib.rotation_vectors(),
            tvecs: calib.translation_vectors(),
            reprojection_error: calib.rms_error,
            per_view_errors: calib.per_view_rms,
            iterations: calib.report.iterations,
        })
    }
}

fn solver_error(err: CalibrateError) -> SolverError {
    match err {
        CalibrateError::NotEnoughViews {
            available,
            required,
        } => SolverError::InsufficientObservations {
            available,
            required,
        },
        CalibrateError::CountMismatch { .. }
        | CalibrateError::NotEnoughPoints { .. }
        | CalibrateError::NonFinitePoint { .. }
        | CalibrateError::NonPlanarPattern { .. } => SolverError::InvalidInput(err.to_string()),
        CalibrateError::Homography { .. }
        | CalibrateError::Intrinsics(_)
        | CalibrateError::Pose { .. }
        | CalibrateError::NotConverged { .. }
        | CalibrateError::InvalidSolution(_) => SolverError::Divergence(err.to_string()),
    }
}
