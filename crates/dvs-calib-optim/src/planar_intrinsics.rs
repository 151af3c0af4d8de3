//! Planar intrinsics calibration (Zhang initialisation + LM refinement).
//!
//! The parameter vector is laid out as
//!
//! ```text
//! [fx, fy, cx, cy, k1, k2, p1, p2, (k3), (ω, t) per view]
//! ```
//!
//! where `k3` is present only when it is estimated and each pose is an
//! axis-angle rotation followed by a translation (board → camera). Skew is
//! fixed at zero.

use crate::{LmBackend, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use dvs_calib_core::{
    BrownConrady5, CameraIntrinsics, Iso3, ObservationPair, PinholeCamera, Pt2, Pt3, Real, Vec3,
};
use dvs_calib_linear::{
    dlt_homography, estimate_intrinsics_from_homographies, estimate_planar_pose_from_h,
    HomographyError, IntrinsicsError, PlanarPoseError, MIN_HOMOGRAPHIES,
};
use log::{debug, info};
use nalgebra::{DVector, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of pattern views for a planar calibration.
pub const MIN_VIEWS: usize = MIN_HOMOGRAPHIES;
/// Minimum number of points per view (homography DLT).
pub const MIN_POINTS_PER_VIEW: usize = 4;

const POSE_DIM: usize = 6;
const PLANAR_TOL: Real = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrateError {
    #[error("need at least {required} views, got {available}")]
    NotEnoughViews { available: usize, required: usize },
    #[error("view {view} has {points} points, need at least {min}", min = MIN_POINTS_PER_VIEW)]
    NotEnoughPoints { view: usize, points: usize },
    #[error("view {view}: image / world point counts differ")]
    CountMismatch { view: usize },
    #[error("view {view}: point {point} has a non-finite coordinate")]
    NonFinitePoint { view: usize, point: usize },
    #[error("view {view}: pattern points are not planar (z = {z})")]
    NonPlanarPattern { view: usize, z: Real },
    #[error("view {view}: homography estimation failed: {source}")]
    Homography {
        view: usize,
        #[source]
        source: HomographyError,
    },
    #[error("closed-form intrinsics failed: {0}")]
    Intrinsics(#[from] IntrinsicsError),
    #[error("view {view}: pose initialisation failed: {source}")]
    Pose {
        view: usize,
        #[source]
        source: PlanarPoseError,
    },
    #[error("refinement did not converge after {iterations} evaluations ({termination})")]
    NotConverged {
        iterations: usize,
        termination: String,
    },
    #[error("refinement produced an invalid camera: {0}")]
    InvalidSolution(String),
}

/// Which parameters are held fixed during refinement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarIntrinsicsOptions {
    /// Hold the third radial coefficient at zero.
    pub fix_k3: bool,
    pub solve: SolveOptions,
}

impl Default for PlanarIntrinsicsOptions {
    fn default() -> Self {
        Self {
            fix_k3: true,
            solve: SolveOptions::default(),
        }
    }
}

/// Result of [`calibrate_camera`].
#[derive(Debug, Clone)]
pub struct PlanarCalibration {
    pub camera: PinholeCamera,
    /// Board → camera pose per view, in input order.
    pub poses: Vec<Iso3>,
    /// RMS reprojection error over all points, in pixels.
    pub rms_error: Real,
    pub per_view_rms: Vec<Real>,
    pub report: SolveReport,
}

impl PlanarCalibration {
    /// Per-view rotation vectors (axis-angle).
    pub fn rotation_vectors(&self) -> Vec<Vec3> {
        self.poses.iter().map(|p| p.rotation.scaled_axis()).collect()
    }

    pub fn translation_vectors(&self) -> Vec<Vec3> {
        self.poses.iter().map(|p| p.translation.vector).collect()
    }
}

/// Reprojection refinement over all views.
#[derive(Debug, Clone)]
pub struct PlanarIntrinsicsProblem<'a> {
    views: &'a [ObservationPair],
    fix_k3: bool,
}

impl<'a> PlanarIntrinsicsProblem<'a> {
    pub fn new(views: &'a [ObservationPair], fix_k3: bool) -> Self {
        Self { views, fix_k3 }
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    fn camera_dim(&self) -> usize {
        if self.fix_k3 {
            8
        } else {
            9
        }
    }

    /// Pack a camera and per-view poses into a parameter vector.
    pub fn pack(&self, camera: &PinholeCamera, poses: &[Iso3]) -> DVector<Real> {
        let cam_dim = self.camera_dim();
        let mut x = DVector::zeros(cam_dim + POSE_DIM * poses.len());

        let k = &camera.intrinsics;
        let d = &camera.distortion;
        x[0] = k.fx;
        x[1] = k.fy;
        x[2] = k.cx;
        x[3] = k.cy;
        x[4] = d.k1;
        x[5] = d.k2;
        x[6] = d.p1;
        x[7] = d.p2;
        if !self.fix_k3 {
            x[8] = d.k3;
        }

        for (i, pose) in poses.iter().enumerate() {
            let idx = cam_dim + POSE_DIM * i;
            let w = pose.rotation.scaled_axis();
            let t = pose.translation.vector;
            x.fixed_rows_mut::<3>(idx).copy_from(&w);
            x.fixed_rows_mut::<3>(idx + 3).copy_from(&t);
        }

        x
    }

    /// Decode a parameter vector into camera + per-view poses.
    pub fn unpack(&self, x: &DVector<Real>) -> (PinholeCamera, Vec<Iso3>) {
        let cam_dim = self.camera_dim();

        let camera = PinholeCamera::new(
            CameraIntrinsics {
                fx: x[0],
                fy: x[1],
                cx: x[2],
                cy: x[3],
                skew: 0.0,
            },
            BrownConrady5 {
                k1: x[4],
                k2: x[5],
                p1: x[6],
                p2: x[7],
                k3: if self.fix_k3 { 0.0 } else { x[8] },
            },
        );

        let poses = (0..self.num_views())
            .map(|i| {
                let idx = cam_dim + POSE_DIM * i;
                let w = Vector3::new(x[idx], x[idx + 1], x[idx + 2]);
                let t = Vector3::new(x[idx + 3], x[idx + 4], x[idx + 5]);
                Iso3::from_parts(Translation3::from(t), UnitQuaternion::from_scaled_axis(w))
            })
            .collect();

        (camera, poses)
    }
}

/// Pixel projection without the in-front check, so the optimiser sees a
/// smooth residual even when a trial step moves points behind the camera.
fn project_raw(camera: &PinholeCamera, p_c: &Pt3) -> (Real, Real) {
    let x = p_c.x / p_c.z;
    let y = p_c.y / p_c.z;
    let (x_d, y_d) = camera.distortion.distort(x, y);
    let k = &camera.intrinsics;
    (k.fx * x_d + k.skew * y_d + k.cx, k.fy * y_d + k.cy)
}

impl NllsProblem for PlanarIntrinsicsProblem<'_> {
    fn num_params(&self) -> usize {
        self.camera_dim() + POSE_DIM * self.num_views()
    }

    fn num_residuals(&self) -> usize {
        self.views.iter().map(|v| 2 * v.len()).sum()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let (camera, poses) = self.unpack(x);

        let mut r = DVector::zeros(self.num_residuals());
        let mut offset = 0;

        for (view, pose) in self.views.iter().zip(&poses) {
            for (pw, meas) in view.world_points.iter().zip(&view.image_points) {
                let (u, v) = project_raw(&camera, &pose.transform_point(pw));
                r[offset] = meas.x - u;
                r[offset + 1] = meas.y - v;
                offset += 2;
            }
        }

        r
    }
}

/// Per-view and overall RMS reprojection error in pixels.
pub fn reprojection_rms(
    camera: &PinholeCamera,
    poses: &[Iso3],
    views: &[ObservationPair],
) -> (Real, Vec<Real>) {
    let mut total_sq = 0.0;
    let mut total_points = 0usize;
    let mut per_view = Vec::with_capacity(views.len());

    for (view, pose) in views.iter().zip(poses) {
        let view_sq: Real = view
            .world_points
            .iter()
            .zip(&view.image_points)
            .map(|(pw, meas)| {
                let (u, v) = project_raw(camera, &pose.transform_point(pw));
                (meas.x - u).powi(2) + (meas.y - v).powi(2)
            })
            .sum();
        per_view.push((view_sq / view.len().max(1) as Real).sqrt());
        total_sq += view_sq;
        total_points += view.len();
    }

    ((total_sq / total_points.max(1) as Real).sqrt(), per_view)
}

fn validate_views(views: &[ObservationPair]) -> Result<(), CalibrateError> {
    if views.len() < MIN_VIEWS {
        return Err(CalibrateError::NotEnoughViews {
            available: views.len(),
            required: MIN_VIEWS,
        });
    }
    for (idx, view) in views.iter().enumerate() {
        if view.image_points.len() != view.world_points.len() {
            return Err(CalibrateError::CountMismatch { view: idx });
        }
        if view.len() < MIN_POINTS_PER_VIEW {
            return Err(CalibrateError::NotEnoughPoints {
                view: idx,
                points: view.len(),
            });
        }
        let image_finite = |p: &Pt2| p.x.is_finite() && p.y.is_finite();
        let world_finite = |p: &Pt3| p.x.is_finite() && p.y.is_finite() && p.z.is_finite();
        if let Some(point) = view
            .image_points
            .iter()
            .zip(&view.world_points)
            .position(|(uv, pw)| !(image_finite(uv) && world_finite(pw)))
        {
            return Err(CalibrateError::NonFinitePoint { view: idx, point });
        }
        if let Some(p) = view.world_points.iter().find(|p| p.z.abs() > PLANAR_TOL) {
            return Err(CalibrateError::NonPlanarPattern { view: idx, z: p.z });
        }
    }
    Ok(())
}

/// Closed-form seed: Zhang intrinsics (skew dropped) and per-view poses.
pub fn initial_guess(views: &[ObservationPair]) -> Result<(PinholeCamera, Vec<Iso3>), CalibrateError> {
    validate_views(views)?;

    let homographies = views
        .iter()
        .enumerate()
        .map(|(view, obs)| {
            dlt_homography(&obs.planar_points(), &obs.image_points)
                .map_err(|source| CalibrateError::Homography { view, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut intrinsics = estimate_intrinsics_from_homographies(&homographies)?;
    intrinsics.skew = 0.0;
    let kmtx = intrinsics.k_matrix();

    let poses = homographies
        .iter()
        .enumerate()
        .map(|(view, h)| {
            estimate_planar_pose_from_h(&kmtx, h)
                .map_err(|source| CalibrateError::Pose { view, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((PinholeCamera::new(intrinsics, BrownConrady5::default()), poses))
}

/// Calibrate a pinhole + plumb_bob camera from planar pattern views.
pub fn calibrate_camera(
    views: &[ObservationPair],
    opts: &PlanarIntrinsicsOptions,
) -> Result<PlanarCalibration, CalibrateError> {
    let (camera0, poses0) = initial_guess(views)?;
    debug!("initial intrinsics: {:?}", camera0.intrinsics);

    let problem = PlanarIntrinsicsProblem::new(views, opts.fix_k3);
    let x0 = problem.pack(&camera0, &poses0);
    let (x_opt, report) = LmBackend.solve(&problem, x0, &opts.solve);

    if !report.converged {
        return Err(CalibrateError::NotConverged {
            iterations: report.iterations,
            termination: report.termination,
        });
    }

    let (camera, poses) = problem.unpack(&x_opt);
    let params_finite = x_opt.iter().all(|v| v.is_finite());
    if !params_finite || !camera.intrinsics.is_finite() {
        return Err(CalibrateError::InvalidSolution(
            "non-finite parameters".to_string(),
        ));
    }
    if camera.intrinsics.fx <= 0.0 || camera.intrinsics.fy <= 0.0 {
        return Err(CalibrateError::InvalidSolution(format!(
            "non-positive focal length (fx={}, fy={})",
            camera.intrinsics.fx, camera.intrinsics.fy
        )));
    }

    let (rms_error, per_view_rms) = reprojection_rms(&camera, &poses, views);
    info!(
        "calibrated {} views: fx={:.3} fy={:.3} cx={:.3} cy={:.3}, rms {:.4} px",
        views.len(),
        camera.intrinsics.fx,
        camera.intrinsics.fy,
        camera.intrinsics.cx,
        camera.intrinsics.cy,
        rms_error
    );

    Ok(PlanarCalibration {
        camera,
        poses,
        rms_error,
        per_view_rms,
        report,
    })
}
