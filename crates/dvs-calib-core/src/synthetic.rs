//! Deterministic synthetic planar targets.
//!
//! Small building blocks for constructing synthetic calibration problems in
//! tests and demos:
//! - planar point grids (Z=0),
//! - board poses centred in front of the camera or spread over the view,
//! - projection into [`ObservationPair`]s,
//! - reproducible pixel noise.
//!
//! ```
//! use dvs_calib_core::{synthetic, BrownConrady5, CameraIntrinsics, PinholeCamera};
//!
//! let k = CameraIntrinsics { fx: 150.0, fy: 150.0, cx: 64.0, cy: 64.0, skew: 0.0 };
//! let cam = PinholeCamera::new(k, BrownConrady5::default());
//!
//! let board = synthetic::grid_points(6, 5, 0.02);
//! let poses = synthetic::poses_tilted_around_board(&board, 8, 0.35, 0.4);
//! let views = synthetic::project_views(&cam, &board, &poses).unwrap();
//! assert_eq!(views.len(), 8);
//! ```

use crate::{Iso3, ObservationPair, PinholeCamera, Pt3, Real, Vec2};
use anyhow::{bail, Result};
use nalgebra::{Translation3, UnitQuaternion, Vector3};

/// Generate a planar grid of 3D points (Z=0) with `nx * ny` points.
///
/// Points are ordered row-major (Y major): `(x = 0..nx-1, y = 0..ny-1)`.
pub fn grid_points(nx: usize, ny: usize, spacing: Real) -> Vec<Pt3> {
    let mut points = Vec::with_capacity(nx.saturating_mul(ny));
    for j in 0..ny {
        for i in 0..nx {
            points.push(Pt3::new(i as Real * spacing, j as Real * spacing, 0.0));
        }
    }
    points
}

fn centroid(points: &[Pt3]) -> Vector3<Real> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc: Vector3<Real>, p| acc + p.coords);
    sum / points.len() as Real
}

/// Generate `n_views` camera-from-board poses.
///
/// Every pose tilts the board by `tilt_rad` around an in-plane axis that
/// rotates evenly through 180°, and places the board centroid on the optical
/// axis at `distance`. Tilt axes are pairwise non-parallel, which keeps the
/// closed-form intrinsics estimate well conditioned.
pub fn poses_tilted_around_board(
    board: &[Pt3],
    n_views: usize,
    tilt_rad: Real,
    distance: Real,
) -> Vec<Iso3> {
    let center = centroid(board);
    (0..n_views)
        .map(|view_idx| {
            let phi = std::f64::consts::PI * view_idx as Real / n_views.max(1) as Real;
            let axis = Vector3::new(phi.cos(), phi.sin(), 0.0);
            let roll = 0.05 * if view_idx % 2 == 0 { 1.0 } else { -1.0 };
            let rotation = UnitQuaternion::from_scaled_axis(Vector3::z() * roll)
                * UnitQuaternion::from_scaled_axis(axis * tilt_rad);
            let translation = Vector3::new(0.0, 0.0, distance) - rotation * center;
            Iso3::from_parts(Translation3::from(translation), rotation)
        })
        .collect()
}

/// Generate `n_views` poses that move the board around the field of view.
///
/// Tilt axes rotate through 180° as in [`poses_tilted_around_board`], but the
/// tilt magnitude cycles through `0.7, 1.0, 1.3 × tilt_rad`, the depth cycles
/// through `0.85..=1.15 × distance`, and the centroid is shifted off axis by
/// `spread × depth` in a direction that turns once around the image centre.
/// Views that differ in depth and image position separate the principal
/// point from the board pose far better than centred views do.
pub fn poses_spread_over_view(
    board: &[Pt3],
    n_views: usize,
    tilt_rad: Real,
    distance: Real,
    spread: Real,
) -> Vec<Iso3> {
    let center = centroid(board);
    let n = n_views.max(1) as Real;
    (0..n_views)
        .map(|view_idx| {
            let phi = std::f64::consts::PI * view_idx as Real / n;
            let axis = Vector3::new(phi.cos(), phi.sin(), 0.0);
            let roll = 0.05 * if view_idx % 2 == 0 { 1.0 } else { -1.0 };
            let tilt = tilt_rad * (0.7 + 0.3 * (view_idx % 3) as Real);
            let rotation = UnitQuaternion::from_scaled_axis(Vector3::z() * roll)
                * UnitQuaternion::from_scaled_axis(axis * tilt);

            let depth = distance * (0.85 + 0.1 * (view_idx % 4) as Real);
            let psi = 2.0 * std::f64::consts::PI * (view_idx as Real + 0.5) / n;
            let offset = Vector3::new(spread * depth * psi.cos(), spread * depth * psi.sin(), depth);
            let translation = offset - rotation * center;
            Iso3::from_parts(Translation3::from(translation), rotation)
        })
        .collect()
}

/// Project the board through `camera`, requiring every point to be visible.
pub fn project_view(
    camera: &PinholeCamera,
    cam_from_board: &Iso3,
    board: &[Pt3],
) -> Result<ObservationPair> {
    let mut pixels = Vec::with_capacity(board.len());
    for (idx, pw) in board.iter().enumerate() {
        let pc = cam_from_board.transform_point(pw);
        let Some(uv) = camera.project(&pc) else {
            bail!("point {idx} not projectable (z={:.6})", pc.z);
        };
        pixels.push(uv);
    }
    Ok(ObservationPair::new(pixels, board.to_vec())?)
}

/// Project multiple views, requiring every point to be visible in every view.
pub fn project_views(
    camera: &PinholeCamera,
    board: &[Pt3],
    cam_from_board: &[Iso3],
) -> Result<Vec<ObservationPair>> {
    cam_from_board
        .iter()
        .map(|pose| project_view(camera, pose, board))
        .collect()
}

/// Reproducible uniform pixel noise in `[-max_abs_px, +max_abs_px]` per axis.
///
/// Samples depend only on `(seed, view, point)`, not on any RNG crate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelNoise {
    pub seed: u64,
    pub max_abs_px: Real,
}

impl PixelNoise {
    pub fn sample(&self, view_idx: usize, point_idx: usize) -> Vec2 {
        let max_abs = self.max_abs_px.abs();
        if max_abs == 0.0 {
            return Vec2::zeros();
        }

        let key = self.seed
            ^ (view_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (point_idx as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        let u = unit_interval(splitmix64(key));
        let v = unit_interval(splitmix64(key ^ 0x94D0_49BB_1331_11EB));
        Vec2::new((u - 0.5) * 2.0 * max_abs, (v - 0.5) * 2.0 * max_abs)
    }

    /// Perturb the image points of every view in place.
    pub fn apply(&self, views: &mut [ObservationPair]) {
        for (view_idx, view) in views.iter_mut().enumerate() {
            for (point_idx, uv) in view.image_points.iter_mut().enumerate() {
                *uv += self.sample(view_idx, point_idx);
            }
        }
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Top 53 bits mapped to `[0, 1)`.
fn unit_interval(x: u64) -> Real {
    (x >> 11) as Real * (1.0 / (1u64 << 53) as Real)
}
