//! Numeric helpers shared by the linear solvers.

use dvs_calib_core::{Mat3, Pt2, Real};
use nalgebra::{DMatrix, DVector};

/// Hartley normalization for 2D points.
///
/// Translates the centroid to the origin and scales so that the mean
/// distance from the origin is `√2`.
///
/// Returns the normalized points and `T` such that `p_norm = T * p_h`, or
/// `None` if the input is empty, holds a non-finite coordinate, or all points
/// coincide.
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() || points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
        return None;
    }

    let n = points.len() as Real;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let cx = sx / n;
    let cy = sy / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;

    if mean_dist <= Real::EPSILON {
        return None;
    }

    let scale = (2.0 as Real).sqrt() / mean_dist;
    let t = Mat3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    );

    let norm = points
        .iter()
        .map(|p| Pt2::new((p.x - cx) * scale, (p.y - cy) * scale))
        .collect();

    Some((norm, t))
}

/// Iteration cap for the SVD sweep.
pub const SVD_MAX_ITERATIONS: usize = 1000;

/// Right null vector of `a`: the right singular vector of the smallest
/// singular value.
///
/// Wide systems are zero-padded to square so the null space is part of `V`.
/// Returns `None` for non-finite input or if the SVD does not converge
/// within [`SVD_MAX_ITERATIONS`].
pub fn null_vector(a: &DMatrix<Real>) -> Option<DVector<Real>> {
    if a.iter().any(|x| !x.is_finite()) {
        return None;
    }

    let a_work = if a.nrows() < a.ncols() {
        let mut padded = DMatrix::<Real>::zeros(a.ncols(), a.ncols());
        padded.view_mut((0, 0), (a.nrows(), a.ncols())).copy_from(a);
        padded
    } else {
        a.clone()
    };

    let svd = a_work.try_svd(false, true, Real::EPSILON, SVD_MAX_ITERATIONS)?;
    let v_t = svd.v_t?;
    let idx = svd.singular_values.imin();
    Some(v_t.row(idx).transpose())
}
