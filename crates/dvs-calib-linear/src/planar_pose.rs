use dvs_calib_core::{Iso3, Mat3, Real};
use nalgebra::{Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use thiserror::Error;

use crate::math::SVD_MAX_ITERATIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanarPoseError {
    #[error("intrinsic matrix is not invertible")]
    SingularIntrinsics,
    #[error("homography columns are degenerate")]
    DegenerateHomography,
    #[error("svd failed")]
    SvdFailed,
}

/// Estimate the pose of a planar board (Z=0) relative to the camera, given
/// intrinsics `K` and the plane → image homography `H`.
///
/// Returns the isometry that maps board coordinates into camera coordinates.
/// The board is assumed to be in front of the camera (`t_z > 0`).
pub fn estimate_planar_pose_from_h(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3, PlanarPoseError> {
    let k_inv = kmtx
        .try_inverse()
        .ok_or(PlanarPoseError::SingularIntrinsics)?;

    let k_inv_h1 = k_inv * hmtx.column(0);
    let k_inv_h2 = k_inv * hmtx.column(1);
    let k_inv_h3 = k_inv * hmtx.column(2);

    // Scale factor λ: average of the first two column norms.
    let norm1 = k_inv_h1.norm();
    let norm2 = k_inv_h2.norm();
    if norm1 + norm2 <= Real::EPSILON {
        return Err(PlanarPoseError::DegenerateHomography);
    }
    let mut lambda = 2.0 / (norm1 + norm2);
    // H is only defined up to sign; pick the one that puts the board in front.
    if k_inv_h3.z < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * k_inv_h1;
    let r2 = lambda * k_inv_h2;
    let r3 = r1.cross(&r2);

    let mut r_mat = Matrix3::<Real>::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    if r_mat.iter().any(|x| !x.is_finite()) {
        return Err(PlanarPoseError::DegenerateHomography);
    }

    // Project onto SO(3) (polar decomposition via SVD).
    let svd = r_mat
        .try_svd(true, true, Real::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or(PlanarPoseError::SvdFailed)?;
    let mut u = svd.u.ok_or(PlanarPoseError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(PlanarPoseError::SvdFailed)?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r_orth = u * v_t;

    let t_vec: Vector3<Real> = lambda * k_inv_h3;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));

    Ok(Iso3::from_parts(Translation3::from(t_vec), rot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvs_calib_core::CameraIntrinsics;
    use nalgebra::Isometry3;

    fn make_kmtx() -> Mat3 {
        CameraIntrinsics {
            fx: 150.0,
            fy: 150.0,
            cx: 64.0,
            cy: 64.0,
            skew: 0.0,
        }
        .k_matrix()
    }

    fn homography_for(kmtx: &Mat3, iso: &Iso3) -> Mat3 {
        let r_binding = iso.rotation.to_rotation_matrix();
        let r_mat = r_binding.matrix();
        let mut hmtx = Mat3::zeros();
        hmtx.set_column(0, &(kmtx * r_mat.column(0)));
        hmtx.set_column(1, &(kmtx * r_mat.column(1)));
        hmtx.set_column(2, &(kmtx * iso.translation.vector));
        hmtx
    }

    fn assert_pose_close(est: &Iso3, gt: &Iso3) {
        assert!((est.translation.vector - gt.translation.vector).norm() < 1e-6);
        let angle = est.rotation.angle_to(&gt.rotation);
        assert!(angle < 1e-6, "rotation error too large: {}", angle);
    }

    #[test]
    fn planar_pose_from_h_recovers_pose() {
        let kmtx = make_kmtx();
        let rot = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let iso_gt = Isometry3::from_parts(
            Translation3::new(0.02, -0.01, 0.4),
            UnitQuaternion::from_rotation_matrix(&rot),
        );

        let hmtx = homography_for(&kmtx, &iso_gt);
        let iso_est = estimate_planar_pose_from_h(&kmtx, &hmtx).unwrap();
        assert_pose_close(&iso_est, &iso_gt);
    }

    #[test]
    fn negated_homography_gives_same_pose() {
        let kmtx = make_kmtx();
        let iso_gt = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.5),
            UnitQuaternion::from_euler_angles(0.3, 0.0, 0.1),
        );

        let hmtx = -homography_for(&kmtx, &iso_gt);
        let iso_est = estimate_planar_pose_from_h(&kmtx, &hmtx).unwrap();
        assert_pose_close(&iso_est, &iso_gt);
    }

    #[test]
    fn singular_k_is_rejected() {
        assert_eq!(
            estimate_planar_pose_from_h(&Mat3::zeros(), &Mat3::identity()),
            Err(PlanarPoseError::SingularIntrinsics)
        );
    }

    #[test]
    fn non_finite_homography_is_rejected() {
        let mut hmtx = Mat3::identity();
        hmtx[(0, 1)] = Real::NAN;
        assert_eq!(
            estimate_planar_pose_from_h(&make_kmtx(), &hmtx),
            Err(PlanarPoseError::DegenerateHomography)
        );
    }
}
