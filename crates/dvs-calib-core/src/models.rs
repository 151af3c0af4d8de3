use serde::{Deserialize, Serialize};

use crate::{Mat3, Pt2, Pt3, Real};

/// Pinhole intrinsics.
///
/// The corresponding calibration matrix `K` has the form:
///
/// ```text
/// [ fx  skew  cx ]
/// [  0   fy   cy ]
/// [  0    0    1 ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
    pub skew: Real,
}

impl CameraIntrinsics {
    /// Build the 3×3 calibration matrix `K`.
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, self.skew, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    /// Attempt to construct intrinsics from a 3×3 calibration matrix `K`.
    ///
    /// The matrix is first normalised so that `K[2, 2] == 1`. If the lower
    /// triangle is not zero within a small tolerance, `None` is returned.
    pub fn try_from_k_matrix(k: &Mat3) -> Option<Self> {
        let eps = 1e-9;

        let k33 = k[(2, 2)];
        if k33.abs() < eps {
            return None;
        }
        let k_norm = *k / k33;

        if k_norm[(1, 0)].abs() > eps || k_norm[(2, 0)].abs() > eps || k_norm[(2, 1)].abs() > eps
        {
            return None;
        }

        Some(Self {
            fx: k_norm[(0, 0)],
            skew: k_norm[(0, 1)],
            cx: k_norm[(0, 2)],
            fy: k_norm[(1, 1)],
            cy: k_norm[(1, 2)],
        })
    }

    pub fn is_finite(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy, self.skew]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Brown–Conrady radial–tangential distortion, the ROS "plumb_bob" model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: Real,
    pub k2: Real,
    pub p1: Real,
    pub p2: Real,
    pub k3: Real,
}

impl BrownConrady5 {
    /// Coefficients in plumb_bob order `(k1, k2, p1, p2, k3)`.
    pub fn coefficients(&self) -> [Real; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_coefficients(d: &[Real; 5]) -> Self {
        Self {
            k1: d[0],
            k2: d[1],
            p1: d[2],
            p2: d[3],
            k3: d[4],
        }
    }

    /// Apply distortion to normalised image coordinates.
    pub fn distort(&self, x: Real, y: Real) -> (Real, Real) {
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let x_t = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_t = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (x * radial + x_t, y * radial + y_t)
    }
}

/// Pinhole camera with Brown–Conrady distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: CameraIntrinsics,
    pub distortion: BrownConrady5,
}

impl PinholeCamera {
    pub fn new(intrinsics: CameraIntrinsics, distortion: BrownConrady5) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Project a 3D point in camera coordinates to distorted pixel coordinates.
    ///
    /// Returns `None` for points on or behind the camera plane.
    pub fn project(&self, p_c: &Pt3) -> Option<Pt2> {
        if p_c.z <= Real::EPSILON {
            return None;
        }
        let x = p_c.x / p_c.z;
        let y = p_c.y / p_c.z;
        let (x_d, y_d) = self.distortion.distort(x, y);

        let k = &self.intrinsics;
        let u = k.fx * x_d + k.skew * y_d + k.cx;
        let v = k.fy * y_d + k.cy;
        Some(Pt2::new(u, v))
    }
}
