use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Iso3 = Isometry3<Real>;

pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Flatten a 3×3 matrix in row-major order (`K[0] = k(0,0)`, `K[1] = k(0,1)`, ...).
pub fn mat3_to_row_major(m: &Mat3) -> [Real; 9] {
    let mut out = [0.0; 9];
    for r in 0..3 {
        for c in 0..3 {
            out[3 * r + c] = m[(r, c)];
        }
    }
    out
}

/// Inverse of [`mat3_to_row_major`].
pub fn mat3_from_row_major(k: &[Real; 9]) -> Mat3 {
    Mat3::from_row_slice(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_layout_matches_camera_matrix() {
        let k = Mat3::new(100.0, 0.5, 64.0, 0.0, 110.0, 60.0, 0.0, 0.0, 1.0);
        let flat = mat3_to_row_major(&k);
        assert_eq!(flat, [100.0, 0.5, 64.0, 0.0, 110.0, 60.0, 0.0, 0.0, 1.0]);
        assert_eq!(mat3_from_row_major(&flat), k);
    }

    #[test]
    fn homogeneous_helpers_are_inverse() {
        let p = Pt2::new(3.0, -2.0);
        let h = to_homogeneous(&p) * 4.0;
        assert_eq!(from_homogeneous(&h), p);
    }
}
