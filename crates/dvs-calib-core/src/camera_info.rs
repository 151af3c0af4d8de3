//! Camera-info record as published to downstream consumers and persisted by
//! the camera-info store.
//!
//! The layout mirrors a ROS `sensor_msgs/CameraInfo`: image size, the
//! distortion model label, 5 plumb_bob coefficients `D` and the row-major
//! 3×3 intrinsic matrix `K`.

use serde::{Deserialize, Serialize};

use crate::{mat3_from_row_major, mat3_to_row_major, BrownConrady5, CameraIntrinsics, PinholeCamera};

/// Distortion model identifier for 5-coefficient Brown–Conrady.
pub const PLUMB_BOB: &str = "plumb_bob";

/// Number of distortion coefficients in the plumb_bob model.
pub const DISTORTION_LEN: usize = 5;
/// Number of entries in the flattened intrinsic matrix.
pub const INTRINSICS_LEN: usize = 9;

/// Sensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub width: u32,
    pub height: u32,
    pub distortion_model: String,
    /// Distortion coefficients `(k1, k2, p1, p2, k3)`.
    pub d: [f64; DISTORTION_LEN],
    /// Intrinsic matrix, row-major.
    pub k: [f64; INTRINSICS_LEN],
}

impl CameraModel {
    pub fn new(resolution: Resolution, d: [f64; DISTORTION_LEN], k: [f64; INTRINSICS_LEN]) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            distortion_model: PLUMB_BOB.to_string(),
            d,
            k,
        }
    }

    pub fn from_camera(resolution: Resolution, camera: &PinholeCamera) -> Self {
        Self::new(
            resolution,
            camera.distortion.coefficients(),
            mat3_to_row_major(&camera.intrinsics.k_matrix()),
        )
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Intrinsics recovered from `K`; `None` if `K` is not upper triangular.
    pub fn intrinsics(&self) -> Option<CameraIntrinsics> {
        CameraIntrinsics::try_from_k_matrix(&mat3_from_row_major(&self.k))
    }

    pub fn distortion(&self) -> BrownConrady5 {
        BrownConrady5::from_coefficients(&self.d)
    }

    pub fn camera(&self) -> Option<PinholeCamera> {
        Some(PinholeCamera::new(self.intrinsics()?, self.distortion()))
    }
}
