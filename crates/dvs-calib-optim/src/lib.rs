//! Non-linear least squares for planar camera calibration.
//!
//! [`NllsProblem`] describes a dense residual/Jacobian problem,
//! [`NllsSolverBackend`] minimises it, and [`calibrate_camera`] runs the full
//! planar pipeline: homographies → Zhang intrinsics → board poses →
//! Levenberg–Marquardt refinement of intrinsics, distortion and poses.

pub mod backend_lm;
pub mod planar_intrinsics;
pub mod traits;

pub use backend_lm::LmBackend;
pub use planar_intrinsics::*;
pub use traits::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
