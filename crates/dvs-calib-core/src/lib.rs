//! Core math and camera primitives for the DVS calibration workspace.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - the pinhole camera with Brown–Conrady ("plumb_bob") distortion,
//! - [`ObservationPair`], one detected pattern instance,
//! - [`CameraModel`], the published/persisted camera-info record,
//! - deterministic synthetic planar data for tests and demos.
//!
//! Camera pipeline:
//! `pixel = K ∘ distortion ∘ projection(p_cam)`

/// Published camera-info record.
pub mod camera_info;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Camera models and distortion utilities.
pub mod models;
/// Observation pairs (image points + known pattern points).
pub mod observation;
/// Synthetic planar targets and poses.
pub mod synthetic;

pub use camera_info::*;
pub use math::*;
pub use models::*;
pub use observation::*;
