//! Observation pairs for calibration data.
//!
//! One [`ObservationPair`] is a single detected instance of the calibration
//! pattern: the image-space points reported by the detector, paired with the
//! known world-space geometry of the pattern.

use crate::{Pt2, Pt3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("image / world point counts must match: {image_points} vs {world_points}")]
    CountMismatch {
        image_points: usize,
        world_points: usize,
    },
}

/// A detected pattern instance with its known pattern geometry.
///
/// ```
/// use dvs_calib_core::{ObservationPair, Pt2, Pt3};
///
/// let world = vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(0.03, 0.0, 0.0)];
/// let image = vec![Pt2::new(40.0, 40.0), Pt2::new(50.0, 40.0)];
/// let obs = ObservationPair::new(image, world).unwrap();
/// assert_eq!(obs.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationPair {
    /// Detected pattern points in pixels, in pattern order.
    pub image_points: Vec<Pt2>,
    /// Known pattern points in the pattern frame.
    pub world_points: Vec<Pt3>,
}

impl ObservationPair {
    pub fn new(image_points: Vec<Pt2>, world_points: Vec<Pt3>) -> Result<Self, ObservationError> {
        if image_points.len() != world_points.len() {
            return Err(ObservationError::CountMismatch {
                image_points: image_points.len(),
                world_points: world_points.len(),
            });
        }
        Ok(Self {
            image_points,
            world_points,
        })
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }

    /// World points projected onto the pattern plane (drops `z`).
    pub fn planar_points(&self) -> Vec<Pt2> {
        self.world_points
            .iter()
            .map(|p| Pt2::new(p.x, p.y))
            .collect()
    }
}
