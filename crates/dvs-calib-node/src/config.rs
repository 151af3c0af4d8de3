//! Session configuration, loadable from JSON with every field optional.

use anyhow::{ensure, Result};
use dvs_calib_core::{synthetic, Pt3, Real, Resolution};
use dvs_calib_optim::{SolveOptions, MIN_POINTS_PER_VIEW, MIN_VIEWS};
use serde::{Deserialize, Serialize};

use crate::{CameraId, SolverFlags};

/// What `add_pattern` does after storing an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddPatternPolicy {
    /// Only store; solving happens on `start()` or an explicit `solve()`.
    #[default]
    Accumulate,
    /// Store, then re-solve whenever the session is running.
    SolveWhileRunning,
}

/// Geometry of the planar calibration pattern (a grid of dots at Z=0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub cols: usize,
    pub rows: usize,
    /// Dot pitch in meters.
    pub spacing: Real,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            cols: 5,
            rows: 5,
            spacing: 0.05,
        }
    }
}

impl PatternConfig {
    /// World points in detector order (row-major, X fastest).
    pub fn world_points(&self) -> Vec<Pt3> {
        synthetic::grid_points(self.cols, self.rows, self.spacing)
    }

    pub fn num_points(&self) -> usize {
        self.cols * self.rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Camera
    // ─────────────────────────────────────────────────────────────────────────
    /// Camera whose observations are calibrated.
    pub camera_id: CameraId,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub pattern: PatternConfig,

    // ─────────────────────────────────────────────────────────────────────────
    // Solving
    // ─────────────────────────────────────────────────────────────────────────
    /// Keep the third radial distortion coefficient at zero.
    pub fix_k3: bool,
    /// Observations required before the solver is invoked.
    pub min_observations: usize,
    pub add_pattern_policy: AddPatternPolicy,
    /// Refinement settings for the built-in solver. The session never reads
    /// them; build the solver with [`crate::PlanarSolver::from_config`].
    pub solver: SolveOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_id: CameraId::default(),
            // DVS128
            sensor_width: 128,
            sensor_height: 128,
            pattern: PatternConfig::default(),
            fix_k3: true,
            min_observations: MIN_VIEWS,
            add_pattern_policy: AddPatternPolicy::Accumulate,
            solver: SolveOptions::default(),
        }
    }
}

impl SessionConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.sensor_width, self.sensor_height)
    }

    pub fn solver_flags(&self) -> SolverFlags {
        SolverFlags {
            fix_k3: self.fix_k3,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.sensor_width > 0 && self.sensor_height > 0,
            "sensor size must be positive (got {})",
            self.resolution()
        );
        ensure!(
            self.pattern.num_points() >= MIN_POINTS_PER_VIEW,
            "pattern needs at least {} points (got {}x{})",
            MIN_POINTS_PER_VIEW,
            self.pattern.cols,
            self.pattern.rows
        );
        ensure!(
            self.pattern.spacing.is_finite() && self.pattern.spacing > 0.0,
            "pattern spacing must be positive (got {})",
            self.pattern.spacing
        );
        ensure!(self.min_observations > 0, "min_observations must be at least 1");
        Ok(())
    }
}
