//! Collaborator implementations for replaying recorded detections, tests and
//! the command-line tool.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use dvs_calib_core::{CameraModel, Pt2, Real};
use log::{debug, warn};

use crate::{CameraInfoStore, DiagnosticImage, OutputSink, PatternDetector};

// ─────────────────────────────────────────────────────────────────────────────
// Detector
// ─────────────────────────────────────────────────────────────────────────────

/// Detector that reports whatever pattern it was last handed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDetector {
    width: u32,
    height: u32,
    points: Vec<Pt2>,
}

impl Default for RecordedDetector {
    fn default() -> Self {
        Self::new(128, 128)
    }
}

impl RecordedDetector {
    /// Detector for a `width`×`height` sensor (used for visualization only).
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            points: Vec::new(),
        }
    }

    pub fn report(&mut self, points: Vec<Pt2>) {
        self.points = points;
    }
}

impl PatternDetector for RecordedDetector {
    fn pattern_points(&self) -> Vec<Pt2> {
        self.points.clone()
    }

    fn reset(&mut self) {
        self.points.clear();
    }

    /// Detected points drawn green on black.
    fn visualization_image(&self) -> DiagnosticImage {
        let mut image = DiagnosticImage::blank(self.width, self.height);
        for p in &self.points {
            let (u, v) = (p.x.round(), p.y.round());
            if u < 0.0 || v < 0.0 || u >= self.width as Real || v >= self.height as Real {
                continue;
            }
            let idx = 3 * (v as usize * self.width as usize + u as usize);
            image.data[idx + 1] = 255;
        }
        image
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Camera-info stores
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryCameraInfoStore {
    model: Option<CameraModel>,
    read_only: bool,
}

impl MemoryCameraInfoStore {
    pub fn with_model(model: CameraModel) -> Self {
        Self {
            model: Some(model),
            read_only: false,
        }
    }

    /// Store that rejects every `set`.
    pub fn read_only() -> Self {
        Self {
            model: None,
            read_only: true,
        }
    }
}

impl CameraInfoStore for MemoryCameraInfoStore {
    fn get(&self) -> Option<CameraModel> {
        self.model.clone()
    }

    fn set(&mut self, model: &CameraModel) -> Result<()> {
        if self.read_only {
            bail!("camera-info store is read-only");
        }
        self.model = Some(model.clone());
        Ok(())
    }
}

/// Camera info kept as a pretty-printed JSON file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFileCameraInfoStore {
    path: PathBuf,
}

impl JsonFileCameraInfoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored model.
    ///
    /// `Ok(None)` if the file does not exist. A file that exists but cannot
    /// be read or parsed is an error.
    pub fn load(&self) -> Result<Option<CameraModel>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let model = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(model))
    }
}

impl CameraInfoStore for JsonFileCameraInfoStore {
    /// `None` if the file is missing or unusable. Use
    /// [`JsonFileCameraInfoStore::load`] to tell the two apart.
    fn get(&self) -> Option<CameraModel> {
        self.load().unwrap_or_else(|err| {
            warn!("ignoring camera info: {err:#}");
            None
        })
    }

    fn set(&mut self, model: &CameraModel) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(model)?;
        fs::write(&self.path, json).with_context(|| format!("writing {}", self.path.display()))?;
        debug!("wrote camera info to {}", self.path.display());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps every published output in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSink {
    pub camera_infos: Vec<CameraModel>,
    pub reprojection_errors: Vec<Real>,
    pub visualizations: Vec<DiagnosticImage>,
}

impl OutputSink for RecordingSink {
    fn publish_camera_info(&mut self, model: &CameraModel) {
        self.camera_infos.push(model.clone());
    }

    fn publish_reprojection_error(&mut self, error: Real) {
        self.reprojection_errors.push(error);
    }

    fn publish_visualization(&mut self, image: &DiagnosticImage) {
        self.visualizations.push(image.clone());
    }
}
