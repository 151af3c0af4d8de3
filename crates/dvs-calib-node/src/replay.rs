//! Drives a session from a recorded event script.
//!
//! Scripts are JSON:
//!
//! ```json
//! { "events": [
//!     { "type": "load_camera_info" },
//!     { "type": "detection", "camera_id": 1, "points": [[10.0, 12.5], [20.0, 12.4]] },
//!     { "type": "start" },
//!     { "type": "visualize", "camera_id": 1 },
//!     { "type": "commit" }
//! ] }
//! ```
//!
//! Each event is handled to completion before the next; failures are logged
//! and recorded, and the replay continues.

use anyhow::{Context, Result};
use dvs_calib_core::Pt2;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    session::SolveSummary, CalibrationError, CalibrationSession, CalibrationSolver, CameraId,
    CameraInfoStore, OutputSink, RecordedDetector,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    /// The detector for `camera_id` found the pattern at `points`.
    Detection { camera_id: CameraId, points: Vec<Pt2> },
    Start,
    Reset,
    Solve,
    Commit,
    Visualize { camera_id: CameraId },
    /// Check the camera-info store for an existing model.
    LoadCameraInfo,
}

impl ReplayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Detection { .. } => "detection",
            Self::Start => "start",
            Self::Reset => "reset",
            Self::Solve => "solve",
            Self::Commit => "commit",
            Self::Visualize { .. } => "visualize",
            Self::LoadCameraInfo => "load_camera_info",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub events: Vec<ReplayEvent>,
}

impl ReplayScript {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid replay script")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcome {
    pub index: usize,
    pub event: &'static str,
    /// Error message, `None` on success.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    pub outcomes: Vec<EventOutcome>,
    pub solves: usize,
    pub commits: usize,
    pub last_solve: Option<SolveSummary>,
}

impl ReplayReport {
    pub fn failures(&self) -> impl Iterator<Item = &EventOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

/// Feed `events` to `session` in order.
pub fn replay<S, C, O>(
    session: &mut CalibrationSession<RecordedDetector, S, C, O>,
    events: &[ReplayEvent],
) -> ReplayReport
where
    S: CalibrationSolver,
    C: CameraInfoStore,
    O: OutputSink,
{
    let mut report = ReplayReport::default();

    for (index, event) in events.iter().enumerate() {
        let result = dispatch(session, event, &mut report);
        if let Err(err) = &result {
            warn!("event {index} ({}): {err}", event.name());
        }
        report.outcomes.push(EventOutcome {
            index,
            event: event.name(),
            error: result.err().map(|err| err.to_string()),
        });
    }

    info!(
        "replayed {} events: {} solves, {} commits, {} failures",
        events.len(),
        report.solves,
        report.commits,
        report.failures().count()
    );
    report
}

fn dispatch<S, C, O>(
    session: &mut CalibrationSession<RecordedDetector, S, C, O>,
    event: &ReplayEvent,
    report: &mut ReplayReport,
) -> Result<(), CalibrationError>
where
    S: CalibrationSolver,
    C: CameraInfoStore,
    O: OutputSink,
{
    let solved = match event {
        ReplayEvent::Detection { camera_id, points } => {
            session
                .detector_mut(*camera_id)
                .ok_or(CalibrationError::UnknownCamera(*camera_id))?
                .report(points.clone());
            session.add_pattern(*camera_id)?
        }
        ReplayEvent::Start => session.start()?,
        ReplayEvent::Reset => {
            session.reset();
            None
        }
        ReplayEvent::Solve => Some(session.solve()?),
        ReplayEvent::Commit => {
            session.commit()?;
            report.commits += 1;
            None
        }
        ReplayEvent::Visualize { camera_id } => {
            session.update_visualization(*camera_id)?;
            None
        }
        ReplayEvent::LoadCameraInfo => {
            session.load_existing_model();
            None
        }
    };

    if let Some(summary) = solved {
        report.solves += 1;
        report.last_solve = Some(summary);
    }
    Ok(())
}
