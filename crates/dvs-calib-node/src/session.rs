//! The calibration session: pattern bookkeeping and the start/reset/solve
//! lifecycle.
//!
//! ```text
//!            start()                 reset()
//!   Idle ───────────────▶ Running ───────────────▶ Idle
//!     ▲                                              │
//!     └──────────────────── reset() ─────────────────┘
//! ```
//!
//! Observations can be added in either state. `start()` solves once if
//! anything has been collected; whether `add_pattern` re-solves while running
//! is decided by [`AddPatternPolicy`].

use std::collections::BTreeMap;

use dvs_calib_core::{CameraModel, ObservationPair, Pt3, Real};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    AddPatternPolicy, CalibrationError, CalibrationSolver, CameraId, CameraInfoStore, OutputSink,
    PatternDetector, PatternStore, ResultPublisher, SessionConfig, SolverOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
}

/// Outcome of a successful solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveSummary {
    pub model: CameraModel,
    /// RMS reprojection error in pixels.
    pub reprojection_error: Real,
    pub per_view_errors: Vec<Real>,
    pub observations: usize,
    pub iterations: usize,
}

#[derive(Debug)]
struct CameraSlot<D> {
    detector: D,
    store: PatternStore,
}

/// Accumulates pattern observations per camera and drives the solver.
///
/// All operations take `&mut self` and run to completion; a multi-threaded
/// host must put the whole session behind one lock so a solve never sees a
/// store that is being appended to or reset.
pub struct CalibrationSession<D, S, C, O> {
    config: SessionConfig,
    world_pattern: Vec<Pt3>,
    cameras: BTreeMap<CameraId, CameraSlot<D>>,
    state: SessionState,
    detections: usize,
    solver: S,
    camera_info: C,
    external_model: bool,
    publisher: ResultPublisher<O>,
}

impl<D, S, C, O> CalibrationSession<D, S, C, O>
where
    D: PatternDetector,
    S: CalibrationSolver,
    C: CameraInfoStore,
    O: OutputSink,
{
    pub fn new(config: SessionConfig, solver: S, camera_info: C, sink: O) -> Self {
        let world_pattern = config.pattern.world_points();
        Self {
            config,
            world_pattern,
            cameras: BTreeMap::new(),
            state: SessionState::Idle,
            detections: 0,
            solver,
            camera_info,
            external_model: false,
            publisher: ResultPublisher::new(sink),
        }
    }

    /// Attach a detector to `camera_id`, returning the one it replaces.
    ///
    /// Observations already stored for the camera are kept.
    pub fn register_camera(&mut self, camera_id: CameraId, detector: D) -> Option<D> {
        match self.cameras.get_mut(&camera_id) {
            Some(slot) => Some(std::mem::replace(&mut slot.detector, detector)),
            None => {
                debug!("registered camera {camera_id}");
                self.cameras.insert(
                    camera_id,
                    CameraSlot {
                        detector,
                        store: PatternStore::new(),
                    },
                );
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Enter `Running`; solve once if observations are already collected.
    ///
    /// The state changes even when that solve fails.
    pub fn start(&mut self) -> Result<Option<SolveSummary>, CalibrationError> {
        self.state = SessionState::Running;
        let count = self.count();
        info!("calibration started with {count} observations");
        if count == 0 {
            return Ok(None);
        }
        self.solve().map(Some)
    }

    /// Enter `Idle` and discard every observation and detector state.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        for slot in self.cameras.values_mut() {
            slot.store.reset();
            slot.detector.reset();
        }
        self.detections = 0;
        info!("calibration reset");
    }

    /// Store the detector's current pattern for `camera_id`.
    ///
    /// Patterns of the wrong size or with a non-finite coordinate are
    /// rejected and not stored.
    ///
    /// Returns the solve result when [`AddPatternPolicy::SolveWhileRunning`]
    /// triggered one. A failed solve is returned as an error, but the
    /// observation stays stored.
    pub fn add_pattern(
        &mut self,
        camera_id: CameraId,
    ) -> Result<Option<SolveSummary>, CalibrationError> {
        let slot = self
            .cameras
            .get_mut(&camera_id)
            .ok_or(CalibrationError::UnknownCamera(camera_id))?;

        let image_points = slot.detector.pattern_points();
        let mismatch = CalibrationError::PatternSizeMismatch {
            image_points: image_points.len(),
            world_points: self.world_pattern.len(),
        };
        if image_points.len() != self.world_pattern.len() {
            return Err(mismatch);
        }
        if let Some(point) = image_points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite()))
        {
            return Err(CalibrationError::NonFinitePattern { camera_id, point });
        }
        let observation = ObservationPair::new(image_points, self.world_pattern.clone())
            .map_err(|_| mismatch)?;
        slot.store.append(observation);
        self.detections += 1;
        debug!(
            "camera {camera_id}: pattern {} stored ({} detections total)",
            slot.store.count(),
            self.detections
        );

        let resolve = self.config.add_pattern_policy == AddPatternPolicy::SolveWhileRunning
            && self.state == SessionState::Running
            && camera_id == self.config.camera_id;
        if !resolve {
            return Ok(None);
        }
        if self.count() < self.config.min_observations {
            debug!(
                "skipping solve: {} of {} observations",
                self.count(),
                self.config.min_observations
            );
            return Ok(None);
        }
        self.solve().map(Some)
    }

    /// Calibrate the configured camera from every stored observation and
    /// publish the result.
    ///
    /// On failure the last model, the published outputs and the session
    /// state are left untouched.
    pub fn solve(&mut self) -> Result<SolveSummary, CalibrationError> {
        let available = self.count();
        let required = self.config.min_observations;
        if available < required {
            warn!("cannot calibrate: {available} observations, need {required}");
            return Err(CalibrationError::InsufficientObservations {
                available,
                required,
            });
        }

        let (object_points, image_points) = self
            .cameras
            .get(&self.config.camera_id)
            .map(|slot| slot.store.solver_inputs())
            .unwrap_or_default();
        let resolution = self.config.resolution();

        let output = self
            .solver
            .solve(
                &object_points,
                &image_points,
                resolution,
                self.config.solver_flags(),
            )
            .map_err(|err| {
                warn!("calibration failed: {err}");
                CalibrationError::from(err)
            })?;
        check_finite(&output)?;

        let model = self.publisher.publish(resolution, &output)?;
        info!(
            "calibrated from {available} observations: rms {:.4} px",
            output.reprojection_error
        );

        Ok(SolveSummary {
            model,
            reprojection_error: output.reprojection_error,
            per_view_errors: output.per_view_errors,
            observations: available,
            iterations: output.iterations,
        })
    }

    /// Hand the last known model to the camera-info store.
    pub fn commit(&mut self) -> Result<(), CalibrationError> {
        let model = self
            .publisher
            .last_model()
            .ok_or(CalibrationError::NoModelAvailable)?;
        self.camera_info.set(model).map_err(|err| {
            warn!("saving camera info failed: {err:#}");
            CalibrationError::PersistenceFailure(format!("{err:#}"))
        })?;
        info!("camera info saved");
        Ok(())
    }

    /// Query the camera-info store for a model that already exists.
    ///
    /// If one is found and nothing has been solved yet, it becomes the last
    /// known model, so `commit()` writes it back unchanged. A store that
    /// cannot produce a model reports none, so an unreadable record counts
    /// as absent here.
    pub fn load_existing_model(&mut self) -> bool {
        let Some(model) = self.camera_info.get() else {
            return false;
        };
        self.external_model = true;
        if self.publisher.last_model().is_none() {
            debug!("adopting existing camera info ({}x{})", model.width, model.height);
            self.publisher.adopt(model);
        }
        true
    }

    pub fn has_external_model(&self) -> bool {
        self.external_model
    }

    /// Forward the detector's diagnostic image for `camera_id` to the sink.
    pub fn update_visualization(&mut self, camera_id: CameraId) -> Result<(), CalibrationError> {
        let slot = self
            .cameras
            .get(&camera_id)
            .ok_or(CalibrationError::UnknownCamera(camera_id))?;
        let image = slot.detector.visualization_image();
        self.publisher.publish_visualization(&image);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Observations stored for the calibrated camera.
    pub fn count(&self) -> usize {
        self.store(self.config.camera_id)
            .map_or(0, PatternStore::count)
    }

    /// Accepted detections over all cameras since the last reset.
    pub fn detections(&self) -> usize {
        self.detections
    }

    pub fn store(&self, camera_id: CameraId) -> Option<&PatternStore> {
        self.cameras.get(&camera_id).map(|slot| &slot.store)
    }

    pub fn detector(&self, camera_id: CameraId) -> Option<&D> {
        self.cameras.get(&camera_id).map(|slot| &slot.detector)
    }

    pub fn detector_mut(&mut self, camera_id: CameraId) -> Option<&mut D> {
        self.cameras.get_mut(&camera_id).map(|slot| &mut slot.detector)
    }

    pub fn cameras(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.cameras.keys().copied()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn world_pattern(&self) -> &[Pt3] {
        &self.world_pattern
    }

    pub fn last_model(&self) -> Option<&CameraModel> {
        self.publisher.last_model()
    }

    pub fn publisher(&self) -> &ResultPublisher<O> {
        &self.publisher
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn camera_info(&self) -> &C {
        &self.camera_info
    }
}

fn check_finite(output: &SolverOutput) -> Result<(), CalibrationError> {
    let finite = output.camera_matrix.iter().all(|v| v.is_finite())
        && output.dist_coeffs.iter().all(|v| v.is_finite())
        && output.reprojection_error.is_finite();
    if finite {
        Ok(())
    } else {
        Err(CalibrationError::SolverDivergence(
            "solver returned non-finite values".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        MemoryCameraInfoStore, PatternConfig, RecordedDetector, RecordingSink, SolverError,
        SolverFlags,
    };
    use dvs_calib_core::{Pt2, Resolution};
    use nalgebra::{DMatrix, DVector};

    /// Counts calls and returns a fixed output.
    #[derive(Debug, Default)]
    struct MockSolver {
        calls: usize,
        last_views: usize,
        fail_with: Option<SolverError>,
        dist_len: Option<usize>,
    }

    impl CalibrationSolver for MockSolver {
        fn solve(
            &mut self,
            object_points: &[Vec<Pt3>],
            image_points: &[Vec<Pt2>],
            _resolution: Resolution,
            _flags: SolverFlags,
        ) -> Result<SolverOutput, SolverError> {
            self.calls += 1;
            assert_eq!(object_points.len(), image_points.len());
            self.last_views = object_points.len();
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            Ok(SolverOutput {
                camera_matrix: DMatrix::from_row_slice(
                    3,
                    3,
                    &[150.0, 0.0, 64.0, 0.0, 150.0, 64.0, 0.0, 0.0, 1.0],
                ),
                dist_coeffs: DVector::zeros(self.dist_len.unwrap_or(5)),
                rvecs: Vec::new(),
                tvecs: Vec::new(),
                reprojection_error: 0.1,
                per_view_errors: vec![0.1; object_points.len()],
                iterations: 7,
            })
        }
    }

    type TestSession =
        CalibrationSession<RecordedDetector, MockSolver, MemoryCameraInfoStore, RecordingSink>;

    const CAM: CameraId = CameraId(1);

    fn config() -> SessionConfig {
        SessionConfig {
            pattern: PatternConfig {
                cols: 2,
                rows: 2,
                spacing: 0.1,
            },
            ..Default::default()
        }
    }

    fn session_with(config: SessionConfig, solver: MockSolver) -> TestSession {
        let mut session = CalibrationSession::new(
            config,
            solver,
            MemoryCameraInfoStore::default(),
            RecordingSink::default(),
        );
        session.register_camera(CAM, RecordedDetector::default());
        session
    }

    fn session() -> TestSession {
        session_with(config(), MockSolver::default())
    }

    fn detect(
        session: &mut TestSession,
        camera_id: CameraId,
    ) -> Result<Option<SolveSummary>, CalibrationError> {
        let points = (0..4).map(|i| Pt2::new(10.0 * i as f64, 5.0)).collect();
        session
            .detector_mut(camera_id)
            .ok_or(CalibrationError::UnknownCamera(camera_id))?
            .report(points);
        session.add_pattern(camera_id)
    }

    #[test]
    fn count_is_number_of_adds_and_zero_after_reset() {
        for n in 0..5 {
            let mut session = session();
            for _ in 0..n {
                detect(&mut session, CAM).unwrap();
            }
            assert_eq!(session.count(), n);
            assert_eq!(session.detections(), n);

            session.reset();
            assert_eq!(session.count(), 0);
            assert_eq!(session.detections(), 0);
        }
    }

    #[test]
    fn reset_twice_equals_reset_once() {
        let mut session = session();
        detect(&mut session, CAM).unwrap();
        session.start().ok();

        session.reset();
        let after_one = (session.state(), session.count(), session.store(CAM).cloned());
        session.reset();
        let after_two = (session.state(), session.count(), session.store(CAM).cloned());

        assert_eq!(after_one, after_two);
        assert_eq!(after_two.0, SessionState::Idle);
        assert!(session.detector(CAM).unwrap().pattern_points().is_empty());
    }

    #[test]
    fn start_without_observations_does_not_solve() {
        let mut session = session();
        assert_eq!(session.start().unwrap(), None);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.solver().calls, 0);
    }

    #[test]
    fn start_with_observations_solves_exactly_once() {
        let mut session = session();
        for _ in 0..4 {
            detect(&mut session, CAM).unwrap();
        }
        assert_eq!(session.solver().calls, 0);

        let summary = session.start().unwrap().unwrap();
        assert_eq!(session.solver().calls, 1);
        assert_eq!(session.solver().last_views, 4);
        assert_eq!(summary.observations, 4);
        assert_eq!(summary.iterations, 7);
        assert_eq!(session.publisher().sink().camera_infos.len(), 1);
        assert_eq!(session.publisher().sink().reprojection_errors, vec![0.1]);
    }

    #[test]
    fn start_below_minimum_reports_insufficient_observations() {
        let mut session = session();
        detect(&mut session, CAM).unwrap();

        let err = session.start().unwrap_err();
        assert_eq!(
            err,
            CalibrationError::InsufficientObservations {
                available: 1,
                required: 3
            }
        );
        assert!(session.is_running());
        assert!(session.last_model().is_none());
    }

    #[test]
    fn solve_with_no_observations_fails_and_changes_nothing() {
        let mut session = session();
        let err = session.solve().unwrap_err();

        assert_eq!(
            err,
            CalibrationError::InsufficientObservations {
                available: 0,
                required: 3
            }
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.solver().calls, 0);
        assert!(session.publisher().sink().camera_infos.is_empty());
        assert!(session.last_model().is_none());
    }

    #[test]
    fn failed_solve_keeps_previous_model() {
        let mut session = session();
        for _ in 0..3 {
            detect(&mut session, CAM).unwrap();
        }
        let first = session.solve().unwrap().model;

        session.solver.fail_with = Some(SolverError::Divergence("max iterations".into()));
        let err = session.solve().unwrap_err();

        assert!(matches!(err, CalibrationError::SolverDivergence(_)));
        assert_eq!(session.last_model(), Some(&first));
        assert_eq!(session.publisher().sink().camera_infos.len(), 1);
    }

    #[test]
    fn shape_mismatch_from_solver_is_surfaced() {
        let solver = MockSolver {
            dist_len: Some(4),
            ..Default::default()
        };
        let mut session = session_with(config(), solver);
        for _ in 0..3 {
            detect(&mut session, CAM).unwrap();
        }

        let err = session.solve().unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::ShapeMismatch {
                field: "dist_coeffs",
                ..
            }
        ));
        assert!(session.last_model().is_none());
    }

    #[test]
    fn accumulate_policy_never_solves_on_add() {
        let mut session = session();
        session.start().unwrap();
        for _ in 0..5 {
            assert_eq!(detect(&mut session, CAM).unwrap(), None);
        }
        assert_eq!(session.solver().calls, 0);
    }

    #[test]
    fn solve_while_running_policy_resolves_after_minimum() {
        let config = SessionConfig {
            add_pattern_policy: AddPatternPolicy::SolveWhileRunning,
            ..config()
        };
        let mut session = session_with(config, MockSolver::default());

        // Idle: only stored.
        detect(&mut session, CAM).unwrap();
        session.start().ok();
        assert_eq!(session.solver().calls, 0);

        assert_eq!(detect(&mut session, CAM).unwrap(), None);
        assert!(detect(&mut session, CAM).unwrap().is_some());
        assert!(detect(&mut session, CAM).unwrap().is_some());
        assert_eq!(session.solver().calls, 2);
        assert_eq!(session.solver().last_views, 4);
    }

    #[test]
    fn failed_solve_on_add_keeps_observation() {
        let config = SessionConfig {
            add_pattern_policy: AddPatternPolicy::SolveWhileRunning,
            min_observations: 1,
            ..config()
        };
        let solver = MockSolver {
            fail_with: Some(SolverError::Divergence("nan".into())),
            ..Default::default()
        };
        let mut session = session_with(config, solver);
        session.start().unwrap();

        assert!(detect(&mut session, CAM).is_err());
        assert_eq!(session.count(), 1);
    }

    #[test]
    fn unknown_camera_and_wrong_pattern_size_are_rejected() {
        let mut session = session();
        assert_eq!(
            session.add_pattern(CameraId(9)),
            Err(CalibrationError::UnknownCamera(CameraId(9)))
        );

        session
            .detector_mut(CAM)
            .unwrap()
            .report(vec![Pt2::new(1.0, 1.0); 3]);
        assert_eq!(
            session.add_pattern(CAM),
            Err(CalibrationError::PatternSizeMismatch {
                image_points: 3,
                world_points: 4
            })
        );
        assert_eq!(session.count(), 0);
    }

    #[test]
    fn non_finite_detection_is_rejected_and_not_stored() {
        let mut session = session();
        detect(&mut session, CAM).unwrap();

        let mut points: Vec<Pt2> = (0..4).map(|i| Pt2::new(10.0 * i as f64, 5.0)).collect();
        points[2].y = f64::NAN;
        session.detector_mut(CAM).unwrap().report(points.clone());
        assert_eq!(
            session.add_pattern(CAM),
            Err(CalibrationError::NonFinitePattern {
                camera_id: CAM,
                point: 2
            })
        );

        points[2].y = 5.0;
        points[0].x = f64::INFINITY;
        session.detector_mut(CAM).unwrap().report(points);
        assert!(matches!(
            session.add_pattern(CAM),
            Err(CalibrationError::NonFinitePattern { point: 0, .. })
        ));
        assert_eq!(session.count(), 1);
        assert_eq!(session.detections(), 1);
    }

    #[test]
    fn other_cameras_collect_but_are_not_calibrated() {
        let mut session = session();
        let side = CameraId(2);
        assert!(session.register_camera(side, RecordedDetector::default()).is_none());

        detect(&mut session, side).unwrap();
        detect(&mut session, side).unwrap();
        assert_eq!(session.store(side).unwrap().count(), 2);
        assert_eq!(session.count(), 0);
        assert_eq!(session.cameras().collect::<Vec<_>>(), vec![CAM, side]);

        session.reset();
        assert_eq!(session.store(side).unwrap().count(), 0);
    }

    #[test]
    fn commit_without_model_is_an_error() {
        let mut session = session();
        assert_eq!(session.commit(), Err(CalibrationError::NoModelAvailable));
        assert!(session.camera_info().get().is_none());
    }

    #[test]
    fn commit_writes_last_solved_model() {
        let mut session = session();
        for _ in 0..3 {
            detect(&mut session, CAM).unwrap();
        }
        let model = session.solve().unwrap().model;

        session.commit().unwrap();
        assert_eq!(session.camera_info().get(), Some(model));
    }

    #[test]
    fn rejected_commit_is_persistence_failure() {
        let mut session = CalibrationSession::new(
            config(),
            MockSolver::default(),
            MemoryCameraInfoStore::read_only(),
            RecordingSink::default(),
        );
        session.register_camera(CAM, RecordedDetector::default());
        for _ in 0..3 {
            detect(&mut session, CAM).unwrap();
        }
        session.solve().unwrap();

        assert!(matches!(
            session.commit(),
            Err(CalibrationError::PersistenceFailure(_))
        ));
    }

    #[test]
    fn existing_model_is_adopted_until_a_solve() {
        let existing = CameraModel::new(
            Resolution::new(128, 128),
            [0.0; 5],
            [120.0, 0.0, 60.0, 0.0, 120.0, 60.0, 0.0, 0.0, 1.0],
        );
        let mut session = CalibrationSession::new(
            config(),
            MockSolver::default(),
            MemoryCameraInfoStore::with_model(existing.clone()),
            RecordingSink::default(),
        );
        session.register_camera(CAM, RecordedDetector::default());

        assert!(!session.has_external_model());
        assert!(session.load_existing_model());
        assert!(session.has_external_model());
        assert_eq!(session.last_model(), Some(&existing));
        session.commit().unwrap();

        for _ in 0..3 {
            detect(&mut session, CAM).unwrap();
        }
        let solved = session.solve().unwrap().model;
        assert_ne!(solved, existing);
        assert!(session.load_existing_model());
        assert_eq!(session.last_model(), Some(&solved));
    }

    #[test]
    fn visualization_is_forwarded_for_registered_cameras() {
        let mut session = session();
        session.update_visualization(CAM).unwrap();
        assert_eq!(session.publisher().sink().visualizations.len(), 1);
        assert_eq!(
            session.update_visualization(CameraId(5)),
            Err(CalibrationError::UnknownCamera(CameraId(5)))
        );
    }
}
