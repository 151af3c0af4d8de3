//! Calibration node for a single event camera.
//!
//! The node collects detected calibration-pattern observations per camera,
//! runs a calibration solve on request and distributes the resulting camera
//! model:
//!
//! ```text
//! detector ──add_pattern──▶ PatternStore ──solve──▶ CalibrationSolver
//!                                                        │
//!                     CameraInfoStore ◀──commit── ResultPublisher ──▶ OutputSink
//! ```
//!
//! Everything outside the session is reached through the traits in
//! [`collaborators`], so transports, detectors and solvers can be swapped.
//! All session operations take `&mut self`; a multi-threaded host wraps the
//! whole [`CalibrationSession`] in one `Mutex`.
//!
//! ```
//! use dvs_calib_node::{
//!     CalibrationError, CalibrationSession, MemoryCameraInfoStore, PlanarSolver,
//!     RecordedDetector, RecordingSink, SessionConfig,
//! };
//!
//! let config = SessionConfig::default();
//! let camera = config.camera_id;
//! let solver = PlanarSolver::from_config(&config);
//! let mut session = CalibrationSession::new(
//!     config,
//!     solver,
//!     MemoryCameraInfoStore::default(),
//!     RecordingSink::default(),
//! );
//! session.register_camera(camera, RecordedDetector::default());
//!
//! assert!(session.start().unwrap().is_none());
//! assert!(matches!(
//!     session.solve(),
//!     Err(CalibrationError::InsufficientObservations { .. })
//! ));
//! ```

pub mod adapters;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod publisher;
pub mod replay;
pub mod session;
pub mod solver;
pub mod store;

pub use adapters::{JsonFileCameraInfoStore, MemoryCameraInfoStore, RecordedDetector, RecordingSink};
pub use collaborators::{
    CalibrationSolver, CameraId, CameraInfoStore, DiagnosticImage, OutputSink, PatternDetector,
    SolverError, SolverFlags, SolverOutput,
};
pub use config::{AddPatternPolicy, PatternConfig, SessionConfig};
pub use error::CalibrationError;
pub use publisher::{camera_model_from_output, ResultPublisher};
pub use replay::{replay, EventOutcome, ReplayEvent, ReplayReport, ReplayScript};
pub use session::{CalibrationSession, SessionState, SolveSummary};
pub use solver::PlanarSolver;
pub use store::PatternStore;
