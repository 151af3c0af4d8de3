//! Conversion of solver output into the published camera-info record.

use dvs_calib_core::{CameraModel, Real, Resolution, DISTORTION_LEN, INTRINSICS_LEN};
use log::debug;

use crate::{CalibrationError, DiagnosticImage, OutputSink, SolverOutput};

/// Build a [`CameraModel`] from raw solver output.
///
/// Only shapes are checked: `K` must be 3×3 and there must be exactly five
/// distortion coefficients. Values are copied unchanged, `K` in row-major
/// order.
pub fn camera_model_from_output(
    resolution: Resolution,
    output: &SolverOutput,
) -> Result<CameraModel, CalibrationError> {
    let kmtx = &output.camera_matrix;
    if kmtx.shape() != (3, 3) {
        return Err(CalibrationError::ShapeMismatch {
            field: "camera_matrix",
            expected: (3, 3),
            actual: kmtx.shape(),
        });
    }
    let dist = &output.dist_coeffs;
    if dist.len() != DISTORTION_LEN {
        return Err(CalibrationError::ShapeMismatch {
            field: "dist_coeffs",
            expected: (DISTORTION_LEN, 1),
            actual: dist.shape(),
        });
    }

    let mut k = [0.0; INTRINSICS_LEN];
    for (idx, entry) in k.iter_mut().enumerate() {
        *entry = kmtx[(idx / 3, idx % 3)];
    }
    let mut d = [0.0; DISTORTION_LEN];
    for (idx, entry) in d.iter_mut().enumerate() {
        *entry = dist[idx];
    }

    Ok(CameraModel::new(resolution, d, k))
}

/// Emits solved models to an [`OutputSink`] and remembers the last one.
#[derive(Debug, Clone, Default)]
pub struct ResultPublisher<O> {
    sink: O,
    last_model: Option<CameraModel>,
    last_error: Option<Real>,
}

impl<O: OutputSink> ResultPublisher<O> {
    pub fn new(sink: O) -> Self {
        Self {
            sink,
            last_model: None,
            last_error: None,
        }
    }

    /// Publish the model and its reprojection error as two outputs.
    ///
    /// On a shape mismatch nothing is published and the last known model is
    /// kept.
    pub fn publish(
        &mut self,
        resolution: Resolution,
        output: &SolverOutput,
    ) -> Result<CameraModel, CalibrationError> {
        let model = camera_model_from_output(resolution, output)?;

        self.sink.publish_camera_info(&model);
        self.sink.publish_reprojection_error(output.reprojection_error);
        debug!("published camera info, rms {:.4} px", output.reprojection_error);

        self.last_model = Some(model.clone());
        self.last_error = Some(output.reprojection_error);
        Ok(model)
    }

    pub fn publish_visualization(&mut self, image: &DiagnosticImage) {
        self.sink.publish_visualization(image);
    }

    /// Take over a model that was not solved here, without publishing it.
    pub fn adopt(&mut self, model: CameraModel) {
        self.last_model = Some(model);
        self.last_error = None;
    }

    pub fn last_model(&self) -> Option<&CameraModel> {
        self.last_model.as_ref()
    }

    /// Error of the last published solve; `None` for adopted models.
    pub fn last_reprojection_error(&self) -> Option<Real> {
        self.last_error
    }

    pub fn sink(&self) -> &O {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut O {
        &mut self.sink
    }

    pub fn into_sink(self) -> O {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingSink;
    use nalgebra::{DMatrix, DVector};

    fn output(k: DMatrix<Real>, d: DVector<Real>) -> SolverOutput {
        SolverOutput {
            camera_matrix: k,
            dist_coeffs: d,
            rvecs: Vec::new(),
            tvecs: Vec::new(),
            reprojection_error: 0.25,
            per_view_errors: Vec::new(),
            iterations: 3,
        }
    }

    fn kmtx() -> DMatrix<Real> {
        DMatrix::from_row_slice(3, 3, &[151.0, 0.5, 63.0, 0.0, 149.0, 65.0, 0.0, 0.0, 1.0])
    }

    #[test]
    fn publish_copies_solver_values_unchanged() {
        let d = DVector::from_row_slice(&[-0.3, 0.12, 0.001, -0.002, 0.0]);
        let mut publisher = ResultPublisher::new(RecordingSink::default());

        let model = publisher
            .publish(Resolution::new(128, 128), &output(kmtx(), d))
            .unwrap();

        assert_eq!((model.width, model.height), (128, 128));
        assert_eq!(model.distortion_model, "plumb_bob");
        assert_eq!(model.k, [151.0, 0.5, 63.0, 0.0, 149.0, 65.0, 0.0, 0.0, 1.0]);
        assert_eq!(model.d, [-0.3, 0.12, 0.001, -0.002, 0.0]);

        let sink = publisher.sink();
        assert_eq!(sink.camera_infos, vec![model.clone()]);
        assert_eq!(sink.reprojection_errors, vec![0.25]);
        assert_eq!(publisher.last_model(), Some(&model));
        assert_eq!(publisher.last_reprojection_error(), Some(0.25));
    }

    #[test]
    fn wrong_distortion_length_is_rejected_without_publishing() {
        let mut publisher = ResultPublisher::new(RecordingSink::default());
        let err = publisher
            .publish(
                Resolution::new(128, 128),
                &output(kmtx(), DVector::zeros(8)),
            )
            .unwrap_err();

        assert_eq!(
            err,
            CalibrationError::ShapeMismatch {
                field: "dist_coeffs",
                expected: (5, 1),
                actual: (8, 1),
            }
        );
        assert!(publisher.sink().camera_infos.is_empty());
        assert!(publisher.sink().reprojection_errors.is_empty());
        assert!(publisher.last_model().is_none());
    }

    #[test]
    fn non_square_camera_matrix_is_rejected() {
        let mut publisher = ResultPublisher::new(RecordingSink::default());
        let err = publisher
            .publish(
                Resolution::new(128, 128),
                &output(DMatrix::zeros(1, 9), DVector::zeros(5)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::ShapeMismatch {
                field: "camera_matrix",
                actual: (1, 9),
                ..
            }
        ));
    }

    #[test]
    fn adopted_model_is_not_published() {
        let mut publisher = ResultPublisher::new(RecordingSink::default());
        let model = CameraModel::new(
            Resolution::new(128, 128),
            [0.0; 5],
            [100.0, 0.0, 64.0, 0.0, 100.0, 64.0, 0.0, 0.0, 1.0],
        );
        publisher.adopt(model.clone());

        assert_eq!(publisher.last_model(), Some(&model));
        assert_eq!(publisher.last_reprojection_error(), None);
        assert!(publisher.sink().camera_infos.is_empty());
    }

    #[test]
    fn visualization_passes_through() {
        let mut publisher = ResultPublisher::new(RecordingSink::default());
        let image = DiagnosticImage::blank(2, 2);
        publisher.publish_visualization(&image);
        assert_eq!(publisher.into_sink().visualizations, vec![image]);
    }
}
