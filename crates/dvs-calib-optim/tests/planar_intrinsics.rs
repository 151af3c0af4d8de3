use dvs_calib_core::{
    synthetic::{self, PixelNoise},
    BrownConrady5, CameraIntrinsics, ObservationPair, PinholeCamera,
};
use dvs_calib_optim::{calibrate_camera, CalibrateError, PlanarIntrinsicsOptions};

fn dvs128_camera(distortion: BrownConrady5) -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics {
            fx: 152.0,
            fy: 150.0,
            cx: 65.0,
            cy: 62.5,
            skew: 0.0,
        },
        distortion,
    )
}

fn build_views(camera: &PinholeCamera, n_views: usize, noise_px: f64) -> Vec<ObservationPair> {
    let board = synthetic::grid_points(7, 6, 0.02);
    let poses = synthetic::poses_tilted_around_board(&board, n_views, 0.4, 0.45);
    let mut views = synthetic::project_views(camera, &board, &poses).expect("projection");
    PixelNoise {
        seed: 42,
        max_abs_px: noise_px,
    }
    .apply(&mut views);
    views
}

#[test]
fn noisy_views_recover_intrinsics_within_tolerance() {
    let cam_gt = dvs128_camera(BrownConrady5 {
        k1: -0.2,
        ..Default::default()
    });
    let views = build_views(&cam_gt, 10, 0.2);

    let result = calibrate_camera(&views, &PlanarIntrinsicsOptions::default()).unwrap();
    let k = result.camera.intrinsics;

    // Uniform noise in [-0.2, 0.2] has an RMS of ~0.16 px over both axes.
    assert!(result.rms_error < 0.25, "rms {}", result.rms_error);
    assert!((k.fx - 152.0).abs() / 152.0 < 0.03, "fx {}", k.fx);
    assert!((k.fy - 150.0).abs() / 150.0 < 0.03, "fy {}", k.fy);
    assert!((k.cx - 65.0).abs() < 3.0, "cx {}", k.cx);
    assert!((k.cy - 62.5).abs() < 3.0, "cy {}", k.cy);
    assert_eq!(result.rotation_vectors().len(), 10);
    assert_eq!(result.translation_vectors().len(), 10);
}

#[test]
fn free_k3_is_estimated_when_not_fixed() {
    let dist_gt = BrownConrady5 {
        k1: -0.2,
        k2: 0.05,
        k3: 0.3,
        ..Default::default()
    };
    let cam_gt = dvs128_camera(dist_gt);
    let views = build_views(&cam_gt, 8, 0.0);

    let opts = PlanarIntrinsicsOptions {
        fix_k3: false,
        ..Default::default()
    };
    let result = calibrate_camera(&views, &opts).unwrap();

    assert!(result.rms_error < 1e-3, "rms {}", result.rms_error);
    assert!(result.report.converged);

    let fixed = calibrate_camera(&views, &PlanarIntrinsicsOptions::default()).unwrap();
    assert_eq!(fixed.camera.distortion.k3, 0.0);
}

#[test]
fn short_views_are_rejected_before_solving() {
    let cam_gt = dvs128_camera(BrownConrady5::default());
    let mut views = build_views(&cam_gt, 4, 0.0);
    views[2].image_points.truncate(3);
    views[2].world_points.truncate(3);

    let err = calibrate_camera(&views, &PlanarIntrinsicsOptions::default()).unwrap_err();
    assert_eq!(err, CalibrateError::NotEnoughPoints { view: 2, points: 3 });
}
