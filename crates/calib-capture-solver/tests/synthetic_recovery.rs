use approx::assert_relative_eq;
use calib_capture_core::ImageSize;
use calib_capture_solver::{
    camera_matrix, project_points, CalibrationFlags, CalibrationInput, Distortion,
    LevenbergMarquardtParams, LevenbergMarquardtSolver, NonlinearCalibrationSolver, SolveStatus,
    ViewPose,
};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};

struct Scenario {
    object_points: Vec<Vec<Point3<f32>>>,
    image_points: Vec<Vec<Point2<f32>>>,
    poses: Vec<ViewPose>,
}

fn board_points() -> Vec<Point3<f32>> {
    let mut pts = Vec::new();
    for y in 1..9 {
        for x in 1..12 {
            pts.push(Point3::new(x as f32 * 0.05, y as f32 * 0.05, 0.0));
        }
    }
    pts
}

fn build_scenario(k: &Matrix3<f64>, dist: &Distortion) -> Scenario {
    let board = board_points();
    let centre = Vector3::new(0.3, 0.225, 0.0);
    let tilts = [
        (0.35, 0.0, 0.0, 0.9),
        (-0.3, 0.1, 0.05, 1.0),
        (0.0, 0.4, -0.1, 1.1),
        (0.1, -0.35, 0.2, 0.95),
        (0.25, 0.25, 0.0, 1.2),
        (-0.2, -0.2, -0.15, 1.05),
    ];

    let mut scenario = Scenario {
        object_points: Vec::new(),
        image_points: Vec::new(),
        poses: Vec::new(),
    };
    for (i, (rx, ry, rz, depth)) in tilts.into_iter().enumerate() {
        let rot = Rotation3::from_euler_angles(rx, ry, rz);
        let offset = Vector3::new(0.02 * i as f64 - 0.05, 0.01 * i as f64 - 0.03, depth);
        let pose = ViewPose {
            rvec: rot.scaled_axis(),
            tvec: offset - rot * centre,
        };
        let img = project_points(k, dist, &pose, &board)
            .into_iter()
            .map(|p| Point2::new(p.x as f32, p.y as f32))
            .collect();
        scenario.object_points.push(board.clone());
        scenario.image_points.push(img);
        scenario.poses.push(pose);
    }
    scenario
}

#[test]
fn recovers_all_free_intrinsics() {
    let k = camera_matrix(900.0, 890.0, 646.0, 355.0);
    let dist = Distortion {
        k1: -0.12,
        k2: 0.03,
        p1: 0.001,
        p2: -0.0005,
        k3: 0.0,
    };
    let scenario = build_scenario(&k, &dist);

    let input = CalibrationInput {
        object_points: &scenario.object_points,
        image_points: &scenario.image_points,
        image_size: ImageSize::new(1280, 720),
        flags: CalibrationFlags::default(),
        camera_matrix: Matrix3::identity(),
        distortion: Distortion::default(),
    };
    let sol = LevenbergMarquardtSolver::default().calibrate(&input);

    assert_eq!(sol.status, SolveStatus::Converged);
    assert!(sol.rms < 1e-2, "rms = {}", sol.rms);
    let params = LevenbergMarquardtParams::default();
    let n_params = 9 + 6 * scenario.poses.len();
    assert!(sol.evaluations > 0);
    assert!(sol.evaluations <= params.patience * (n_params + 1));
    assert_relative_eq!(sol.camera_matrix[(0, 0)], 900.0, epsilon = 1.0);
    assert_relative_eq!(sol.camera_matrix[(1, 1)], 890.0, epsilon = 1.0);
    assert_relative_eq!(sol.camera_matrix[(0, 2)], 646.0, epsilon = 1.0);
    assert_relative_eq!(sol.camera_matrix[(1, 2)], 355.0, epsilon = 1.0);
    assert_relative_eq!(sol.distortion.k1, -0.12, epsilon = 5e-3);
    assert_eq!(sol.poses.len(), scenario.poses.len());
    assert_eq!(sol.per_view_errors.len(), scenario.poses.len());
    for (est, gt) in sol.poses.iter().zip(&scenario.poses) {
        assert!((est.tvec - gt.tvec).norm() < 1e-3);
    }
}

#[test]
fn fixed_parameters_stay_put_and_report_zero_deviation() {
    let k = camera_matrix(850.0, 850.0, 639.5, 359.5);
    let dist = Distortion {
        k1: -0.05,
        ..Distortion::default()
    };
    let scenario = build_scenario(&k, &dist);

    let flags = CalibrationFlags {
        fix_aspect_ratio: true,
        fix_principal_point: true,
        zero_tangent_dist: true,
        fix_k3: true,
        ..CalibrationFlags::default()
    };
    let input = CalibrationInput {
        object_points: &scenario.object_points,
        image_points: &scenario.image_points,
        image_size: ImageSize::new(1280, 720),
        flags,
        camera_matrix: Matrix3::identity(),
        distortion: Distortion::default(),
    };
    let sol = LevenbergMarquardtSolver::default().calibrate(&input);

    assert_ne!(sol.status, SolveStatus::Degenerate);
    let fx = sol.camera_matrix[(0, 0)];
    assert_relative_eq!(sol.camera_matrix[(1, 1)], fx, epsilon = 1e-9);
    assert_relative_eq!(fx, 850.0, epsilon = 1.0);
    assert_eq!(sol.camera_matrix[(0, 2)], 639.5);
    assert_eq!(sol.camera_matrix[(1, 2)], 359.5);
    assert_eq!(sol.distortion.p1, 0.0);
    assert_eq!(sol.distortion.p2, 0.0);
    assert_eq!(sol.distortion.k3, 0.0);

    let sd = sol.std_dev_intrinsics;
    assert_eq!(sd[2], 0.0);
    assert_eq!(sd[3], 0.0);
    assert_eq!(sd[6], 0.0);
    assert_eq!(sd[7], 0.0);
    assert_eq!(sd[8], 0.0);
    assert_relative_eq!(sd[1], sd[0], epsilon = 1e-12);
}

#[test]
fn short_view_is_reported_as_degenerate() {
    let obj = vec![vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
    ]];
    let img = vec![vec![
        Point2::new(10.0, 10.0),
        Point2::new(20.0, 10.0),
        Point2::new(10.0, 20.0),
    ]];
    let input = CalibrationInput {
        object_points: &obj,
        image_points: &img,
        image_size: ImageSize::new(640, 480),
        flags: CalibrationFlags::default(),
        camera_matrix: Matrix3::identity(),
        distortion: Distortion::default(),
    };
    let sol = LevenbergMarquardtSolver::default().calibrate(&input);
    assert!(sol.is_degenerate());
    assert_eq!(sol.poses.len(), 1);
    assert_eq!(sol.per_view_errors, vec![0.0]);
}
