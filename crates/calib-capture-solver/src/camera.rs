//! Pinhole camera with plumb-bob (Brown-Conrady) distortion.

use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Distortion coefficients in `k1, k2, p1, p2, k3` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(d: [f64; 5]) -> Self {
        Self {
            k1: d[0],
            k2: d[1],
            p1: d[2],
            p2: d[3],
            k3: d[4],
        }
    }
}

/// Board-to-camera transform: `X_cam = R(rvec) * X_board + tvec`.
///
/// `rvec` is an axis-angle vector (direction = axis, norm = angle).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewPose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl ViewPose {
    pub fn identity() -> Self {
        Self {
            rvec: Vector3::zeros(),
            tvec: Vector3::zeros(),
        }
    }

    #[inline]
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }
}

/// Build an upper-triangular intrinsic matrix without skew.
pub fn camera_matrix(fx: f64, fy: f64, cx: f64, cy: f64) -> Matrix3<f64> {
    Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0)
}

/// Project a board point into pixels.
#[inline]
pub fn project_point(
    k: &Matrix3<f64>,
    dist: &Distortion,
    pose: &ViewPose,
    p: &Point3<f64>,
) -> Point2<f64> {
    let xc = pose.rotation() * p.coords + pose.tvec;
    let x = xc.x / xc.z;
    let y = xc.y / xc.z;

    let r2 = x * x + y * y;
    let radial = 1.0 + r2 * (dist.k1 + r2 * (dist.k2 + r2 * dist.k3));
    let xd = x * radial + 2.0 * dist.p1 * x * y + dist.p2 * (r2 + 2.0 * x * x);
    let yd = y * radial + dist.p1 * (r2 + 2.0 * y * y) + 2.0 * dist.p2 * x * y;

    Point2::new(
        k[(0, 0)] * xd + k[(0, 1)] * yd + k[(0, 2)],
        k[(1, 1)] * yd + k[(1, 2)],
    )
}

/// Project a set of board points through one view.
pub fn project_points(
    k: &Matrix3<f64>,
    dist: &Distortion,
    pose: &ViewPose,
    pts: &[Point3<f32>],
) -> Vec<Point2<f64>> {
    pts.iter()
        .map(|p| project_point(k, dist, pose, &p.cast::<f64>()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn optical_axis_lands_on_principal_point() {
        let k = camera_matrix(800.0, 780.0, 320.0, 240.0);
        let pose = ViewPose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 2.0),
        };
        let uv = project_point(&k, &Distortion::default(), &pose, &Point3::origin());
        assert_relative_eq!(uv.x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(uv.y, 240.0, epsilon = 1e-9);
    }

    #[test]
    fn barrel_distortion_pulls_points_inward() {
        let k = camera_matrix(500.0, 500.0, 0.0, 0.0);
        let pose = ViewPose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 1.0),
        };
        let p = Point3::new(0.4, 0.0, 0.0);
        let ideal = project_point(&k, &Distortion::default(), &pose, &p);
        let barrel = Distortion {
            k1: -0.2,
            ..Distortion::default()
        };
        let distorted = project_point(&k, &barrel, &pose, &p);
        assert!(distorted.x < ideal.x);
        assert_relative_eq!(distorted.y, 0.0, epsilon = 1e-12);
    }
}
