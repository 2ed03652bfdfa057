//! Closed-form initialization: per-view homographies, focal lengths with a
//! known principal point, and planar pose decomposition.

use crate::{SolveError, ViewPose};
use calib_capture_core::estimate_homography_board_to_img;
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Rotation3, Vector3};

/// Board-plane-to-image homography of every view.
pub(crate) fn view_homographies(
    object_points: &[Vec<Point3<f32>>],
    image_points: &[Vec<Point2<f32>>],
) -> Result<Vec<Matrix3<f64>>, SolveError> {
    object_points
        .iter()
        .zip(image_points)
        .enumerate()
        .map(|(view, (obj, img))| {
            let board: Vec<Point2<f32>> = obj.iter().map(|p| Point2::new(p.x, p.y)).collect();
            estimate_homography_board_to_img(&board, img)
                .map(|h| h.h)
                .ok_or(SolveError::DegenerateHomography { view })
        })
        .collect()
}

/// Focal lengths from the orthogonality and equal-norm constraints on the
/// first two homography columns, with the principal point held at `(cx, cy)`.
///
/// With `aspect = Some(r)` the solve enforces `fx = r * fy`.
pub(crate) fn init_focal_lengths(
    homographies: &[Matrix3<f64>],
    cx: f64,
    cy: f64,
    aspect: Option<f64>,
) -> Option<(f64, f64)> {
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    // Unknowns a = 1/fx^2, b = 1/fy^2.
    let mut rows: Vec<([f64; 2], f64)> = Vec::with_capacity(2 * homographies.len());
    for h in homographies {
        let hc = shift * h;
        let h1 = hc.column(0);
        let h2 = hc.column(1);
        let ortho = ([h1.x * h2.x, h1.y * h2.y], -h1.z * h2.z);
        let norm = (
            [h1.x * h1.x - h2.x * h2.x, h1.y * h1.y - h2.y * h2.y],
            -(h1.z * h1.z - h2.z * h2.z),
        );
        for (coef, rhs) in [ortho, norm] {
            let scale = (coef[0] * coef[0] + coef[1] * coef[1] + rhs * rhs).sqrt();
            if scale > 1e-300 {
                rows.push(([coef[0] / scale, coef[1] / scale], rhs / scale));
            }
        }
    }
    if rows.is_empty() {
        return None;
    }

    let (a, b) = match aspect {
        Some(r) if r > 0.0 => {
            // a = b / r^2: one unknown.
            let r2 = r * r;
            let (num, den) = rows.iter().fold((0.0, 0.0), |(num, den), (c, rhs)| {
                let coef = c[0] / r2 + c[1];
                (num + coef * rhs, den + coef * coef)
            });
            if den <= 0.0 {
                return None;
            }
            let b = num / den;
            (b / r2, b)
        }
        _ => {
            let mut m = DMatrix::<f64>::zeros(rows.len(), 2);
            let mut rhs = DVector::<f64>::zeros(rows.len());
            for (i, (c, r)) in rows.iter().enumerate() {
                m[(i, 0)] = c[0];
                m[(i, 1)] = c[1];
                rhs[i] = *r;
            }
            let sol = m.svd(true, true).solve(&rhs, 1e-12).ok()?;
            (sol[0], sol[1])
        }
    };

    if !(a > 0.0 && b > 0.0) {
        return None;
    }
    let fx = (1.0 / a).sqrt();
    let fy = (1.0 / b).sqrt();
    (fx.is_finite() && fy.is_finite()).then_some((fx, fy))
}

/// Decompose `H ~ K [r1 r2 t]` into a board-to-camera pose in front of the camera.
pub(crate) fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<ViewPose> {
    let m = k.try_inverse()? * h;
    let m1: Vector3<f64> = m.column(0).into_owned();
    let m2: Vector3<f64> = m.column(1).into_owned();
    let m3: Vector3<f64> = m.column(2).into_owned();

    let denom = m1.norm() + m2.norm();
    if denom < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / denom;
    if m3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let r3 = r1.cross(&r2);
    let t = m3 * lambda;

    let approx_r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx_r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * v_t;
    }

    let rotation = Rotation3::from_matrix_unchecked(r);
    Some(ViewPose {
        rvec: rotation.scaled_axis(),
        tvec: t,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_matrix;

    fn synthetic_h(k: &Matrix3<f64>, rot: Rotation3<f64>, t: Vector3<f64>) -> Matrix3<f64> {
        let r = rot.matrix();
        let mut h = Matrix3::zeros();
        h.set_column(0, &(k * r.column(0)));
        h.set_column(1, &(k * r.column(1)));
        h.set_column(2, &(k * t));
        h
    }

    #[test]
    fn focal_lengths_recovered_with_known_centre() {
        let k = camera_matrix(900.0, 880.0, 640.0, 360.0);
        let hs = vec![
            synthetic_h(
                &k,
                Rotation3::from_euler_angles(0.3, 0.0, 0.05),
                Vector3::new(0.1, -0.05, 1.0),
            ),
            synthetic_h(
                &k,
                Rotation3::from_euler_angles(-0.05, 0.35, -0.1),
                Vector3::new(-0.05, 0.1, 1.2),
            ),
            synthetic_h(
                &k,
                Rotation3::from_euler_angles(0.25, -0.3, 0.0),
                Vector3::new(0.0, 0.0, 0.9),
            ),
        ];
        let (fx, fy) = init_focal_lengths(&hs, 640.0, 360.0, None).expect("focal");
        assert!((fx - 900.0).abs() < 1.0, "fx = {fx}");
        assert!((fy - 880.0).abs() < 1.0, "fy = {fy}");
    }

    #[test]
    fn pose_decomposition_recovers_translation() {
        let k = camera_matrix(700.0, 700.0, 320.0, 240.0);
        let rot = Rotation3::from_euler_angles(0.2, -0.1, 0.3);
        let t = Vector3::new(0.05, -0.02, 0.8);
        let h = synthetic_h(&k, rot, t) * -3.0;
        let pose = pose_from_homography(&k, &h).expect("pose");
        assert!((pose.tvec - t).norm() < 1e-9);
        assert!((pose.rotation().matrix() - rot.matrix()).norm() < 1e-9);
    }
}
