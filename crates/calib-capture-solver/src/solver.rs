//! Levenberg-Marquardt refinement of intrinsics, distortion and per-view poses.

use crate::camera::{camera_matrix, project_point, Distortion, ViewPose};
use crate::error::SolveError;
use crate::flags::CalibrationFlags;
use crate::init::{init_focal_lengths, pose_from_homography, view_homographies};
use calib_capture_core::ImageSize;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::{debug, warn};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn, Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Indices into the intrinsic parameter vector `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
const FX: usize = 0;
const FY: usize = 1;
const CX: usize = 2;
const CY: usize = 3;
const K1: usize = 4;
const K2: usize = 5;
const P1: usize = 6;
const P2: usize = 7;
const K3: usize = 8;
const N_INTRINSICS: usize = 9;
const N_POSE: usize = 6;

/// One calibration problem: matched board/image points for every view plus
/// the flags and initial guess.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationInput<'a> {
    pub object_points: &'a [Vec<Point3<f32>>],
    pub image_points: &'a [Vec<Point2<f32>>],
    pub image_size: ImageSize,
    pub flags: CalibrationFlags,
    /// Initial camera matrix. Used in full with `use_intrinsic_guess`;
    /// otherwise only its `fx / fy` ratio matters (for `fix_aspect_ratio`).
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Distortion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    MaxIterations,
    Degenerate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSolution {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Distortion,
    pub poses: Vec<ViewPose>,
    /// Root-mean-square reprojection error over every point, in pixels.
    pub rms: f64,
    pub per_view_errors: Vec<f64>,
    /// `fx, fy, cx, cy, k1, k2, p1, p2, k3`; zero for fixed parameters.
    pub std_dev_intrinsics: [f64; N_INTRINSICS],
    /// `rx, ry, rz, tx, ty, tz` per view.
    pub std_dev_extrinsics: Vec<[f64; N_POSE]>,
    pub status: SolveStatus,
    /// Residual evaluations spent by the minimizer.
    pub evaluations: usize,
}

impl CalibrationSolution {
    /// Zero-valued result recorded when a problem cannot be solved.
    pub fn degenerate(views: usize) -> Self {
        Self {
            camera_matrix: Matrix3::zeros(),
            distortion: Distortion::default(),
            poses: vec![ViewPose::identity(); views],
            rms: 0.0,
            per_view_errors: vec![0.0; views],
            std_dev_intrinsics: [0.0; N_INTRINSICS],
            std_dev_extrinsics: vec![[0.0; N_POSE]; views],
            status: SolveStatus::Degenerate,
            evaluations: 0,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.status == SolveStatus::Degenerate
    }
}

/// Fits a camera model to planar-target observations.
///
/// Solvers never fail: problems that cannot be solved come back as a
/// [`CalibrationSolution`] with [`SolveStatus::Degenerate`].
pub trait NonlinearCalibrationSolver: Send + Sync {
    fn calibrate(&self, input: &CalibrationInput<'_>) -> CalibrationSolution;
}

/// Stopping rules handed to [`LevenbergMarquardt`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevenbergMarquardtParams {
    /// The solve gives up after `patience * (n_params + 1)` residual evaluations.
    pub patience: usize,
    /// Relative reduction of the sum of squares considered converged.
    pub ftol: f64,
    /// Relative step size considered converged.
    pub xtol: f64,
    /// Orthogonality of residuals and Jacobian columns considered converged.
    pub gtol: f64,
}

impl Default for LevenbergMarquardtParams {
    fn default() -> Self {
        Self {
            patience: 30,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LevenbergMarquardtSolver {
    pub params: LevenbergMarquardtParams,
}

impl LevenbergMarquardtSolver {
    pub fn new(params: LevenbergMarquardtParams) -> Self {
        Self { params }
    }

    /// Like [`NonlinearCalibrationSolver::calibrate`] but reports why a
    /// problem was rejected.
    pub fn try_calibrate(
        &self,
        input: &CalibrationInput<'_>,
    ) -> Result<CalibrationSolution, SolveError> {
        validate_views(input.object_points, input.image_points)?;

        let mut problem = Problem::new(input)?;
        let x0 = problem.initial_params(input)?;

        let lm = LevenbergMarquardt::new()
            .with_ftol(self.params.ftol)
            .with_xtol(self.params.xtol)
            .with_gtol(self.params.gtol)
            .with_patience(self.params.patience.max(1));
        let (fitted, report) = lm.minimize(LmProblem {
            problem: &problem,
            params: x0,
        });

        let status = match report.termination {
            reason if reason.was_successful() => {
                debug!(
                    "lm: {reason:?} after {} evaluations, cost {:.6e}",
                    report.number_of_evaluations, report.objective_function
                );
                SolveStatus::Converged
            }
            TerminationReason::LostPatience => SolveStatus::MaxIterations,
            reason => {
                return Err(SolveError::Terminated {
                    reason: format!("{reason:?}"),
                })
            }
        };
        problem.finish(&fitted.params, report.number_of_evaluations, status)
    }
}

/// [`Problem`] at a parameter vector, as seen by the minimizer.
struct LmProblem<'p, 'a> {
    problem: &'p Problem<'a>,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmProblem<'_, '_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.problem.residuals(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.problem.jacobian(&self.params))
    }
}

impl NonlinearCalibrationSolver for LevenbergMarquardtSolver {
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(views = input.object_points.len())))]
    fn calibrate(&self, input: &CalibrationInput<'_>) -> CalibrationSolution {
        match self.try_calibrate(input) {
            Ok(solution) => solution,
            Err(err) => {
                warn!("calibration is degenerate: {err}");
                CalibrationSolution::degenerate(input.object_points.len())
            }
        }
    }
}

/// Check view and point counts of a calibration problem.
pub fn validate_views(
    object_points: &[Vec<Point3<f32>>],
    image_points: &[Vec<Point2<f32>>],
) -> Result<(), SolveError> {
    if object_points.len() != image_points.len() {
        return Err(SolveError::MismatchedViews {
            object: object_points.len(),
            image: image_points.len(),
        });
    }
    if object_points.is_empty() {
        return Err(SolveError::NoViews);
    }
    for (view, (obj, img)) in object_points.iter().zip(image_points).enumerate() {
        if obj.len() != img.len() {
            return Err(SolveError::MismatchedPoints {
                view,
                object: obj.len(),
                image: img.len(),
            });
        }
        if obj.len() < 4 {
            return Err(SolveError::TooFewPoints {
                view,
                points: obj.len(),
            });
        }
    }
    Ok(())
}

/// Which intrinsics are free and how the tied ones follow.
#[derive(Clone, Debug)]
struct Layout {
    free: Vec<usize>,
    fixed: [f64; N_INTRINSICS],
    /// `fx / fy` when the aspect ratio is held; `fy` then follows `fx`.
    aspect: Option<f64>,
}

impl Layout {
    fn new(flags: &CalibrationFlags, aspect: f64) -> Self {
        let mut free = Vec::with_capacity(N_INTRINSICS);
        if !flags.fix_focal_length {
            free.push(FX);
            if !flags.fix_aspect_ratio {
                free.push(FY);
            }
        }
        if !flags.fix_principal_point {
            free.extend([CX, CY]);
        }
        if !flags.fix_k1 {
            free.push(K1);
        }
        if !flags.fix_k2 {
            free.push(K2);
        }
        if !flags.zero_tangent_dist {
            free.extend([P1, P2]);
        }
        if !flags.fix_k3 {
            free.push(K3);
        }
        Self {
            free,
            fixed: [0.0; N_INTRINSICS],
            aspect: flags.fix_aspect_ratio.then_some(aspect),
        }
    }

    fn intrinsics(&self, x: &DVector<f64>) -> [f64; N_INTRINSICS] {
        let mut v = self.fixed;
        for (slot, &idx) in self.free.iter().enumerate() {
            v[idx] = x[slot];
        }
        if let Some(r) = self.aspect {
            v[FY] = v[FX] / r;
        }
        v
    }
}

struct Problem<'a> {
    object_points: &'a [Vec<Point3<f32>>],
    image_points: &'a [Vec<Point2<f32>>],
    layout: Layout,
    /// First residual row of each view.
    offsets: Vec<usize>,
    n_points: usize,
}

impl<'a> Problem<'a> {
    fn new(input: &CalibrationInput<'a>) -> Result<Self, SolveError> {
        let k = &input.camera_matrix;
        let aspect = if k[(0, 0)] > 0.0 && k[(1, 1)] > 0.0 {
            k[(0, 0)] / k[(1, 1)]
        } else {
            1.0
        };
        let layout = Layout::new(&input.flags, aspect);

        let mut offsets = Vec::with_capacity(input.object_points.len());
        let mut n_points = 0;
        for view in input.object_points {
            offsets.push(2 * n_points);
            n_points += view.len();
        }

        let n_params = layout.free.len() + N_POSE * input.object_points.len();
        if 2 * n_points < n_params {
            return Err(SolveError::Underdetermined {
                residuals: 2 * n_points,
                params: n_params,
            });
        }

        Ok(Self {
            object_points: input.object_points,
            image_points: input.image_points,
            layout,
            offsets,
            n_points,
        })
    }

    fn n_views(&self) -> usize {
        self.object_points.len()
    }

    fn n_params(&self) -> usize {
        self.layout.free.len() + N_POSE * self.n_views()
    }

    fn pose_offset(&self, view: usize) -> usize {
        self.layout.free.len() + N_POSE * view
    }

    /// Initial parameter vector; also fills the fixed intrinsic values.
    fn initial_params(&mut self, input: &CalibrationInput<'_>) -> Result<DVector<f64>, SolveError> {
        let homographies = view_homographies(self.object_points, self.image_points)?;

        let mut intr = [0.0; N_INTRINSICS];
        if input.flags.use_intrinsic_guess {
            let k = &input.camera_matrix;
            intr[FX] = k[(0, 0)];
            intr[FY] = k[(1, 1)];
            intr[CX] = k[(0, 2)];
            intr[CY] = k[(1, 2)];
            intr[K1..].copy_from_slice(&input.distortion.to_array());
        } else {
            intr[CX] = (input.image_size.width as f64 - 1.0) * 0.5;
            intr[CY] = (input.image_size.height as f64 - 1.0) * 0.5;
            let (fx, fy) = init_focal_lengths(&homographies, intr[CX], intr[CY], self.layout.aspect)
                .unwrap_or_else(|| {
                    let f = input.image_size.max_dimension() as f64;
                    warn!("closed-form focal length failed, starting from f = {f}");
                    let fy = self.layout.aspect.map_or(f, |r| f / r);
                    (f, fy)
                });
            intr[FX] = fx;
            intr[FY] = fy;
        }
        if let Some(r) = self.layout.aspect {
            intr[FY] = intr[FX] / r;
        }
        if input.flags.zero_tangent_dist {
            intr[P1] = 0.0;
            intr[P2] = 0.0;
        }
        self.layout.fixed = intr;

        let k = camera_matrix(intr[FX], intr[FY], intr[CX], intr[CY]);
        let mut x = DVector::zeros(self.n_params());
        for (slot, &idx) in self.layout.free.iter().enumerate() {
            x[slot] = intr[idx];
        }
        for (view, h) in homographies.iter().enumerate() {
            let pose = pose_from_homography(&k, h).ok_or(SolveError::PoseRecovery { view })?;
            let off = self.pose_offset(view);
            x.rows_mut(off, 3).copy_from(&pose.rvec);
            x.rows_mut(off + 3, 3).copy_from(&pose.tvec);
        }
        Ok(x)
    }

    fn model(&self, x: &DVector<f64>) -> (Matrix3<f64>, Distortion) {
        let v = self.layout.intrinsics(x);
        (
            camera_matrix(v[FX], v[FY], v[CX], v[CY]),
            Distortion::from_array([v[K1], v[K2], v[P1], v[P2], v[K3]]),
        )
    }

    fn pose(&self, x: &DVector<f64>, view: usize) -> ViewPose {
        let off = self.pose_offset(view);
        ViewPose {
            rvec: x.fixed_rows::<3>(off).into_owned(),
            tvec: x.fixed_rows::<3>(off + 3).into_owned(),
        }
    }

    fn view_residuals(
        &self,
        k: &Matrix3<f64>,
        dist: &Distortion,
        pose: &ViewPose,
        view: usize,
        out: &mut [f64],
    ) {
        let obs = &self.image_points[view];
        for (i, p) in self.object_points[view].iter().enumerate() {
            let uv = project_point(k, dist, pose, &p.cast::<f64>());
            out[2 * i] = uv.x - obs[i].x as f64;
            out[2 * i + 1] = uv.y - obs[i].y as f64;
        }
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let (k, dist) = self.model(x);
        let mut r = DVector::zeros(2 * self.n_points);
        for view in 0..self.n_views() {
            let pose = self.pose(x, view);
            let off = self.offsets[view];
            let len = 2 * self.object_points[view].len();
            self.view_residuals(&k, &dist, &pose, view, &mut r.as_mut_slice()[off..off + len]);
        }
        r
    }

    /// Central-difference Jacobian. Pose columns only touch their own view.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let mut j = DMatrix::zeros(2 * self.n_points, self.n_params());

        for col in 0..self.layout.free.len() {
            let h = 1e-6 * (1.0 + x[col].abs());
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[col] += h;
            xm[col] -= h;
            let d = (self.residuals(&xp) - self.residuals(&xm)) / (2.0 * h);
            j.set_column(col, &d);
        }

        let (k, dist) = self.model(x);
        for view in 0..self.n_views() {
            let off = self.offsets[view];
            let len = 2 * self.object_points[view].len();
            let mut plus = vec![0.0; len];
            let mut minus = vec![0.0; len];
            for p in 0..N_POSE {
                let col = self.pose_offset(view) + p;
                let h = 1e-7 * (1.0 + x[col].abs());
                let mut xp = x.clone();
                xp[col] += h;
                self.view_residuals(&k, &dist, &self.pose(&xp, view), view, &mut plus);
                xp[col] -= 2.0 * h;
                self.view_residuals(&k, &dist, &self.pose(&xp, view), view, &mut minus);
                for row in 0..len {
                    j[(off + row, col)] = (plus[row] - minus[row]) / (2.0 * h);
                }
            }
        }
        j
    }

    fn finish(
        &self,
        x: &DVector<f64>,
        evaluations: usize,
        status: SolveStatus,
    ) -> Result<CalibrationSolution, SolveError> {
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::NonFinite);
        }
        let (camera_matrix, distortion) = self.model(x);
        let r = self.residuals(x);
        let cost = r.norm_squared();
        let rms = (cost / self.n_points as f64).sqrt();

        let per_view_errors = (0..self.n_views())
            .map(|view| {
                let off = self.offsets[view];
                let n = self.object_points[view].len();
                (r.rows(off, 2 * n).norm_squared() / n as f64).sqrt()
            })
            .collect();

        let j = self.jacobian(x);
        let dof = (2 * self.n_points).saturating_sub(self.n_params()).max(1);
        let sigma2 = cost / dof as f64;
        let variances = j
            .tr_mul(&j)
            .try_inverse()
            .map(|cov| cov.diagonal() * sigma2)
            .unwrap_or_else(|| DVector::zeros(self.n_params()));
        let sd = |i: usize| variances[i].max(0.0).sqrt();

        let mut std_dev_intrinsics = [0.0; N_INTRINSICS];
        for (slot, &idx) in self.layout.free.iter().enumerate() {
            std_dev_intrinsics[idx] = sd(slot);
        }
        if let Some(ratio) = self.layout.aspect {
            std_dev_intrinsics[FY] = std_dev_intrinsics[FX] / ratio;
        }
        let std_dev_extrinsics = (0..self.n_views())
            .map(|view| {
                let off = self.pose_offset(view);
                std::array::from_fn(|p| sd(off + p))
            })
            .collect();

        let poses = (0..self.n_views()).map(|v| self.pose(x, v)).collect();

        Ok(CalibrationSolution {
            camera_matrix,
            distortion,
            poses,
            rms,
            per_view_errors,
            std_dev_intrinsics,
            std_dev_extrinsics,
            status,
            evaluations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_views_with_too_few_points() {
        let obj = vec![vec![Point3::new(0.0, 0.0, 0.0); 3]];
        let img = vec![vec![Point2::new(0.0, 0.0); 3]];
        assert_eq!(
            validate_views(&obj, &img),
            Err(SolveError::TooFewPoints { view: 0, points: 3 })
        );
        assert_eq!(validate_views(&[], &[]), Err(SolveError::NoViews));
    }

    #[test]
    fn degenerate_input_yields_degenerate_solution() {
        let obj: Vec<Vec<Point3<f32>>> = Vec::new();
        let img: Vec<Vec<Point2<f32>>> = Vec::new();
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
        assert_eq!(sol.camera_matrix, Matrix3::zeros());
        assert_eq!(sol.rms, 0.0);
    }

    #[test]
    fn minimizer_view_tracks_parameters() {
        let obj: Vec<Vec<Point3<f32>>> = vec![(0..12)
            .map(|i| Point3::new((i % 4) as f32 * 0.1, (i / 4) as f32 * 0.1, 0.0))
            .collect()];
        let img: Vec<Vec<Point2<f32>>> = vec![obj[0]
            .iter()
            .map(|p| Point2::new(320.0 + 500.0 * p.x, 240.0 + 500.0 * p.y))
            .collect()];
        let input = CalibrationInput {
            object_points: &obj,
            image_points: &img,
            image_size: ImageSize::new(640, 480),
            flags: CalibrationFlags {
                fix_principal_point: true,
                fix_focal_length: true,
                zero_tangent_dist: true,
                fix_k1: true,
                fix_k2: true,
                fix_k3: true,
                ..CalibrationFlags::default()
            },
            camera_matrix: Matrix3::identity(),
            distortion: Distortion::default(),
        };
        let problem = Problem::new(&input).expect("problem");
        assert_eq!(problem.n_params(), N_POSE);

        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.1, -0.1, 1.0]);
        let mut view = LmProblem {
            problem: &problem,
            params: DVector::zeros(N_POSE),
        };
        view.set_params(&x);
        assert_eq!(view.params(), x);
        assert_eq!(view.residuals(), Some(problem.residuals(&x)));
        let j = view.jacobian().expect("jacobian");
        assert_eq!(j.shape(), (24, N_POSE));
    }

    #[test]
    fn aspect_layout_ties_fy_to_fx() {
        let flags = CalibrationFlags {
            fix_aspect_ratio: true,
            fix_principal_point: true,
            ..CalibrationFlags::default()
        };
        let mut layout = Layout::new(&flags, 2.0);
        assert_eq!(layout.free, vec![FX, K1, K2, P1, P2, K3]);
        layout.fixed[CX] = 10.0;
        let x = DVector::from_vec(vec![800.0, 0.1, 0.0, 0.0, 0.0, 0.0]);
        let v = layout.intrinsics(&x);
        assert_eq!(v[FY], 400.0);
        assert_eq!(v[CX], 10.0);
        assert_eq!(v[K1], 0.1);
    }
}
