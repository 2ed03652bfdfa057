//! Calibration styles: which camera parameters each solve may move.

use calib_capture_core::ImageSize;
use calib_capture_solver::{camera_matrix, CalibrationFlags, Distortion};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Constraint presets, in sweep order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStyle {
    /// Only the focal length is free.
    MinimumFreedom,
    K1Free,
    K2Free,
    PrincipalPointFree,
    UnequalFocalLengths,
    TangentDistortion,
    /// Every parameter is free.
    K3Free,
    /// Poses only, from a fixed intrinsic seed.
    Custom,
    /// Seeded by a k1-free solve, then re-solved with a free principal point.
    AK1FreeBFixPrincipalPointFree,
    /// `PrincipalPointFree` on the first five captured images.
    PrincipalPointFreeFirstFive,
}

/// Intrinsic seed of the `Custom` style.
const CUSTOM_FOCAL: f64 = 699.3550;
const CUSTOM_CENTER: (f64, f64) = (650.0850, 354.6600);
const CUSTOM_K1: f64 = -0.1716;
const CUSTOM_K2: f64 = 0.0246;

/// Flags and initial guess for one solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveSetup {
    pub flags: CalibrationFlags,
    pub camera_matrix: Matrix3<f64>,
    pub distortion: Distortion,
}

/// Everything the sweep needs to run one style.
#[derive(Clone, Debug, PartialEq)]
pub struct StylePlan {
    /// Images to calibrate from; `None` means all.
    pub images: Option<Vec<usize>>,
    /// Solve whose result seeds [`StylePlan::solve`].
    pub seed: Option<SolveSetup>,
    pub solve: SolveSetup,
}

impl CalibrationStyle {
    pub const ALL: [CalibrationStyle; 10] = [
        CalibrationStyle::MinimumFreedom,
        CalibrationStyle::K1Free,
        CalibrationStyle::K2Free,
        CalibrationStyle::PrincipalPointFree,
        CalibrationStyle::UnequalFocalLengths,
        CalibrationStyle::TangentDistortion,
        CalibrationStyle::K3Free,
        CalibrationStyle::Custom,
        CalibrationStyle::AK1FreeBFixPrincipalPointFree,
        CalibrationStyle::PrincipalPointFreeFirstFive,
    ];

    /// Position in [`CalibrationStyle::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index_clamped(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    pub fn name(self) -> &'static str {
        match self {
            CalibrationStyle::MinimumFreedom => "minimum_freedom",
            CalibrationStyle::K1Free => "k1_free",
            CalibrationStyle::K2Free => "k2_free",
            CalibrationStyle::PrincipalPointFree => "principal_point_free",
            CalibrationStyle::UnequalFocalLengths => "unequal_focal_lengths",
            CalibrationStyle::TangentDistortion => "tangent_distortion",
            CalibrationStyle::K3Free => "k3_free",
            CalibrationStyle::Custom => "custom",
            CalibrationStyle::AK1FreeBFixPrincipalPointFree => {
                "a_k1_free_b_fix_principal_point_free"
            }
            CalibrationStyle::PrincipalPointFreeFirstFive => "principal_point_free_first_five",
        }
    }

    /// Solve plan for images of `size`.
    pub fn plan(self, size: ImageSize) -> StylePlan {
        let centred = camera_matrix(
            1.0,
            1.0,
            (size.width / 2) as f64,
            (size.height / 2) as f64,
        );
        let unit_focal = camera_matrix(1.0, 1.0, 0.0, 0.0);
        let locked = CalibrationFlags {
            fix_principal_point: true,
            fix_aspect_ratio: true,
            zero_tangent_dist: true,
            fix_k1: true,
            fix_k2: true,
            fix_k3: true,
            ..CalibrationFlags::default()
        };
        let setup = |flags, camera_matrix| SolveSetup {
            flags,
            camera_matrix,
            distortion: Distortion::default(),
        };
        let k1_free = CalibrationFlags {
            fix_k1: false,
            ..locked
        };
        let principal_point_free = CalibrationFlags {
            fix_aspect_ratio: true,
            zero_tangent_dist: true,
            fix_k3: true,
            ..CalibrationFlags::default()
        };

        let mut images = None;
        let mut seed = None;
        let solve = match self {
            CalibrationStyle::MinimumFreedom => setup(locked, centred),
            CalibrationStyle::K1Free => setup(k1_free, centred),
            CalibrationStyle::K2Free => setup(
                CalibrationFlags {
                    fix_k2: false,
                    ..k1_free
                },
                centred,
            ),
            CalibrationStyle::PrincipalPointFree => setup(principal_point_free, unit_focal),
            CalibrationStyle::UnequalFocalLengths => setup(
                CalibrationFlags {
                    zero_tangent_dist: true,
                    fix_k3: true,
                    ..CalibrationFlags::default()
                },
                Matrix3::zeros(),
            ),
            CalibrationStyle::TangentDistortion => setup(
                CalibrationFlags {
                    fix_k3: true,
                    ..CalibrationFlags::default()
                },
                Matrix3::zeros(),
            ),
            CalibrationStyle::K3Free => setup(CalibrationFlags::default(), Matrix3::zeros()),
            CalibrationStyle::Custom => SolveSetup {
                flags: CalibrationFlags {
                    use_intrinsic_guess: true,
                    fix_focal_length: true,
                    ..locked
                },
                camera_matrix: camera_matrix(
                    CUSTOM_FOCAL,
                    CUSTOM_FOCAL,
                    CUSTOM_CENTER.0,
                    CUSTOM_CENTER.1,
                ),
                distortion: Distortion {
                    k1: CUSTOM_K1,
                    k2: CUSTOM_K2,
                    ..Distortion::default()
                },
            },
            CalibrationStyle::AK1FreeBFixPrincipalPointFree => {
                seed = Some(setup(k1_free, centred));
                // Camera matrix and distortion come from the seed result.
                setup(
                    CalibrationFlags {
                        use_intrinsic_guess: true,
                        ..principal_point_free
                    },
                    Matrix3::zeros(),
                )
            }
            CalibrationStyle::PrincipalPointFreeFirstFive => {
                images = Some((0..5).collect());
                setup(principal_point_free, unit_focal)
            }
        };
        StylePlan {
            images,
            seed,
            solve,
        }
    }
}

impl std::fmt::Display for CalibrationStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_sweep_order() {
        for (i, s) in CalibrationStyle::ALL.iter().enumerate() {
            assert_eq!(s.index(), i);
        }
        assert_eq!(CalibrationStyle::from_index_clamped(2), CalibrationStyle::K2Free);
        assert_eq!(
            CalibrationStyle::from_index_clamped(usize::MAX),
            CalibrationStyle::PrincipalPointFreeFirstFive
        );
    }

    #[test]
    fn freedom_grows_along_the_first_styles() {
        let size = ImageSize::new(1280, 720);
        let min = CalibrationStyle::MinimumFreedom.plan(size).solve;
        assert!(min.flags.fix_k1 && min.flags.fix_principal_point);
        assert_eq!(min.camera_matrix[(0, 2)], 640.0);

        let k1 = CalibrationStyle::K1Free.plan(size).solve.flags;
        assert!(!k1.fix_k1 && k1.fix_k2);

        let all = CalibrationStyle::K3Free.plan(size).solve.flags;
        assert_eq!(all, CalibrationFlags::default());
    }

    #[test]
    fn two_stage_style_has_seed_and_guess() {
        let plan = CalibrationStyle::AK1FreeBFixPrincipalPointFree.plan(ImageSize::new(640, 480));
        let seed = plan.seed.expect("seed stage");
        assert!(!seed.flags.fix_k1 && seed.flags.fix_principal_point);
        assert!(plan.solve.flags.use_intrinsic_guess);
        assert!(!plan.solve.flags.fix_principal_point);
        assert!(plan.images.is_none());
    }

    #[test]
    fn first_five_uses_an_image_subset() {
        let plan = CalibrationStyle::PrincipalPointFreeFirstFive.plan(ImageSize::new(640, 480));
        assert_eq!(plan.images, Some(vec![0, 1, 2, 3, 4]));
        assert_eq!(
            plan.solve.flags,
            CalibrationStyle::PrincipalPointFree.plan(ImageSize::new(640, 480)).solve.flags
        );
    }
}
