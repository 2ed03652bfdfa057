//! Multi-style calibration over a set of captured frames.

use crate::annotate;
use crate::frame::{BoardDetector, ImageFrame};
use crate::junction::{FrameJunctions, JunctionInterpolator};
use crate::style::{CalibrationStyle, SolveSetup};
use crate::timestamp::Timestamp;
use calib_capture_core::{CornerSubPixRefiner, ImageSize, SubPixelRefiner};
use calib_capture_solver::{
    CalibrationFlags, CalibrationInput, CalibrationSolution, LevenbergMarquardtSolver,
    NonlinearCalibrationSolver, SolveStatus,
};
use image::RgbImage;
use log::{info, warn};
use nalgebra::{Point2, Point3};
use std::sync::Arc;

/// Views with fewer junctions cannot constrain a pose and are left out.
pub const MIN_VIEW_JUNCTIONS: usize = 4;

/// Outcome of one style.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationResult {
    pub style: CalibrationStyle,
    /// Images used, in view order; `None` means every captured image.
    /// Images with fewer than [`MIN_VIEW_JUNCTIONS`] junctions are never used.
    pub images: Option<Vec<usize>>,
    pub flags: CalibrationFlags,
    pub solution: CalibrationSolution,
}

impl CalibrationResult {
    #[inline]
    pub fn status(&self) -> SolveStatus {
        self.solution.status
    }

    /// Captured-image index of every solved view.
    pub fn view_images(&self, image_count: usize) -> Vec<usize> {
        match &self.images {
            Some(subset) => subset.clone(),
            None => (0..image_count).collect(),
        }
    }
}

/// Everything one sweep produced.
#[derive(Clone, Debug)]
pub struct CalibrationRun {
    pub image_size: ImageSize,
    pub stamps: Vec<Timestamp>,
    pub junctions: Vec<FrameJunctions>,
    pub marked_images: Vec<RgbImage>,
    /// One result per entry of [`CalibrationStyle::ALL`], in that order.
    pub results: Vec<CalibrationResult>,
    pub completed_at: Option<Timestamp>,
    valid: bool,
}

impl CalibrationRun {
    /// Assemble a run from already computed parts. It is valid when it holds
    /// one result per style.
    pub fn from_parts(
        image_size: ImageSize,
        stamps: Vec<Timestamp>,
        junctions: Vec<FrameJunctions>,
        marked_images: Vec<RgbImage>,
        results: Vec<CalibrationResult>,
    ) -> Self {
        let valid = results.len() == CalibrationStyle::ALL.len();
        Self {
            image_size,
            stamps,
            junctions,
            marked_images,
            results,
            completed_at: None,
            valid,
        }
    }

    /// True once every style has been attempted.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn result(&self, style: CalibrationStyle) -> Option<&CalibrationResult> {
        self.results.iter().find(|r| r.style == style)
    }
}

/// Junction extraction followed by one solve per style.
#[derive(Clone)]
pub struct CalibrationSweep {
    detector: BoardDetector,
    refiner: Arc<dyn SubPixelRefiner>,
    solver: Arc<dyn NonlinearCalibrationSolver>,
}

impl CalibrationSweep {
    pub fn new(detector: BoardDetector) -> Self {
        Self {
            detector,
            refiner: Arc::new(CornerSubPixRefiner::default()),
            solver: Arc::new(LevenbergMarquardtSolver::default()),
        }
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn SubPixelRefiner>) -> Self {
        self.refiner = refiner;
        self
    }

    pub fn with_solver(mut self, solver: Arc<dyn NonlinearCalibrationSolver>) -> Self {
        self.solver = solver;
        self
    }

    #[inline]
    pub fn detector(&self) -> &BoardDetector {
        &self.detector
    }

    /// Re-detect every frame precisely, locate junctions and run all styles.
    pub fn run(&self, mut frames: Vec<ImageFrame>) -> CalibrationRun {
        let image_size = frames
            .first()
            .map(ImageFrame::size)
            .unwrap_or(ImageSize::new(0, 0));
        info!("calibration sweep over {} images", frames.len());

        let interpolator = JunctionInterpolator::new(
            self.detector.board(),
            self.detector.homography_solver(),
            self.refiner.as_ref(),
        );

        let mut junctions = Vec::with_capacity(frames.len());
        let mut marked_images = Vec::with_capacity(frames.len());
        for frame in &mut frames {
            frame.redetect(&self.detector);
            let mut marked = annotate::to_rgb(frame.image());
            annotate::draw_markers(&mut marked, frame.markers());

            let found = interpolator.interpolate(&frame.image().view(), frame.markers());
            for (p, w) in found.image_points.iter().zip(&found.windows) {
                annotate::draw_junction(&mut marked, *p, *w);
            }
            junctions.push(found);
            marked_images.push(marked);
        }

        let results = CalibrationStyle::ALL
            .iter()
            .map(|&style| self.run_style(style, image_size, &junctions))
            .collect();

        CalibrationRun::from_parts(
            image_size,
            frames.iter().map(ImageFrame::stamp).collect(),
            junctions,
            marked_images,
            results,
        )
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip_all, fields(style = %style)))]
    fn run_style(
        &self,
        style: CalibrationStyle,
        size: ImageSize,
        junctions: &[FrameJunctions],
    ) -> CalibrationResult {
        let plan = style.plan(size);
        let wanted: Vec<usize> = match &plan.images {
            Some(subset) => subset.iter().copied().filter(|&i| i < junctions.len()).collect(),
            None => (0..junctions.len()).collect(),
        };
        let (kept, dropped): (Vec<usize>, Vec<usize>) = wanted
            .into_iter()
            .partition(|&i| junctions[i].image_points.len() >= MIN_VIEW_JUNCTIONS);
        if !dropped.is_empty() {
            warn!(
                "style {} ({}): leaving out images {dropped:?} with fewer than {MIN_VIEW_JUNCTIONS} junctions",
                style.index(),
                style
            );
        }
        let views: Vec<&FrameJunctions> = kept.iter().map(|&i| &junctions[i]).collect();
        let images = (plan.images.is_some() || kept.len() != junctions.len()).then_some(kept);
        let object_points: Vec<Vec<Point3<f32>>> =
            views.iter().map(|j| j.board_points.clone()).collect();
        let image_points: Vec<Vec<Point2<f32>>> =
            views.iter().map(|j| j.image_points.clone()).collect();

        let solve = |setup: &SolveSetup| {
            self.solver.calibrate(&CalibrationInput {
                object_points: &object_points,
                image_points: &image_points,
                image_size: size,
                flags: setup.flags,
                camera_matrix: setup.camera_matrix,
                distortion: setup.distortion,
            })
        };

        // Two-stage styles keep only the second solve.
        let mut setup = plan.solve;
        let mut seed_failed = false;
        if let Some(seed_setup) = plan.seed.as_ref() {
            let seed = solve(seed_setup);
            if seed.is_degenerate() {
                seed_failed = true;
            } else {
                setup.camera_matrix = seed.camera_matrix;
                setup.distortion = seed.distortion;
            }
        }
        let solution = if seed_failed {
            CalibrationSolution::degenerate(views.len())
        } else {
            solve(&setup)
        };

        match solution.status {
            SolveStatus::Converged => info!(
                "style {} ({}): rms {:.3} px after {} evaluations",
                style.index(),
                style,
                solution.rms,
                solution.evaluations
            ),
            SolveStatus::MaxIterations => warn!(
                "style {} ({}) hit the iteration limit, rms {:.3} px",
                style.index(),
                style,
                solution.rms
            ),
            SolveStatus::Degenerate => warn!("style {} ({}) is degenerate", style.index(), style),
        }

        CalibrationResult {
            style,
            images,
            flags: setup.flags,
            solution,
        }
    }
}
