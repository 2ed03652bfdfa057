//! Plain-text calibration report.
//!
//! One section per style (intrinsics, distortion, errors, solve status)
//! followed by the per-junction reprojection-error grid of the style
//! selected for saving.

use crate::style::CalibrationStyle;
use crate::sweep::{CalibrationResult, CalibrationRun};
use calib_capture_core::BoardLayout;
use calib_capture_solver::{project_point, SolveStatus};
use nalgebra::Point3;
use std::fmt::Write;

/// Junction errors above this many pixels are counted as bad.
pub const BAD_JUNCTION_ERROR: f64 = 1.0;

/// Reprojection errors of one image, in board junction order.
#[derive(Clone, Debug, PartialEq)]
pub struct JunctionErrors {
    pub image: usize,
    /// `None` for junctions not found in this image.
    pub errors: Vec<Option<f64>>,
}

/// Reproject every found junction through the solved camera of `result`.
pub fn junction_errors(
    run: &CalibrationRun,
    result: &CalibrationResult,
    board: &dyn BoardLayout,
) -> Vec<JunctionErrors> {
    let k = &result.solution.camera_matrix;
    let dist = &result.solution.distortion;
    result
        .view_images(run.junctions.len())
        .into_iter()
        .zip(&result.solution.poses)
        .filter_map(|(image, pose)| {
            let found = run.junctions.get(image)?;
            let errors = (0..board.junction_count())
                .map(|id| {
                    let observed = found.image_point(id)?;
                    let on_board = board.junction_location(id)?;
                    let p = Point3::new(on_board.x as f64, on_board.y as f64, 0.0);
                    let predicted = project_point(k, dist, pose, &p);
                    Some((predicted - observed.cast::<f64>()).norm())
                })
                .collect();
            Some(JunctionErrors { image, errors })
        })
        .collect()
}

fn status_text(status: SolveStatus) -> &'static str {
    match status {
        SolveStatus::Converged => "converged",
        SolveStatus::MaxIterations => "iteration limit reached",
        SolveStatus::Degenerate => "degenerate",
    }
}

fn image_line(out: &mut String, run: &CalibrationRun, image: usize, error: f64) {
    let date = run
        .stamps
        .get(image)
        .map(|s| s.to_date_string())
        .unwrap_or_default();
    let _ = writeln!(out, "Image {image}, {date} - Reprojection error {error:5.3}");
}

fn style_section(out: &mut String, run: &CalibrationRun, result: &CalibrationResult) {
    let s = &result.solution;
    let k = &s.camera_matrix;
    let sd = &s.std_dev_intrinsics;
    let d = s.distortion.to_array();

    let _ = writeln!(
        out,
        "\nCamera calibration style {}, ({})",
        result.style.index(),
        result.style
    );
    match &result.images {
        None => out.push_str("Using all captured images\n"),
        Some(subset) => {
            let list: Vec<String> = subset.iter().map(usize::to_string).collect();
            let _ = writeln!(out, "Using  captured images: {}", list.join(", "));
        }
    }
    let _ = writeln!(
        out,
        "fx, fy, cx, cy: {:.6} {:.6} {:.6} {:.6}",
        k[(0, 0)],
        k[(1, 1)],
        k[(0, 2)],
        k[(1, 2)]
    );
    let _ = writeln!(
        out,
        "std dev fx, fy, cx, cy: {:.6} {:.6} {:.6} {:.6}",
        sd[0], sd[1], sd[2], sd[3]
    );
    let _ = writeln!(
        out,
        "k1, k2, p1, p2, k3: {:.6} {:.6} {:.6} {:.6} {:.6}",
        d[0], d[1], d[2], d[3], d[4]
    );
    let _ = writeln!(
        out,
        "std dev k1, k2, p1, p2, k3: {:.6} {:.6} {:.6} {:.6} {:.6}",
        sd[4], sd[5], sd[6], sd[7], sd[8]
    );
    let _ = writeln!(out, "Solve status: {}", status_text(s.status));
    let _ = writeln!(out, "Total reprojection error {:5.3}", s.rms);

    for (image, error) in result
        .view_images(run.junctions.len())
        .into_iter()
        .zip(&s.per_view_errors)
    {
        image_line(out, run, image, *error);
    }
}

fn junction_section(out: &mut String, run: &CalibrationRun, result: &CalibrationResult, board: &dyn BoardLayout) {
    let _ = writeln!(
        out,
        "\nIndividual junction re-projection errors for calibration style {} ({}).",
        result.style.index(),
        result.style
    );
    if result.status() == SolveStatus::Degenerate {
        out.push_str("No solution, nothing to reproject.\n");
        return;
    }

    let per_row = board.junctions_per_row().max(1);
    let per_view = result.solution.per_view_errors.iter();
    for (errors, view_error) in junction_errors(run, result, board).iter().zip(per_view) {
        image_line(out, run, errors.image, *view_error);
        image_grid(out, errors, per_row);
        out.push('\n');
    }
}

/// One image's junction errors, `per_row` to a line, then their rms and the
/// number above [`BAD_JUNCTION_ERROR`].
fn image_grid(out: &mut String, errors: &JunctionErrors, per_row: usize) {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    let mut bad = 0usize;
    for (id, e) in errors.errors.iter().enumerate() {
        match e {
            Some(e) => {
                let _ = write!(out, "{e:5.3} ");
                sum_sq += e * e;
                count += 1;
                if *e > BAD_JUNCTION_ERROR {
                    bad += 1;
                }
            }
            None => out.push_str("0.000 "),
        }
        if (id + 1) % per_row == 0 {
            out.push('\n');
        }
    }

    let rms = if count > 0 {
        (sum_sq / count as f64).sqrt()
    } else {
        0.0
    };
    let _ = writeln!(out, "Recalculated reprojection error: {rms:5.3} (rms pixels)");
    if bad > 0 {
        let _ = writeln!(out, "****** {bad} bad junction re-projection errors");
    }
}

/// Full report of a finished run.
pub fn create_report(run: &CalibrationRun, board: &dyn BoardLayout, style_to_save: CalibrationStyle) -> String {
    let mut out = String::new();
    let date = run
        .completed_at
        .map(|t| t.to_date_string())
        .unwrap_or_default();
    let _ = writeln!(out, "Camera calibration done on {date}.");
    let _ = writeln!(
        out,
        "With {}x{} images.",
        run.image_size.width, run.image_size.height
    );

    for result in &run.results {
        style_section(&mut out, run, result);
    }
    if let Some(saved) = run.result(style_to_save) {
        junction_section(&mut out, run, saved, board);
    }
    out
}
