use calib_capture_core::{
    BoardLayout, CharucoBoard, CharucoBoardSpec, DltHomographySolver, Homography, HomographySolver,
};
use nalgebra::{Matrix3, Point2};

fn warp() -> Homography {
    Homography::new(Matrix3::new(
        520.0, 40.0, 80.0, //
        -25.0, 480.0, 60.0, //
        0.08, -0.05, 1.0,
    ))
}

#[test]
fn marker_homographies_predict_every_adjacent_junction() {
    let board = CharucoBoard::new(CharucoBoardSpec::default()).expect("board");
    let truth = warp();
    let solver = DltHomographySolver;

    for id in 0..board.junction_count() {
        let location = board.junction_location(id).expect("junction");
        let expected = truth.apply(location);
        let adjacent = board.adjacent_markers(id);
        assert_eq!(adjacent.len(), 2, "junction {id}");
        for adj in adjacent {
            let on_board = board.marker_corners(adj.marker_id).expect("marker");
            let in_image = truth.apply_all(&on_board);
            let local = solver.solve(&on_board, &in_image).expect("marker homography");
            let predicted = local.apply(location);
            assert!(
                (predicted - expected).norm() < 1e-2,
                "junction {id} via marker {}: {predicted:?} vs {expected:?}",
                adj.marker_id
            );
        }
    }
}

#[test]
fn all_marker_corners_recover_the_board_outline() {
    let board = CharucoBoard::new(CharucoBoardSpec::default()).expect("board");
    let truth = warp();
    let mut src = Vec::new();
    let mut dst = Vec::new();
    for id in 0..board.marker_count() as u32 {
        let corners = board.marker_corners(id).expect("marker");
        src.extend_from_slice(&corners);
        dst.extend(truth.apply_all(&corners));
    }
    let fitted = DltHomographySolver.solve(&src, &dst).expect("board homography");
    for corner in board.board_corners() {
        let a: Point2<f32> = fitted.apply(corner);
        let b = truth.apply(corner);
        assert!((a - b).norm() < 1e-2, "{a:?} vs {b:?}");
    }
}
