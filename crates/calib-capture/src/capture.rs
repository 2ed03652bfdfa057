//! Capture-decision state machine.
//!
//! The board must be seen for a short while (Ready -> Tracking), then stop
//! moving (Tracking -> Stationary), then stay still long enough
//! (Stationary -> Captured). Losing the board from any state returns to
//! Ready. Transitions are computed by [`transition`], a function of the
//! current state and one frame event; the machine only applies its effects.

use crate::config::CaptureTiming;
use crate::projection::BoardProjection;
use crate::stability::StabilityTracker;
use crate::timestamp::Timestamp;
use log::{debug, info};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureStateKind {
    Ready,
    Tracking,
    Stationary,
    Captured,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureState {
    /// Waiting for the board to be in view long enough.
    Ready { last_empty: Timestamp },
    /// Board in view and moving.
    Tracking,
    /// Board still since `since`.
    Stationary { since: Timestamp },
    /// Frame taken; `corners` is the captured board outline.
    Captured { corners: [Point2<f32>; 4] },
}

impl CaptureState {
    pub fn kind(&self) -> CaptureStateKind {
        match self {
            CaptureState::Ready { .. } => CaptureStateKind::Ready,
            CaptureState::Tracking => CaptureStateKind::Tracking,
            CaptureState::Stationary { .. } => CaptureStateKind::Stationary,
            CaptureState::Captured { .. } => CaptureStateKind::Captured,
        }
    }

    /// Fraction of the dwell completed at `now`: 0 before the board is
    /// stationary, `elapsed / min_stationary_secs` while it is, 1 once captured.
    pub fn progress(&self, now: Timestamp, timing: &CaptureTiming) -> f64 {
        match self {
            CaptureState::Stationary { since } => {
                (now.seconds_since(*since) / timing.min_stationary_secs).clamp(0.0, 1.0)
            }
            CaptureState::Captured { .. } => 1.0,
            _ => 0.0,
        }
    }
}

/// Side effects requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureEffect {
    /// Reset the stability baseline to the current frame.
    ResetBaseline,
    /// Push the current frame into the capture store.
    Capture,
}

/// One frame as seen by the state machine.
#[derive(Clone, Copy, Debug)]
pub struct FrameEvent<'a> {
    pub stamp: Timestamp,
    pub board: Option<&'a BoardProjection>,
}

/// Next state and effect for one frame.
///
/// `stationary` runs the stability test; it is only invoked from Tracking
/// and Stationary, so the sliding baseline advances only there.
pub fn transition(
    state: CaptureState,
    event: FrameEvent<'_>,
    timing: &CaptureTiming,
    stationary: impl FnOnce(&BoardProjection) -> bool,
) -> (CaptureState, Option<CaptureEffect>) {
    let Some(board) = event.board else {
        return (
            CaptureState::Ready {
                last_empty: event.stamp,
            },
            None,
        );
    };

    match state {
        CaptureState::Ready { last_empty } => {
            if event.stamp.millis_since(last_empty) < timing.min_ready_ms {
                (state, None)
            } else {
                (CaptureState::Tracking, Some(CaptureEffect::ResetBaseline))
            }
        }
        CaptureState::Tracking => {
            if stationary(board) {
                (CaptureState::Stationary { since: event.stamp }, None)
            } else {
                (state, None)
            }
        }
        CaptureState::Stationary { since } => {
            if !stationary(board) {
                (CaptureState::Tracking, Some(CaptureEffect::ResetBaseline))
            } else if event.stamp.seconds_since(since) > timing.min_stationary_secs {
                (
                    CaptureState::Captured {
                        corners: *board.corners(),
                    },
                    Some(CaptureEffect::Capture),
                )
            } else {
                (state, None)
            }
        }
        CaptureState::Captured { .. } => (state, None),
    }
}

/// Progress outline drawn over the board: the first `fraction` of the
/// perimeter (walking TL, TR, BR, BL) is "done", the rest is "pending".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeedbackOutline {
    pub corners: [Point2<f32>; 4],
    pub fraction: f64,
}

/// One straight piece of a [`FeedbackOutline`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutlineSegment {
    pub from: Point2<f32>,
    pub to: Point2<f32>,
    pub done: bool,
}

impl FeedbackOutline {
    pub fn new(corners: [Point2<f32>; 4], fraction: f64) -> Self {
        Self {
            corners,
            fraction: fraction.clamp(0.0, 1.0),
        }
    }

    /// Split every edge at the progress point. Edge `j` covers the fraction
    /// range `[j/4, j/4 + 1/4]`.
    pub fn segments(&self) -> Vec<OutlineSegment> {
        let f = self.fraction;
        let mut out = Vec::with_capacity(8);
        for j in 0..4 {
            let beg = j as f64 / 4.0;
            let end = beg + 0.25;
            let p0 = self.corners[j];
            let p1 = self.corners[(j + 1) % 4];
            let split = if end <= f {
                p1
            } else if beg >= f {
                p0
            } else {
                let t = (4.0 * (f - beg)) as f32;
                Point2::from(p0.coords * (1.0 - t) + p1.coords * t)
            };
            if beg < f {
                out.push(OutlineSegment {
                    from: p0,
                    to: split,
                    done: true,
                });
            }
            if end > f {
                out.push(OutlineSegment {
                    from: split,
                    to: p1,
                    done: false,
                });
            }
        }
        out
    }
}

/// Result of feeding one frame to the machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickOutcome {
    /// The frame must be captured.
    pub capture: bool,
    /// Outline to draw for this frame, if any.
    pub feedback: Option<FeedbackOutline>,
}

#[derive(Clone, Debug)]
pub struct CaptureStateMachine {
    state: CaptureState,
    tracker: StabilityTracker,
    timing: CaptureTiming,
}

impl CaptureStateMachine {
    /// Start in Ready, counting the in-view time from `start`.
    pub fn new(start: Timestamp, timing: CaptureTiming) -> Self {
        Self {
            state: CaptureState::Ready { last_empty: start },
            tracker: StabilityTracker::new(timing.stationary_threshold),
            timing,
        }
    }

    #[inline]
    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    #[inline]
    pub fn kind(&self) -> CaptureStateKind {
        self.state.kind()
    }

    #[inline]
    pub fn timing(&self) -> &CaptureTiming {
        &self.timing
    }

    /// Feedback outline for the current state and frame.
    pub fn feedback(
        &self,
        stamp: Timestamp,
        board: Option<&BoardProjection>,
    ) -> Option<FeedbackOutline> {
        let board = board?;
        match self.state {
            CaptureState::Captured { corners } => Some(FeedbackOutline::new(corners, 1.0)),
            _ => Some(FeedbackOutline::new(
                *board.corners(),
                self.state.progress(stamp, &self.timing),
            )),
        }
    }

    /// Advance by one frame. Feedback reflects the state the frame arrived in.
    pub fn tick(&mut self, stamp: Timestamp, board: Option<&BoardProjection>) -> TickOutcome {
        let feedback = self.feedback(stamp, board);

        let before = self.state.kind();
        let tracker = &mut self.tracker;
        let (next, effect) = transition(
            self.state,
            FrameEvent { stamp, board },
            &self.timing,
            |b| tracker.test_stationary(b),
        );
        self.state = next;

        if let (Some(CaptureEffect::ResetBaseline), Some(b)) = (effect, board) {
            self.tracker.reset(b);
        }
        if before != self.state.kind() {
            debug!("capture state {:?} -> {:?}", before, self.state.kind());
        }
        let capture = effect == Some(CaptureEffect::Capture);
        if capture {
            info!("board stationary for {:.1} s, capturing frame", self.timing.min_stationary_secs);
        }

        TickOutcome { capture, feedback }
    }
}
