//! Frame-driven capture session with a text command interface.

use crate::annotate;
use crate::capture::{CaptureStateKind, CaptureStateMachine, FeedbackOutline};
use crate::config::CalibrateConfig;
use crate::error::ConfigError;
use crate::frame::{BoardDetector, ImageFrame};
use crate::persist;
use crate::store::CapturedImageStore;
use crate::sweep::CalibrationSweep;
use crate::task::AsyncCalibrationTask;
use crate::timestamp::Timestamp;
use calib_capture_core::{GrayImage, MarkerDetector, SubPixelRefiner};
use calib_capture_solver::NonlinearCalibrationSolver;
use image::RgbImage;
use log::{info, warn};
use std::sync::Arc;

/// A frame that entered the captured image store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureEvent {
    /// Index in the store.
    pub index: usize,
    pub stamp: Timestamp,
    /// Requested with the `capture` command rather than by the state machine.
    pub manual: bool,
}

/// Captured images and the state machine deciding what to add next.
#[derive(Debug)]
struct LiveCapture {
    store: CapturedImageStore,
    machine: CaptureStateMachine,
}

#[derive(Clone, Copy, Debug, Default)]
struct PreviewRotation {
    index: usize,
    last_switch: Option<Timestamp>,
}

/// Ties frame capture, the calibration worker and its preview together.
///
/// The image size is fixed by the first submitted frame; later frames of
/// another size are dropped.
pub struct CalibrationSession {
    config: CalibrateConfig,
    detector: BoardDetector,
    sweep: CalibrationSweep,
    live: Option<LiveCapture>,
    capture_next: bool,
    feedback: Option<FeedbackOutline>,
    annotated: Option<RgbImage>,
    task: Option<AsyncCalibrationTask>,
    preview: PreviewRotation,
}

impl CalibrationSession {
    pub fn new(config: CalibrateConfig, markers: Arc<dyn MarkerDetector>) -> Result<Self, ConfigError> {
        let board = config.build_board()?;
        let detector = BoardDetector::new(markers, Arc::new(board));
        Ok(Self {
            config,
            sweep: CalibrationSweep::new(detector.clone()),
            detector,
            live: None,
            capture_next: false,
            feedback: None,
            annotated: None,
            task: None,
            preview: PreviewRotation::default(),
        })
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn SubPixelRefiner>) -> Self {
        self.sweep = self.sweep.with_refiner(refiner);
        self
    }

    pub fn with_solver(mut self, solver: Arc<dyn NonlinearCalibrationSolver>) -> Self {
        self.sweep = self.sweep.with_solver(solver);
        self
    }

    #[inline]
    pub fn config(&self) -> &CalibrateConfig {
        &self.config
    }

    #[inline]
    pub fn detector(&self) -> &BoardDetector {
        &self.detector
    }

    pub fn store(&self) -> Option<&CapturedImageStore> {
        self.live.as_ref().map(|l| &l.store)
    }

    pub fn capture_state(&self) -> Option<CaptureStateKind> {
        self.live.as_ref().map(|l| l.machine.kind())
    }

    /// Outline drawn for the most recent accepted frame.
    pub fn feedback(&self) -> Option<&FeedbackOutline> {
        self.feedback.as_ref()
    }

    /// Most recent accepted frame with markers, captured boards and feedback drawn.
    pub fn annotated_frame(&self) -> Option<&RgbImage> {
        self.annotated.as_ref()
    }

    pub fn calibration_complete(&self) -> bool {
        self.task.as_ref().and_then(|t| t.run()).is_some()
    }

    /// Process one camera frame.
    pub fn submit_frame(&mut self, image: GrayImage, stamp: Timestamp) -> Option<CaptureEvent> {
        let timing = self.config.timing;
        let live = self.live.get_or_insert_with(|| LiveCapture {
            store: CapturedImageStore::new(image.size()),
            machine: CaptureStateMachine::new(stamp, timing),
        });
        if let Err(rejected) = live.store.accepts(image.size()) {
            warn!("dropping frame: {rejected}");
            return None;
        }

        let frame = ImageFrame::detect(image, stamp, &self.detector);
        let manual = std::mem::take(&mut self.capture_next);
        let outcome = live.machine.tick(stamp, frame.projection());

        let mut marked = annotate::to_rgb(frame.image());
        annotate::draw_markers(&mut marked, frame.markers());
        for captured in live.store.frames() {
            if let Some(p) = captured.projection() {
                annotate::draw_board_outline(&mut marked, p.corners(), annotate::CAPTURED_BOARD_COLOR);
            }
        }
        if let Some(outline) = &outcome.feedback {
            annotate::draw_feedback(&mut marked, outline);
        }
        self.annotated = Some(marked);
        self.feedback = outcome.feedback;

        if !(manual || outcome.capture) {
            return None;
        }
        let index = live.store.capture(frame).ok()?;
        if manual {
            info!("manual capture of image {index}");
        }
        Some(CaptureEvent {
            index,
            stamp,
            manual,
        })
    }

    /// Run a text command and return its status message.
    pub fn command(&mut self, cmd: &str, now: Timestamp) -> String {
        match cmd.trim() {
            "capture" => {
                self.capture_next = true;
                "An image will be captured.".to_string()
            }
            "status" => self.status(),
            "save_images" => self.save_images(),
            "load_images" => self.load_images(now),
            "calibrate" => self.calibrate(),
            "reset" => {
                self.reset();
                "Calibration session reset.".to_string()
            }
            other => format!("Unknown command: {other}"),
        }
    }

    fn status(&self) -> String {
        let mut text = match &self.live {
            Some(live) => live.store.status(),
            None => CapturedImageStore::new(calib_capture_core::ImageSize::new(0, 0)).status(),
        };
        if let Some(task) = &self.task {
            text.push('\n');
            text.push_str(&task.status_line());
        }
        text
    }

    fn save_images(&self) -> String {
        let Some(live) = &self.live else {
            return "No images to save.".to_string();
        };
        match persist::save_images(&live.store, &self.config) {
            Ok(path) => format!("Saved {} images to {}", live.store.len(), path.display()),
            Err(e) => {
                warn!("saving images failed: {e}");
                format!("Failed to save images: {e}")
            }
        }
    }

    fn load_images(&mut self, now: Timestamp) -> String {
        match persist::load_images(&self.config, &self.detector) {
            Ok(store) => {
                self.reset();
                let status = store.status();
                self.live = Some(LiveCapture {
                    store,
                    machine: CaptureStateMachine::new(now, self.config.timing),
                });
                status
            }
            Err(e) => {
                warn!("loading images failed: {e}");
                format!("Failed to load images: {e}")
            }
        }
    }

    fn calibrate(&mut self) -> String {
        self.task = None;
        self.preview = PreviewRotation::default();
        let frames = match &self.live {
            Some(live) if !live.store.is_empty() => live.store.frames().to_vec(),
            _ => return "Cannot calibrate with zero images.".to_string(),
        };
        self.task = Some(AsyncCalibrationTask::new(
            self.sweep.clone(),
            frames,
            self.config.clone(),
        ));
        "Calibration queued.".to_string()
    }

    fn reset(&mut self) {
        self.live = None;
        self.task = None;
        self.capture_next = false;
        self.feedback = None;
        self.annotated = None;
        self.preview = PreviewRotation::default();
    }

    /// Drive the calibration task; empty when there is nothing to report.
    pub fn poll(&mut self, now: Timestamp) -> String {
        self.task
            .as_mut()
            .map(|t| t.poll(now))
            .unwrap_or_default()
    }

    /// Annotated captured image, rotating every `preview_period_ms` once
    /// calibration has finished.
    pub fn get_marked_preview(&mut self, now: Timestamp) -> Option<RgbImage> {
        let images = &self.task.as_ref()?.run()?.marked_images;
        if images.is_empty() {
            return None;
        }
        match self.preview.last_switch {
            None => self.preview.last_switch = Some(now),
            Some(last) if now.millis_since(last) > self.config.timing.preview_period_ms => {
                self.preview.index += 1;
                self.preview.last_switch = Some(now);
            }
            Some(_) => {}
        }
        images.get(self.preview.index % images.len()).cloned()
    }
}

impl std::fmt::Debug for CalibrationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationSession")
            .field("live", &self.live)
            .field("capture_next", &self.capture_next)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_capture_core::{GrayImageView, MarkerDetection};

    struct NoMarkers;

    impl MarkerDetector for NoMarkers {
        fn detect(&self, _image: &GrayImageView<'_>, _precise: bool) -> Vec<MarkerDetection> {
            Vec::new()
        }
    }

    fn session() -> CalibrationSession {
        CalibrationSession::new(CalibrateConfig::default(), Arc::new(NoMarkers)).expect("session")
    }

    #[test]
    fn manual_capture_takes_the_next_frame_only() {
        let mut s = session();
        let now = Timestamp::from_nanos(0);
        assert_eq!(s.command("capture", now), "An image will be captured.");
        let event = s.submit_frame(GrayImage::filled(8, 6, 0), now).expect("captured");
        assert!(event.manual);
        assert_eq!(event.index, 0);
        assert!(s.submit_frame(GrayImage::filled(8, 6, 0), now).is_none());
        assert_eq!(s.command("status", now), "# captured images:1, w:8, h:6");
    }

    #[test]
    fn mismatched_frames_are_dropped() {
        let mut s = session();
        let now = Timestamp::from_nanos(0);
        s.submit_frame(GrayImage::filled(8, 6, 0), now);
        s.command("capture", now);
        assert!(s.submit_frame(GrayImage::filled(6, 8, 0), now).is_none());
        assert_eq!(s.store().map(CapturedImageStore::len), Some(0));
        assert!(s.annotated_frame().is_some_and(|img| img.dimensions() == (8, 6)));
    }

    #[test]
    fn zero_images_cannot_be_calibrated() {
        let mut s = session();
        let now = Timestamp::from_nanos(0);
        assert_eq!(s.command("calibrate", now), "Cannot calibrate with zero images.");
        assert_eq!(s.poll(now), "");
        assert_eq!(s.command("status", now), "# captured images:0, w:0, h:0");
    }

    #[test]
    fn calibrate_after_reset_drops_the_previous_task() {
        let mut s = session();
        let now = Timestamp::from_nanos(0);
        s.command("capture", now);
        s.submit_frame(GrayImage::filled(8, 6, 0), now);
        assert_eq!(s.command("calibrate", now), "Calibration queued.");
        assert!(s.command("status", now).ends_with("CalibrateCameraTask status: pending"));

        s.command("reset", now);
        s.submit_frame(GrayImage::filled(8, 6, 0), now);
        s.task = Some(AsyncCalibrationTask::new(
            s.sweep.clone(),
            Vec::new(),
            s.config.clone(),
        ));
        assert_eq!(s.command("calibrate", now), "Cannot calibrate with zero images.");
        assert!(s.task.is_none());
        assert_eq!(s.command("status", now), "# captured images:0, w:8, h:6");
    }

    #[test]
    fn unknown_and_reset_commands() {
        let mut s = session();
        let now = Timestamp::from_nanos(0);
        assert_eq!(s.command("explode", now), "Unknown command: explode");
        s.submit_frame(GrayImage::filled(4, 4, 0), now);
        assert!(s.store().is_some());
        s.command("reset", now);
        assert!(s.store().is_none());
        assert!(s.get_marked_preview(now).is_none());
    }
}
