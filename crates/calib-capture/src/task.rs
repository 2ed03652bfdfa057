//! Calibration sweep on a background worker thread.
//!
//! The task owns a snapshot of the captured frames. [`AsyncCalibrationTask::poll`]
//! starts the worker on its first call and afterwards checks the result
//! channel without blocking.

use crate::config::CalibrateConfig;
use crate::frame::ImageFrame;
use crate::persist::{save_camera_info, CameraInfo};
use crate::report::create_report;
use crate::sweep::{CalibrationRun, CalibrationSweep};
use crate::timestamp::Timestamp;
use log::{info, warn};
use std::any::Any;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;

enum TaskState {
    Pending(Vec<ImageFrame>),
    Working {
        receiver: Receiver<CalibrationRun>,
        handle: JoinHandle<()>,
    },
    Done(Box<CalibrationRun>),
    Failed,
}

/// Lifecycle stage reported by [`AsyncCalibrationTask::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Working,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Working => "working",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

pub struct AsyncCalibrationTask {
    sweep: CalibrationSweep,
    config: CalibrateConfig,
    state: TaskState,
}

impl AsyncCalibrationTask {
    pub fn new(sweep: CalibrationSweep, frames: Vec<ImageFrame>, config: CalibrateConfig) -> Self {
        Self {
            sweep,
            config,
            state: TaskState::Pending(frames),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self.state {
            TaskState::Pending(_) => TaskStatus::Pending,
            TaskState::Working { .. } => TaskStatus::Working,
            TaskState::Done(_) => TaskStatus::Done,
            TaskState::Failed => TaskStatus::Failed,
        }
    }

    /// `CalibrateCameraTask status: <stage>`.
    pub fn status_line(&self) -> String {
        format!("CalibrateCameraTask status: {}", self.status().as_str())
    }

    /// Finished run, once the worker has delivered it.
    pub fn run(&self) -> Option<&CalibrationRun> {
        match &self.state {
            TaskState::Done(run) => Some(run.as_ref()),
            _ => None,
        }
    }

    /// Advance the task; never blocks.
    ///
    /// Returns the queue acknowledgement on the first call, the save status
    /// and report when the result arrives, and an empty string otherwise.
    pub fn poll(&mut self, now: Timestamp) -> String {
        match std::mem::replace(&mut self.state, TaskState::Failed) {
            TaskState::Pending(frames) => self.start(frames),
            TaskState::Working { receiver, handle } => match receiver.try_recv() {
                Ok(mut run) => {
                    if let Err(panic) = handle.join() {
                        warn!(
                            "calibration worker panicked after sending its result: {}",
                            panic_message(&*panic)
                        );
                    }
                    run.completed_at = Some(now);
                    let text = self.finish(&run, now);
                    self.state = TaskState::Done(Box::new(run));
                    text
                }
                Err(TryRecvError::Empty) => {
                    self.state = TaskState::Working { receiver, handle };
                    String::new()
                }
                Err(TryRecvError::Disconnected) => {
                    match handle.join() {
                        Err(panic) => {
                            warn!("calibration worker panicked: {}", panic_message(&*panic))
                        }
                        Ok(()) => warn!("calibration worker exited without a result"),
                    }
                    "Calibration worker stopped without a result.\n".to_string()
                }
            },
            done @ TaskState::Done(_) => {
                self.state = done;
                String::new()
            }
            TaskState::Failed => String::new(),
        }
    }

    fn start(&mut self, frames: Vec<ImageFrame>) -> String {
        let (sender, receiver) = mpsc::channel();
        let sweep = self.sweep.clone();
        let count = frames.len();
        let spawned = std::thread::Builder::new()
            .name("calibrate-camera".to_string())
            .spawn(move || {
                let run = sweep.run(frames);
                // The receiver is gone when the session was reset meanwhile.
                let _ = sender.send(run);
            });
        match spawned {
            Ok(handle) => {
                info!("calibration of {count} images queued");
                self.state = TaskState::Working { receiver, handle };
                "Calibrate camera task queued.".to_string()
            }
            Err(e) => {
                warn!("failed to start calibration worker: {e}");
                format!("Failed to start calibration worker: {e}")
            }
        }
    }

    fn finish(&self, run: &CalibrationRun, now: Timestamp) -> String {
        let style = self.config.style_to_save();
        let mut text = match run.result(style) {
            Some(result) if !result.solution.is_degenerate() => {
                let info = CameraInfo::from_result(&self.config.camera_name, now, run.image_size, result);
                save_camera_info(&info, &self.config).unwrap_or_else(|e| {
                    warn!("saving calibration failed: {e}");
                    format!(
                        "Failed to save calibration for camera '{}': {e}\n",
                        self.config.camera_name
                    )
                })
            }
            _ => format!(
                "Calibration style {} ({style}) has no solution, camera '{}' not saved.\n",
                style.index(),
                self.config.camera_name
            ),
        };
        text.push_str(&create_report(run, self.sweep.detector().board(), style));
        text
    }
}

/// Text of a `panic!` payload, when it carries one.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl std::fmt::Debug for AsyncCalibrationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCalibrationTask")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
