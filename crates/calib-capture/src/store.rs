//! Ordered collection of captured frames sharing one image size.

use crate::error::FrameRejected;
use crate::frame::ImageFrame;
use calib_capture_core::ImageSize;

#[derive(Clone, Debug)]
pub struct CapturedImageStore {
    size: ImageSize,
    frames: Vec<ImageFrame>,
}

impl CapturedImageStore {
    pub fn new(size: ImageSize) -> Self {
        Self {
            size,
            frames: Vec::new(),
        }
    }

    #[inline]
    pub fn size(&self) -> ImageSize {
        self.size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn frames(&self) -> &[ImageFrame] {
        &self.frames
    }

    /// Check a frame size against the store's.
    pub fn accepts(&self, size: ImageSize) -> Result<(), FrameRejected> {
        if size == self.size {
            Ok(())
        } else {
            Err(FrameRejected {
                expected: self.size,
                actual: size,
            })
        }
    }

    /// Append a frame; returns its index.
    pub fn capture(&mut self, frame: ImageFrame) -> Result<usize, FrameRejected> {
        self.accepts(frame.size())?;
        self.frames.push(frame);
        log::info!("captured image {} ({} total)", self.frames.len() - 1, self.frames.len());
        Ok(self.frames.len() - 1)
    }

    /// One line summary: `# captured images:N, w:W, h:H`.
    pub fn status(&self) -> String {
        format!(
            "# captured images:{}, w:{}, h:{}",
            self.frames.len(),
            self.size.width,
            self.size.height
        )
    }
}
