use anyhow::Result;

use crate::detect::result::{Detection, DetectionParams};
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps a pretrained object detector. It receives one frame at a
/// time and returns the boxes it found, already filtered by
/// `params.confidence_threshold` and de-overlapped with
/// `params.nms_threshold`. Boxes are expressed in the pixel space of the
/// frame that was passed in.
///
/// Backends run on a watchdog worker thread, hence `Send`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        (**self).detect(frame, params)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
