//! Frame ingestion sources.
//!
//! - still images (JPEG/PNG) via `image::load_image`
//! - local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//! - `stub://` synthetic sources for tests and dry runs
//!
//! Every source yields owned `Frame`s stamped with their capture time.

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod image;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::{CameraConfig, CameraSource};
pub use file::{FileConfig, FileSource};
pub use self::image::load_image;

/// A stream of frames consumed by the video and camera pipelines.
pub trait FrameSource {
    /// Open the underlying device or file. Failure is fatal for the run.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Human-readable name of the source, for logs and progress output.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Synthetic test pattern shared by the `stub://` sources.
pub(crate) fn synthetic_pixels(width: u32, height: u32, frame_index: u64) -> Vec<u8> {
    let pixel_count = width as usize * height as usize * 3;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_index) % 256) as u8;
    }
    pixels
}

pub(crate) fn is_stub(path: &str) -> bool {
    path.starts_with("stub://")
}
