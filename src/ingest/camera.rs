//! Live camera source.
//!
//! Real devices go through V4L2 (feature `ingest-v4l2`). `stub://` devices
//! produce an endless synthetic feed; the run ends on the stop signal or the
//! frame limit.

use anyhow::{anyhow, Result};

use super::{is_stub, synthetic_pixels, FrameSource};
use crate::frame::Frame;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::DeviceV4l2Source;

#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0"), or `stub://<name>`.
    pub device: String,
    /// Requested frame rate; the driver may pick another.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(Box<DeviceV4l2Source>),
    #[cfg(not(feature = "ingest-v4l2"))]
    Unavailable(CameraConfig),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "camera dimensions must be non-zero ({}x{})",
                config.width,
                config.height
            ));
        }
        if is_stub(&config.device) {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(Box::new(DeviceV4l2Source::new(config))),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Ok(Self {
                backend: CameraBackend::Unavailable(config),
            })
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
            #[cfg(not(feature = "ingest-v4l2"))]
            CameraBackend::Unavailable(config) => Err(anyhow!(
                "failed to open camera {}: built without the ingest-v4l2 feature",
                config.device
            )),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame().map(Some),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame().map(Some),
            #[cfg(not(feature = "ingest-v4l2"))]
            CameraBackend::Unavailable(_) => Err(anyhow!("camera is not connected")),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(source) => format!("{} (synthetic)", source.config.device),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.describe(),
            #[cfg(not(feature = "ingest-v4l2"))]
            CameraBackend::Unavailable(config) => config.device.clone(),
        }
    }
}

struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "CameraSource: connected to {} (synthetic {}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = synthetic_pixels(self.config.width, self.config.height, self.frame_count);
        Frame::from_rgb(pixels, self.config.width, self.config.height)
    }
}
