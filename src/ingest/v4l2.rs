//! V4L2 camera capture.
//!
//! The device is asked for RGB3 first. Drivers that refuse it are retried
//! with YUYV and then MJPG; whatever format the driver settles on is
//! converted to RGB24 by `normalize`.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::camera::CameraConfig;
use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::Frame;

const PREFERRED_FOURCCS: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

pub(crate) struct DeviceV4l2Source {
    config: CameraConfig,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceV4l2Source {
    pub(crate) fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            active_format: PixelFormat::Rgb24,
            config,
            state: None,
            frame_count: 0,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("failed to open camera {}", self.config.device))?;

        let (format, pixel_format) = self.negotiate_format(&mut device)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_format = pixel_format;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn negotiate_format(&self, device: &mut v4l::Device) -> Result<(v4l::Format, PixelFormat)> {
        use v4l::video::Capture;

        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = self.config.width;
        requested.height = self.config.height;

        for fourcc in PREFERRED_FOURCCS {
            requested.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&requested) {
                Ok(actual) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(&actual.fourcc.repr) {
                        return Ok((actual, pixel_format));
                    }
                    log::debug!(
                        "CameraSource: {} answered {} for {}",
                        self.config.device,
                        actual.fourcc,
                        v4l::FourCC::new(fourcc)
                    );
                }
                Err(err) => log::warn!(
                    "CameraSource: {} refused {}: {}",
                    self.config.device,
                    v4l::FourCC::new(fourcc),
                    err
                ),
            }
        }
        Err(anyhow!(
            "failed to open camera {}: no supported pixel format (RGB3, YUYV, MJPG)",
            self.config.device
        ))
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("camera is not connected")?;
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            Ok(buf[..used].to_vec())
        })?;
        let rgb = normalize_to_rgb(
            &pixels,
            self.active_width,
            self.active_height,
            self.active_format,
        )?;
        self.frame_count += 1;
        Frame::from_rgb(rgb, self.active_width, self.active_height)
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "{} ({}x{}, {} frames)",
            self.config.device, self.active_width, self.active_height, self.frame_count
        )
    }
}
