//! In-memory video frames.
//!
//! `Frame` owns an RGB24 pixel buffer together with its dimensions and the
//! local wall-clock instant it was captured. Every ingestion path (still
//! image, video file, camera) produces `Frame`s, and detectors consume them.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use std::path::Path;

use crate::detect::BoundingBox;
use crate::severity::Severity;

pub type Rgb = [u8; 3];

pub const COLOR_LOW: Rgb = [0, 200, 0];
pub const COLOR_MEDIUM: Rgb = [255, 165, 0];
pub const COLOR_HIGH: Rgb = [230, 0, 0];

/// Outline color used when annotating a detection of the given severity.
pub fn severity_color(severity: Severity) -> Rgb {
    match severity {
        Severity::Low => COLOR_LOW,
        Severity::Medium => COLOR_MEDIUM,
        Severity::High => COLOR_HIGH,
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: NaiveDateTime,
}

impl Frame {
    /// Wrap an RGB24 buffer captured now.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::from_rgb_at(pixels, width, height, Local::now().naive_local())
    }

    pub fn from_rgb_at(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: NaiveDateTime,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero ({}x{})", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
        })
    }

    /// Uniform gray frame, used by synthetic sources.
    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        Self::from_rgb(vec![value; len], width, height)
    }

    pub fn from_image(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgb(image.into_raw(), width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frame area in px².
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> NaiveDateTime {
        self.captured_at
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
    }

    /// Draw a rectangle outline, clipped to the frame.
    pub fn draw_box(&mut self, bbox: &BoundingBox, color: Rgb, thickness: u32) {
        if bbox.width == 0 || bbox.height == 0 || thickness == 0 {
            return;
        }
        let left = bbox.x as i64;
        let top = bbox.y as i64;
        let right = bbox.right() - 1;
        let bottom = bbox.bottom() - 1;
        let t = thickness as i64;

        for y in top..=bottom {
            for x in left..=right {
                let on_edge = x - left < t || right - x < t || y - top < t || bottom - y < t;
                if on_edge {
                    self.put_pixel(x, y, color);
                }
            }
        }
    }

    fn put_pixel(&mut self, x: i64, y: i64, color: Rgb) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[offset..offset + 3].copy_from_slice(&color);
    }

    /// Write the frame as an image file; the format follows the extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_image()?
            .save(path)
            .with_context(|| format!("failed to write image {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(frame: &Frame, x: usize, y: usize) -> Rgb {
        let offset = (y * frame.width() as usize + x) * 3;
        let p = &frame.pixels()[offset..offset + 3];
        [p[0], p[1], p[2]]
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::from_rgb(vec![], 0, 4).is_err());
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn area_is_width_times_height() -> Result<()> {
        let frame = Frame::filled(640, 480, 0)?;
        assert_eq!(frame.area(), 307_200);
        Ok(())
    }

    #[test]
    fn draw_box_outlines_without_filling() -> Result<()> {
        let mut frame = Frame::filled(10, 10, 0)?;
        frame.draw_box(&BoundingBox::new(2, 2, 5, 5), COLOR_HIGH, 1);
        assert_eq!(pixel(&frame, 2, 2), COLOR_HIGH);
        assert_eq!(pixel(&frame, 6, 6), COLOR_HIGH);
        assert_eq!(pixel(&frame, 4, 4), [0, 0, 0]);
        assert_eq!(pixel(&frame, 7, 7), [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn draw_box_clips_to_frame() -> Result<()> {
        let mut frame = Frame::filled(4, 4, 0)?;
        frame.draw_box(&BoundingBox::new(-2, -2, 10, 10), COLOR_LOW, 1);
        assert_eq!(pixel(&frame, 0, 0), [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn image_round_trip_keeps_pixels() -> Result<()> {
        let frame = Frame::filled(3, 2, 77)?;
        let back = Frame::from_image(frame.to_image()?)?;
        assert_eq!(back.pixels(), frame.pixels());
        Ok(())
    }
}
