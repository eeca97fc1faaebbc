//! Still-image input.

use anyhow::{Context, Result};
use std::path::Path;

use crate::frame::Frame;

/// Decode a JPEG or PNG file into a frame captured now.
pub fn load_image(path: &Path) -> Result<Frame> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?;
    let frame = Frame::from_image(decoded.to_rgb8())?;
    log::debug!(
        "loaded image {} ({}x{})",
        path.display(),
        frame.width(),
        frame.height()
    );
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn loads_png_dimensions_and_pixels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("road.png");
        let mut img = RgbImage::new(4, 3);
        img.put_pixel(1, 2, Rgb([10, 20, 30]));
        img.save(&path)?;

        let frame = load_image(&path)?;
        assert_eq!((frame.width(), frame.height()), (4, 3));
        let offset = (2 * 4 + 1) * 3;
        assert_eq!(&frame.pixels()[offset..offset + 3], &[10, 20, 30]);
        Ok(())
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_image(Path::new("/nonexistent/road.jpg")).expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/road.jpg"));
    }
}
