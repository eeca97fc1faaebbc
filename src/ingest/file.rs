//! Local video file source.
//!
//! Real files are decoded with FFmpeg (feature `ingest-file-ffmpeg`).
//! `stub://` paths produce a short synthetic clip for tests.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{is_stub, synthetic_pixels, FrameSource};
use crate::frame::Frame;

pub const SYNTHETIC_WIDTH: u32 = 640;
pub const SYNTHETIC_HEIGHT: u32 = 480;

#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path, or `stub://<name>`.
    pub path: String,
    /// Length of a synthetic clip.
    pub synthetic_frames: u64,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            synthetic_frames: 30,
        }
    }
}

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(Box<FfmpegFileSource>),
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    Unavailable(FileConfig),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "video input must be a local file path, got '{}'",
                config.path
            ));
        }
        if is_stub(&config.path) {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)),
            });
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(Box::new(FfmpegFileSource::new(config))),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Ok(Self {
                backend: FileBackend::Unavailable(config),
            })
        }
    }

    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_captured(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(_) => 0,
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(config) => Err(anyhow!(
                "failed to open video {}: built without the ingest-file-ffmpeg feature",
                config.path
            )),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(_) => Err(anyhow!("video source is not connected")),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(source) => format!("{} (synthetic)", source.config.path),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.describe(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(config) => config.path.clone(),
        }
    }
}

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "FileSource: opened {} (synthetic, {} frames)",
            self.config.path,
            self.config.synthetic_frames
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.config.synthetic_frames {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = synthetic_pixels(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, self.frame_count);
        Frame::from_rgb(pixels, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT).map(Some)
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if is_stub(path) {
        return true;
    }
    !path.contains("://")
}
