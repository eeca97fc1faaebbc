//! Pothole Watch
//!
//! Detects potholes in still images, video files and live camera feeds,
//! grades each detection by how much of the frame it covers, tags it with a
//! best-effort location and capture time, and appends the results to a CSV
//! dataset that can be rendered on a map.
//!
//! # Flow
//!
//! frame → detector backend → severity per detection → (video/camera only)
//! intra-run dedup → record assembly → one `persist` per run.
//!
//! # Module Structure
//!
//! - `frame`, `ingest`: frames and where they come from
//! - `detect`: detector backends, NMS, deadline watchdog
//! - `severity`, `dedup`, `record`: the per-detection core
//! - `pipeline`: image and stream runs
//! - `store`: the append-merge CSV dataset
//! - `geo`: location fallback chain
//! - `map`: HTML / GeoJSON rendering of the dataset
//! - `config`: file + environment configuration

pub mod config;
pub mod dedup;
pub mod detect;
pub mod frame;
pub mod geo;
pub mod ingest;
pub mod map;
pub mod pipeline;
pub mod record;
pub mod severity;
pub mod store;

pub use config::PotholeConfig;
pub use dedup::Deduplicator;
pub use detect::{
    load_backend, BoundingBox, Detection, DetectionParams, DetectorBackend, DetectorLost,
    DetectorStalled, StubBackend,
};
pub use frame::Frame;
pub use geo::{Coordinate, GeoLocator, Located, LocationProvider};
pub use ingest::{load_image, CameraConfig, CameraSource, FileConfig, FileSource, FrameSource};
pub use pipeline::{
    FrameDump, ImageReport, Pipeline, PipelineSettings, StopSignal, StreamEnd, StreamReport,
};
pub use record::{assemble, PotholeRecord};
pub use severity::{Severity, SeverityThresholds};
pub use store::{DatasetError, DatasetStore, PersistOutcome};
