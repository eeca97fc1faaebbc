//! Detection-to-record pipeline.
//!
//! A frame goes to the detector, every detection is classified by its area
//! ratio, stream runs drop repeats with the deduplicator, and the survivors
//! become records stamped with the run's location and the frame's capture
//! time. Persisting the records is left to the caller, once per run.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::PotholeConfig;
use crate::dedup::Deduplicator;
use crate::detect::{Detection, DetectionParams, DetectorBackend, DetectorLost, DetectorStalled};
use crate::frame::{severity_color, Frame};
use crate::geo::Coordinate;
use crate::ingest::FrameSource;
use crate::record::{assemble, PotholeRecord};
use crate::severity::{Severity, SeverityThresholds};

const ANNOTATION_THICKNESS: u32 = 3;

/// Cooperative stop flag, checked once per stream iteration.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub params: DetectionParams,
    pub thresholds: SeverityThresholds,
    pub dedup_tolerance_px: u32,
    /// Stream runs only: detections scoring below this are not recorded.
    pub record_min_confidence: Option<f32>,
    /// Stream runs only: stop after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            params: DetectionParams::default(),
            thresholds: SeverityThresholds::default(),
            dedup_tolerance_px: crate::dedup::DEFAULT_TOLERANCE_PX,
            record_min_confidence: None,
            max_frames: None,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &PotholeConfig) -> Self {
        Self {
            params: config.detector.params(),
            thresholds: config.severity,
            dedup_tolerance_px: config.dedup_tolerance_px,
            record_min_confidence: config.detector.record_min_confidence,
            max_frames: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedDetection {
    pub detection: Detection,
    pub severity: Severity,
}

#[derive(Clone, Debug)]
pub struct ImageReport {
    pub detections: Vec<ClassifiedDetection>,
    pub records: Vec<PotholeRecord>,
    /// Share of the frame covered by detections, in percent.
    pub area_percent: f64,
}

/// Why a stream run stopped reading frames.
#[derive(Clone, Debug)]
pub enum StreamEnd {
    Exhausted,
    Stopped,
    FrameLimit,
    /// The source failed mid-stream; records gathered so far are kept.
    ReadError(String),
    /// The detector missed its deadline. The run is over and must be
    /// reported as failed once its records are saved.
    Stalled(DetectorStalled),
    /// The detector worker died. Same handling as a stall.
    DetectorLost(DetectorLost),
}

#[derive(Clone, Debug)]
pub struct StreamReport {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub detections_seen: u64,
    pub low_confidence_dropped: u64,
    pub duplicates_suppressed: u64,
    pub records: Vec<PotholeRecord>,
    pub end: StreamEnd,
}

/// Per-frame callback payload for progress display.
pub struct StreamProgress<'a> {
    pub frame: &'a Frame,
    pub frames_processed: u64,
    pub detections: &'a [ClassifiedDetection],
    pub new_records: usize,
    pub total_records: usize,
}

pub struct Pipeline<D: DetectorBackend = Box<dyn DetectorBackend>> {
    detector: D,
    settings: PipelineSettings,
}

impl<D: DetectorBackend> Pipeline<D> {
    pub fn new(detector: D, settings: PipelineSettings) -> Self {
        Self { detector, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn set_max_frames(&mut self, max_frames: Option<u64>) {
        self.settings.max_frames = max_frames;
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Single image: every detection becomes a record, no dedup.
    pub fn process_image(&mut self, frame: &Frame, location: Coordinate) -> Result<ImageReport> {
        let detections = self
            .detector
            .detect(frame, &self.settings.params)
            .with_context(|| format!("detector '{}' failed on image", self.detector.name()))?;
        let classified = self.classify(frame, detections)?;

        let covered: u64 = classified.iter().map(|c| c.detection.bbox.area()).sum();
        let area_percent = 100.0 * covered as f64 / frame.area() as f64;

        let records = classified
            .iter()
            .map(|c| assemble(&c.detection, c.severity, location, frame.captured_at()))
            .collect();
        log::info!(
            "image: {} detection(s), {:.2}% of frame",
            classified.len(),
            area_percent
        );
        Ok(ImageReport {
            detections: classified,
            records,
            area_percent,
        })
    }

    /// Video or camera run until the source ends, the stop signal is
    /// raised, or `max_frames` is reached.
    pub fn process_stream(
        &mut self,
        source: &mut dyn FrameSource,
        location: Coordinate,
        stop: &StopSignal,
        observer: &mut dyn FnMut(&StreamProgress<'_>),
    ) -> Result<StreamReport> {
        source.connect()?;
        log::info!("stream: reading from {}", source.describe());

        let mut dedup = Deduplicator::new(self.settings.dedup_tolerance_px);
        let mut report = StreamReport {
            frames_processed: 0,
            frames_skipped: 0,
            detections_seen: 0,
            low_confidence_dropped: 0,
            duplicates_suppressed: 0,
            records: Vec::new(),
            end: StreamEnd::Exhausted,
        };

        loop {
            if stop.is_stopped() {
                log::info!("stream: stop requested");
                report.end = StreamEnd::Stopped;
                break;
            }
            if let Some(limit) = self.settings.max_frames {
                if report.frames_processed >= limit {
                    report.end = StreamEnd::FrameLimit;
                    break;
                }
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("stream: frame read failed, ending run: {:#}", e);
                    report.end = StreamEnd::ReadError(format!("{:#}", e));
                    break;
                }
            };
            report.frames_processed += 1;

            let detections = match self.detector.detect(&frame, &self.settings.params) {
                Ok(detections) => detections,
                Err(e) => {
                    if let Some(stalled) = e.downcast_ref::<DetectorStalled>() {
                        log::error!("stream: {}", stalled);
                        report.end = StreamEnd::Stalled(stalled.clone());
                        break;
                    }
                    if let Some(lost) = e.downcast_ref::<DetectorLost>() {
                        log::error!("stream: {}", lost);
                        report.end = StreamEnd::DetectorLost(lost.clone());
                        break;
                    }
                    log::warn!(
                        "stream: skipping frame {}: {:#}",
                        report.frames_processed,
                        e
                    );
                    report.frames_skipped += 1;
                    continue;
                }
            };
            report.detections_seen += detections.len() as u64;

            let classified = self.classify(&frame, detections)?;
            let before = report.records.len();
            for c in &classified {
                if let Some(min) = self.settings.record_min_confidence {
                    if c.detection.confidence < min {
                        report.low_confidence_dropped += 1;
                        continue;
                    }
                }
                if !dedup.offer(&c.detection.bbox) {
                    continue;
                }
                report.records.push(assemble(
                    &c.detection,
                    c.severity,
                    location,
                    frame.captured_at(),
                ));
            }

            observer(&StreamProgress {
                frame: &frame,
                frames_processed: report.frames_processed,
                detections: &classified,
                new_records: report.records.len() - before,
                total_records: report.records.len(),
            });
        }

        report.duplicates_suppressed = dedup.rejected();
        log::info!(
            "stream: {} frame(s), {} skipped, {} detection(s), {} duplicate(s), {} record(s)",
            report.frames_processed,
            report.frames_skipped,
            report.detections_seen,
            report.duplicates_suppressed,
            report.records.len()
        );
        Ok(report)
    }

    fn classify(
        &self,
        frame: &Frame,
        detections: Vec<Detection>,
    ) -> Result<Vec<ClassifiedDetection>> {
        detections
            .into_iter()
            .map(|detection| {
                let severity = self
                    .settings
                    .thresholds
                    .classify(detection.bbox.area(), frame.area())?;
                Ok(ClassifiedDetection {
                    detection,
                    severity,
                })
            })
            .collect()
    }
}

/// Outline every detection in its severity color.
pub fn annotate(frame: &mut Frame, detections: &[ClassifiedDetection]) {
    for c in detections {
        frame.draw_box(
            &c.detection.bbox,
            severity_color(c.severity),
            ANNOTATION_THICKNESS,
        );
    }
}

/// Writes annotated copies of stream frames that carry detections.
///
/// Files are named `frame_NNNNNN.jpg` after the frame's position in the run.
pub struct FrameDump {
    dir: PathBuf,
    written: u64,
}

impl FrameDump {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Save the frame if it has detections. Returns the written path.
    pub fn write(&mut self, progress: &StreamProgress<'_>) -> Result<Option<PathBuf>> {
        if progress.detections.is_empty() {
            return Ok(None);
        }
        let mut frame = progress.frame.clone();
        annotate(&mut frame, progress.detections);
        let path = self
            .dir
            .join(format!("frame_{:06}.jpg", progress.frames_processed));
        frame.save(&path)?;
        self.written += 1;
        log::debug!("annotated frame saved to {}", path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubBackend};
    use crate::ingest::{FileConfig, FileSource};

    fn location() -> Coordinate {
        Coordinate::default()
    }

    fn clip(frames: u64) -> FileSource {
        FileSource::new(FileConfig {
            path: "stub://clip".to_string(),
            synthetic_frames: frames,
        })
        .expect("stub clip")
    }

    struct CrashingBackend;

    impl DetectorBackend for CrashingBackend {
        fn name(&self) -> &'static str {
            "crashing"
        }

        fn detect(&mut self, _frame: &Frame, _params: &DetectionParams) -> Result<Vec<Detection>> {
            panic!("inference crashed");
        }
    }

    #[test]
    fn lost_detector_ends_stream_on_first_frame() -> Result<()> {
        let watchdog = crate::detect::WatchdogBackend::new(
            CrashingBackend,
            std::time::Duration::from_secs(5),
        )?;
        let mut pipeline = Pipeline::new(watchdog, PipelineSettings::default());
        let mut source = clip(50);

        let report = pipeline.process_stream(&mut source, location(), &StopSignal::new(), &mut |_| {})?;
        assert_eq!(report.frames_processed, 1);
        assert_eq!(report.frames_skipped, 0);
        match &report.end {
            StreamEnd::DetectorLost(lost) => assert_eq!(lost.backend, "crashing"),
            other => panic!("expected a lost detector, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn frame_dump_saves_only_frames_with_detections() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = StubBackend::scripted(vec![
            vec![(BoundingBox::new(4, 4, 20, 20), 0.9)],
            vec![],
            vec![(BoundingBox::new(40, 30, 10, 10), 0.9)],
        ]);
        let mut pipeline = Pipeline::new(backend, PipelineSettings::default());
        let mut dump = FrameDump::create(dir.path().join("annotated"))?;
        let mut saved = Vec::new();
        let mut source = clip(3);

        pipeline.process_stream(&mut source, location(), &StopSignal::new(), &mut |p| {
            if let Some(path) = dump.write(p).expect("frame written") {
                saved.push(path);
            }
        })?;

        assert_eq!(dump.written(), 2);
        let names: Vec<String> = saved
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_000001.jpg", "frame_000003.jpg"]);
        assert!(saved.iter().all(|p| p.exists()));
        assert!(!dump.dir().join("frame_000002.jpg").exists());
        Ok(())
    }

    #[test]
    fn image_records_every_detection() -> Result<()> {
        let backend = StubBackend::scripted(vec![vec![
            (BoundingBox::new(10, 10, 100, 100), 0.9),
            (BoundingBox::new(400, 300, 20, 20), 0.8),
        ]]);
        let mut pipeline = Pipeline::new(backend, PipelineSettings::default());
        let frame = Frame::filled(640, 480, 90)?;

        let report = pipeline.process_image(&frame, location())?;
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.detections[0].severity, Severity::High);
        assert_eq!(report.detections[1].severity, Severity::Low);
        let expected = 100.0 * 10_400.0 / 307_200.0;
        assert!((report.area_percent - expected).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn image_detection_error_is_fatal() -> Result<()> {
        let backend = StubBackend::new().fail_on_call(0);
        let mut pipeline = Pipeline::new(backend, PipelineSettings::default());
        let frame = Frame::filled(64, 48, 0)?;
        assert!(pipeline.process_image(&frame, location()).is_err());
        Ok(())
    }

    #[test]
    fn stream_suppresses_repeats_across_frames() -> Result<()> {
        let backend = StubBackend::scripted(vec![
            vec![(BoundingBox::new(100, 100, 50, 50), 0.9)],
            vec![(BoundingBox::new(105, 108, 52, 49), 0.9)],
            vec![(BoundingBox::new(100, 111, 50, 50), 0.9)],
        ]);
        let mut pipeline = Pipeline::new(backend, PipelineSettings::default());
        let mut source = clip(3);

        let report = pipeline.process_stream(&mut source, location(), &StopSignal::new(), &mut |_| {})?;
        assert_eq!(report.frames_processed, 3);
        assert_eq!(report.detections_seen, 3);
        assert_eq!(report.duplicates_suppressed, 1);
        assert_eq!(report.records.len(), 2);
        assert!(matches!(report.end, StreamEnd::Exhausted));
        Ok(())
    }

    #[test]
    fn stream_skips_failed_frames() -> Result<()> {
        let backend = StubBackend::scripted(vec![
            vec![(BoundingBox::new(10, 10, 40, 40), 0.9)],
            vec![(BoundingBox::new(300, 300, 40, 40), 0.9)],
            vec![(BoundingBox::new(500, 50, 40, 40), 0.9)],
        ])
        .fail_on_call(1);
        let mut pipeline = Pipeline::new(backend, PipelineSettings::default());
        let mut source = clip(3);

        let report = pipeline.process_stream(&mut source, location(), &StopSignal::new(), &mut |_| {})?;
        assert_eq!(report.frames_processed, 3);
        assert_eq!(report.frames_skipped, 1);
        assert_eq!(report.records.len(), 2);
        Ok(())
    }

    #[test]
    fn stream_honours_min_confidence_and_frame_limit() -> Result<()> {
        let backend = StubBackend::scripted(vec![
            vec![(BoundingBox::new(10, 10, 40, 40), 0.6)],
            vec![(BoundingBox::new(300, 300, 40, 40), 0.95)],
            vec![(BoundingBox::new(500, 50, 40, 40), 0.95)],
        ]);
        let settings = PipelineSettings {
            record_min_confidence: Some(0.7),
            max_frames: Some(2),
            ..PipelineSettings::default()
        };
        let mut pipeline = Pipeline::new(backend, settings);
        let mut source = clip(10);

        let report = pipeline.process_stream(&mut source, location(), &StopSignal::new(), &mut |_| {})?;
        assert_eq!(report.frames_processed, 2);
        assert_eq!(report.low_confidence_dropped, 1);
        assert_eq!(report.records.len(), 1);
        assert!(matches!(report.end, StreamEnd::FrameLimit));
        Ok(())
    }

    #[test]
    fn stop_signal_ends_run_after_current_frame() -> Result<()> {
        let backend = StubBackend::new();
        let mut pipeline = Pipeline::new(backend, PipelineSettings::default());
        let mut source = clip(100);
        let stop = StopSignal::new();
        let stopper = stop.clone();

        let report = pipeline.process_stream(&mut source, location(), &stop, &mut |progress| {
            if progress.frames_processed == 4 {
                stopper.stop();
            }
        })?;
        assert_eq!(report.frames_processed, 4);
        assert!(matches!(report.end, StreamEnd::Stopped));
        Ok(())
    }

    #[test]
    fn annotate_colors_by_severity() -> Result<()> {
        let mut frame = Frame::filled(64, 64, 0)?;
        let detection = Detection {
            bbox: BoundingBox::new(8, 8, 16, 16),
            confidence: 0.9,
            class_id: 0,
            label: "pothole".to_string(),
            frame_width: 64,
            frame_height: 64,
        };
        annotate(
            &mut frame,
            &[ClassifiedDetection {
                detection,
                severity: Severity::High,
            }],
        );
        let offset = (8 * 64 + 8) * 3;
        assert_eq!(&frame.pixels()[offset..offset + 3], &crate::frame::COLOR_HIGH);
        Ok(())
    }
}
