use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::time::Duration;

use pothole_watch::detect::{
    BoundingBox, Detection, DetectionParams, DetectorBackend, DetectorStalled, StubBackend,
    WatchdogBackend,
};
use pothole_watch::ingest::{FileConfig, FileSource};
use pothole_watch::{
    Coordinate, DatasetStore, Frame, PersistOutcome, Pipeline, PipelineSettings, Severity,
    StopSignal, StreamEnd,
};

fn captured() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 11, 2)
        .and_then(|d| d.and_hms_milli_opt(17, 45, 12, 480))
        .expect("valid timestamp")
}

fn pune() -> Coordinate {
    Coordinate {
        latitude: 18.5204,
        longitude: 73.8567,
    }
}

#[test]
fn image_run_writes_exact_dataset() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pothole_data.csv");

    let frame = Frame::from_rgb_at(vec![70; 640 * 480 * 3], 640, 480, captured())?;
    let backend = StubBackend::scripted(vec![vec![(BoundingBox::new(200, 150, 100, 100), 0.88)]]);
    let mut pipeline = Pipeline::new(backend, PipelineSettings::default());

    let report = pipeline.process_image(&frame, pune())?;
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.detections[0].severity, Severity::High);

    let store = DatasetStore::new(&path);
    assert_eq!(store.persist(&report.records)?, PersistOutcome::Created { rows: 1 });
    assert_eq!(
        fs::read_to_string(&path)?,
        "Latitude,Longitude,Pothole Area (pixels),Severity,Timestamp\n\
         18.5204,73.8567,10000,High,2024-11-02 17:45:12\n"
    );
    Ok(())
}

#[test]
fn image_without_potholes_leaves_no_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pothole_data.csv");

    let frame = Frame::from_rgb_at(vec![0; 64 * 48 * 3], 64, 48, captured())?;
    let mut pipeline = Pipeline::new(StubBackend::new(), PipelineSettings::default());
    let report = pipeline.process_image(&frame, pune())?;
    assert!(report.records.is_empty());
    assert_eq!(report.area_percent, 0.0);

    assert_eq!(DatasetStore::new(&path).persist(&report.records)?, PersistOutcome::NoChange);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn two_video_runs_accumulate_in_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DatasetStore::new(dir.path().join("pothole_data.csv"));

    for run in 0..2 {
        let backend = StubBackend::scripted(vec![
            vec![(BoundingBox::new(40, 40, 30, 30), 0.9)],
            vec![(BoundingBox::new(45, 44, 30, 30), 0.9)],
            vec![(BoundingBox::new(400, 300, 90, 60), 0.9)],
        ]);
        let mut pipeline = Pipeline::new(backend, PipelineSettings::default());
        let mut source = FileSource::new(FileConfig {
            path: format!("stub://run-{}", run),
            synthetic_frames: 5,
        })?;
        let report =
            pipeline.process_stream(&mut source, pune(), &StopSignal::new(), &mut |_| {})?;
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.duplicates_suppressed, 1);
        store.persist(&report.records)?;
    }

    let all = store.load()?;
    assert_eq!(all.len(), 4);
    let severities: Vec<Severity> = all.iter().map(|r| r.severity()).collect();
    assert_eq!(
        severities,
        vec![Severity::Low, Severity::Medium, Severity::Low, Severity::Medium]
    );
    Ok(())
}

/// Answers the first frame at once, then hangs.
struct HangsAfterFirst {
    calls: u32,
}

impl DetectorBackend for HangsAfterFirst {
    fn name(&self) -> &'static str {
        "hangs-after-first"
    }

    fn detect(&mut self, frame: &Frame, _params: &DetectionParams) -> Result<Vec<Detection>> {
        self.calls += 1;
        if self.calls > 1 {
            std::thread::sleep(Duration::from_millis(800));
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            bbox: BoundingBox::new(10, 10, 60, 60),
            confidence: 0.9,
            class_id: 0,
            label: "pothole".to_string(),
            frame_width: frame.width(),
            frame_height: frame.height(),
        }])
    }
}

#[test]
fn detector_stall_ends_stream_but_keeps_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DatasetStore::new(dir.path().join("pothole_data.csv"));

    let watchdog = WatchdogBackend::new(HangsAfterFirst { calls: 0 }, Duration::from_millis(100))?;
    let mut pipeline = Pipeline::new(watchdog, PipelineSettings::default());
    let mut source = FileSource::new(FileConfig {
        path: "stub://stall".to_string(),
        synthetic_frames: 10,
    })?;

    let report = pipeline.process_stream(&mut source, pune(), &StopSignal::new(), &mut |_| {})?;
    assert_eq!(report.frames_processed, 2);
    assert_eq!(report.records.len(), 1);
    match &report.end {
        StreamEnd::Stalled(DetectorStalled { backend, deadline }) => {
            assert_eq!(*backend, "hangs-after-first");
            assert_eq!(*deadline, Duration::from_millis(100));
        }
        other => panic!("expected a stall, got {:?}", other),
    }

    assert_eq!(store.persist(&report.records)?, PersistOutcome::Created { rows: 1 });
    assert_eq!(store.load()?[0].area_px(), Some(3600));
    Ok(())
}
