use anyhow::{anyhow, Result};
use std::collections::{HashSet, VecDeque};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection, DetectionParams};
use crate::frame::Frame;

/// Stub backend for testing and dry runs.
///
/// Replays a script of per-frame boxes. Once the script runs out, every
/// further frame yields no detections. Individual calls can be scripted to
/// fail so that per-frame error handling can be exercised.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<(BoundingBox, f32)>>,
    failing_calls: HashSet<u64>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per frame, each a list of `(box, confidence)`.
    pub fn scripted(frames: Vec<Vec<(BoundingBox, f32)>>) -> Self {
        Self {
            script: frames.into(),
            ..Self::default()
        }
    }

    /// Make the `call`-th detect call (0-based) return an error.
    pub fn fail_on_call(mut self, call: u64) -> Self {
        self.failing_calls.insert(call);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        let call = self.calls;
        self.calls += 1;
        let scripted = self.script.pop_front().unwrap_or_default();

        if self.failing_calls.contains(&call) {
            return Err(anyhow!("stub detector scripted failure on call {}", call));
        }

        let detections = scripted
            .into_iter()
            .filter(|(_, confidence)| *confidence >= params.confidence_threshold)
            .map(|(bbox, confidence)| Detection {
                bbox,
                confidence,
                class_id: 0,
                label: "pothole".to_string(),
                frame_width: frame.width(),
                frame_height: frame.height(),
            })
            .collect();
        Ok(non_max_suppression(detections, params.nms_threshold))
    }
}
