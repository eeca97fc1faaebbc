//! Azure Custom Vision object-detection backend.
//!
//! Each frame is JPEG-encoded and posted to the published iteration's
//! prediction endpoint. Predictions come back with normalized
//! `left/top/width/height` boxes, which are mapped to frame pixels here.

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use url::Url;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection, DetectionParams};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct CustomVisionConfig {
    /// Prediction resource endpoint, e.g. `https://<name>.cognitiveservices.azure.com/`.
    pub endpoint: String,
    pub prediction_key: String,
    pub project_id: String,
    /// Published iteration name.
    pub iteration: String,
    pub timeout: Duration,
}

pub struct CustomVisionBackend {
    agent: ureq::Agent,
    url: Url,
    prediction_key: String,
}

impl CustomVisionBackend {
    pub fn new(config: CustomVisionConfig) -> Result<Self> {
        let url = prediction_url(&config.endpoint, &config.project_id, &config.iteration)?;
        if config.prediction_key.trim().is_empty() {
            return Err(anyhow!("custom vision prediction key is empty"));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            url,
            prediction_key: config.prediction_key,
        })
    }
}

impl DetectorBackend for CustomVisionBackend {
    fn name(&self) -> &'static str {
        "custom-vision"
    }

    fn detect(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(frame.to_image()?)
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .context("encode frame as JPEG")?;

        let body = self
            .agent
            .post(self.url.as_str())
            .set("Prediction-Key", &self.prediction_key)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&jpeg)
            .context("custom vision prediction request failed")?
            .into_string()
            .context("read custom vision response")?;

        let detections = parse_predictions(&body, frame.width(), frame.height(), params)?;
        Ok(non_max_suppression(detections, params.nms_threshold))
    }
}

pub fn prediction_url(endpoint: &str, project_id: &str, iteration: &str) -> Result<Url> {
    if project_id.trim().is_empty() || iteration.trim().is_empty() {
        return Err(anyhow!("custom vision project id and iteration must be set"));
    }
    let base = Url::parse(endpoint).context("parse custom vision endpoint")?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(anyhow!(
            "unsupported custom vision endpoint scheme '{}'",
            base.scheme()
        ));
    }
    let path = format!(
        "customvision/v3.0/Prediction/{}/detect/iterations/{}/image",
        project_id.trim(),
        iteration.trim()
    );
    let base = if base.path().ends_with('/') {
        base
    } else {
        Url::parse(&format!("{}/", base)).context("normalize custom vision endpoint")?
    };
    base.join(&path).context("build custom vision prediction url")
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    probability: f32,
    #[serde(default)]
    tag_id: Option<String>,
    tag_name: String,
    bounding_box: NormalizedBox,
}

#[derive(Debug, Deserialize)]
struct NormalizedBox {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

/// Parse a prediction response, keeping predictions strictly above the
/// confidence threshold.
pub fn parse_predictions(
    body: &str,
    frame_width: u32,
    frame_height: u32,
    params: &DetectionParams,
) -> Result<Vec<Detection>> {
    let response: PredictionResponse =
        serde_json::from_str(body).context("invalid custom vision response")?;
    let fw = frame_width as f32;
    let fh = frame_height as f32;

    let mut tags: Vec<String> = Vec::new();
    let mut detections = Vec::new();
    for prediction in response.predictions {
        if prediction.probability <= params.confidence_threshold {
            continue;
        }
        let tag_key = prediction.tag_id.unwrap_or_else(|| prediction.tag_name.clone());
        let class_id = match tags.iter().position(|t| *t == tag_key) {
            Some(idx) => idx,
            None => {
                tags.push(tag_key);
                tags.len() - 1
            }
        };
        let b = prediction.bounding_box;
        let x1 = b.left.clamp(0.0, 1.0) * fw;
        let y1 = b.top.clamp(0.0, 1.0) * fh;
        let x2 = (b.left + b.width).clamp(0.0, 1.0) * fw;
        let y2 = (b.top + b.height).clamp(0.0, 1.0) * fh;
        detections.push(Detection {
            bbox: BoundingBox::from_corners(x1, y1, x2, y2),
            confidence: prediction.probability,
            class_id,
            label: prediction.tag_name,
            frame_width,
            frame_height,
        });
    }
    Ok(detections)
}
