//! Output decoding for YOLOv4 ONNX exports.
//!
//! The exported graph ends in two tensors:
//!
//! - `boxes`: `[1, N, 1, 4]` (or `[1, N, 4]`), normalized `x1, y1, x2, y2`
//! - `confs`: `[1, N, C]`, per-class scores
//!
//! Decoding keeps each candidate's best class when its score reaches the
//! confidence threshold, scales the box to the source frame, and runs NMS.

use anyhow::{anyhow, Result};

use crate::detect::labels::label_for;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection, DetectionParams};

pub fn decode(
    boxes: &[f32],
    confs: &[f32],
    num_classes: usize,
    frame_width: u32,
    frame_height: u32,
    labels: &[String],
    params: &DetectionParams,
) -> Result<Vec<Detection>> {
    if num_classes == 0 {
        return Err(anyhow!("model reports zero classes"));
    }
    if confs.len() % num_classes != 0 {
        return Err(anyhow!(
            "score tensor length {} is not a multiple of {} classes",
            confs.len(),
            num_classes
        ));
    }
    let candidates = confs.len() / num_classes;
    if boxes.len() != candidates * 4 {
        return Err(anyhow!(
            "box tensor holds {} values, expected {} for {} candidates",
            boxes.len(),
            candidates * 4,
            candidates
        ));
    }

    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let mut detections = Vec::new();

    for i in 0..candidates {
        let scores = &confs[i * num_classes..(i + 1) * num_classes];
        let Some((class_id, &score)) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            continue;
        };
        if !score.is_finite() || score < params.confidence_threshold {
            continue;
        }

        let b = &boxes[i * 4..i * 4 + 4];
        let x1 = b[0].clamp(0.0, 1.0) * fw;
        let y1 = b[1].clamp(0.0, 1.0) * fh;
        let x2 = b[2].clamp(0.0, 1.0) * fw;
        let y2 = b[3].clamp(0.0, 1.0) * fh;
        let bbox = BoundingBox::from_corners(x1, y1, x2, y2);
        if bbox.area() == 0 {
            continue;
        }

        detections.push(Detection {
            bbox,
            confidence: score,
            class_id,
            label: label_for(labels, class_id),
            frame_width,
            frame_height,
        });
    }

    Ok(non_max_suppression(detections, params.nms_threshold))
}
