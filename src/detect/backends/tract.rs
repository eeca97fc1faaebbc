#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::load_labels;
use crate::detect::result::{Detection, DetectionParams};
use crate::detect::yolo;
use crate::frame::Frame;

/// Tract-based backend for YOLOv4-tiny ONNX exports.
///
/// Frames are resized to the model input, scaled to `[0, 1]`, and fed as
/// `[1, 3, H, W]`. Boxes come back normalized and are mapped onto the
/// source frame, so callers never see model-space coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    /// Load the label list and ONNX model from disk and prepare for inference.
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        model_path: P,
        labels_path: L,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self> {
        let labels = load_labels(labels_path.as_ref())?;
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} ({} classes, input {}x{})",
            model_path.display(),
            labels.len(),
            input_width,
            input_height
        );

        Ok(Self {
            model,
            labels,
            input_width,
            input_height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = frame.to_image()?;
        let resized = if image.dimensions() == (self.input_width, self.input_height) {
            image
        } else {
            image::imageops::resize(
                &image,
                self.input_width,
                self.input_height,
                FilterType::Triangle,
            )
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if outputs.len() < 2 {
            return Err(anyhow!(
                "model produced {} outputs, expected boxes and scores",
                outputs.len()
            ));
        }

        let boxes = outputs[0]
            .as_slice::<f32>()
            .context("box tensor was not f32")?;
        let confs_tensor = &outputs[1];
        let num_classes = confs_tensor.shape().last().copied().unwrap_or(0);
        let confs = confs_tensor
            .as_slice::<f32>()
            .context("score tensor was not f32")?;

        yolo::decode(
            boxes,
            confs,
            num_classes,
            frame.width(),
            frame.height(),
            &self.labels,
            params,
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.input_width, self.input_height, 0)?;
        self.detect(&blank, &DetectionParams::default()).map(|_| ())
    }
}
