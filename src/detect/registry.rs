use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::DetectorSettings;

use super::backend::DetectorBackend;
use super::backends::{CustomVisionBackend, CustomVisionConfig, StubBackend};
use super::watchdog::WatchdogBackend;

/// Detector backends that can be selected by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Tract,
    CustomVision,
    Stub,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Tract => "tract",
            BackendKind::CustomVision => "custom-vision",
            BackendKind::Stub => "stub",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tract" | "onnx" => Ok(BackendKind::Tract),
            "custom-vision" | "custom_vision" | "azure" => Ok(BackendKind::CustomVision),
            "stub" => Ok(BackendKind::Stub),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected tract, custom-vision or stub",
                other
            )),
        }
    }
}

/// Build the configured backend, wrapped in a watchdog when a deadline is set.
///
/// Any failure here (missing model, unreadable labels, bad endpoint) is fatal
/// for the run that asked for the detector.
pub fn load_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend = open_backend(settings)?;
    backend.warm_up()?;
    log::info!("detector backend '{}' ready", backend.name());

    match settings.timeout {
        Some(deadline) => Ok(Box::new(WatchdogBackend::new(backend, deadline)?)),
        None => Ok(backend),
    }
}

fn open_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend {
        BackendKind::Stub => Ok(Box::new(StubBackend::new())),
        BackendKind::CustomVision => {
            let cv = settings
                .custom_vision
                .as_ref()
                .ok_or_else(|| anyhow!("custom-vision backend selected without [detector.custom_vision] settings"))?;
            let backend = CustomVisionBackend::new(CustomVisionConfig {
                endpoint: cv.endpoint.clone(),
                prediction_key: cv.prediction_key.clone(),
                project_id: cv.project_id.clone(),
                iteration: cv.iteration.clone(),
                timeout: settings.timeout.unwrap_or(Duration::from_secs(30)),
            })?;
            Ok(Box::new(backend))
        }
        BackendKind::Tract => open_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend = super::backends::TractBackend::new(
        &settings.model_path,
        &settings.labels_path,
        settings.input_width,
        settings.input_height,
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "the tract detector requires the backend-tract feature"
    ))
}
