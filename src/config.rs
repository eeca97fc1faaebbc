use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BackendKind, DetectionParams};
use crate::geo::{Coordinate, DEFAULT_LATITUDE, DEFAULT_LONGITUDE};
use crate::ingest::CameraConfig;
use crate::severity::{SeverityThresholds, DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD};

const DEFAULT_DATASET_PATH: &str = "pothole_data.csv";
const DEFAULT_MODEL_PATH: &str = "utils/yolov4_tiny.onnx";
const DEFAULT_LABELS_PATH: &str = "utils/obj.names";
const DEFAULT_INPUT_WIDTH: u32 = 640;
const DEFAULT_INPUT_HEIGHT: u32 = 480;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_DETECTOR_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DEDUP_TOLERANCE_PX: u32 = crate::dedup::DEFAULT_TOLERANCE_PX;
const DEFAULT_LOCATION_TIMEOUT_SECS: u64 = 5;
const DEFAULT_LOCATION_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_MAP_OUTPUT: &str = "pothole_map.html";
const DEFAULT_MAP_ZOOM: u8 = 13;

#[derive(Debug, Deserialize, Default)]
struct PotholeConfigFile {
    dataset_path: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    severity: Option<SeverityConfigFile>,
    dedup: Option<DedupConfigFile>,
    location: Option<LocationConfigFile>,
    camera: Option<CameraConfigFile>,
    map: Option<MapConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    record_min_confidence: Option<f32>,
    timeout_secs: Option<u64>,
    custom_vision: Option<CustomVisionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CustomVisionConfigFile {
    endpoint: Option<String>,
    prediction_key: Option<String>,
    project_id: Option<String>,
    iteration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SeverityConfigFile {
    low: Option<f64>,
    high: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupConfigFile {
    tolerance_px: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationConfigFile {
    latitude: Option<f64>,
    longitude: Option<f64>,
    ip_lookup: Option<bool>,
    timeout_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    default_latitude: Option<f64>,
    default_longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MapConfigFile {
    output: Option<PathBuf>,
    zoom: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct PotholeConfig {
    pub dataset_path: PathBuf,
    pub detector: DetectorSettings,
    pub severity: SeverityThresholds,
    pub dedup_tolerance_px: u32,
    pub location: LocationSettings,
    pub camera: CameraConfig,
    pub map: MapSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Stream runs drop detections below this score before recording them.
    pub record_min_confidence: Option<f32>,
    /// Watchdog deadline per detector call; `None` disables the watchdog.
    pub timeout: Option<Duration>,
    pub custom_vision: Option<CustomVisionSettings>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Tract,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: PathBuf::from(DEFAULT_LABELS_PATH),
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            record_min_confidence: None,
            timeout: Some(Duration::from_secs(DEFAULT_DETECTOR_TIMEOUT_SECS)),
            custom_vision: None,
        }
    }
}

impl DetectorSettings {
    pub fn params(&self) -> DetectionParams {
        DetectionParams {
            confidence_threshold: self.confidence_threshold,
            nms_threshold: self.nms_threshold,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomVisionSettings {
    pub endpoint: String,
    pub prediction_key: String,
    pub project_id: String,
    pub iteration: String,
}

#[derive(Debug, Clone)]
pub struct LocationSettings {
    /// Precise device-reported fix; tried before any IP lookup.
    pub fix: Option<Coordinate>,
    pub ip_lookup: bool,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub default: Coordinate,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            fix: None,
            ip_lookup: true,
            timeout: Duration::from_secs(DEFAULT_LOCATION_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(DEFAULT_LOCATION_CACHE_TTL_SECS),
            default: Coordinate {
                latitude: DEFAULT_LATITUDE,
                longitude: DEFAULT_LONGITUDE,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapSettings {
    pub output: PathBuf,
    pub zoom: u8,
}

impl PotholeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POTHOLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PotholeConfigFile) -> Result<Self> {
        let defaults = DetectorSettings::default();
        let detector_file = file.detector.unwrap_or_default();
        let backend = match detector_file.backend.as_deref() {
            Some(name) => name.parse()?,
            None => defaults.backend,
        };
        let timeout = match detector_file.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.timeout,
        };
        let custom_vision = detector_file.custom_vision.map(|cv| CustomVisionSettings {
            endpoint: cv.endpoint.unwrap_or_default(),
            prediction_key: cv.prediction_key.unwrap_or_default(),
            project_id: cv.project_id.unwrap_or_default(),
            iteration: cv.iteration.unwrap_or_default(),
        });
        let detector = DetectorSettings {
            backend,
            model_path: detector_file.model_path.unwrap_or(defaults.model_path),
            labels_path: detector_file.labels_path.unwrap_or(defaults.labels_path),
            input_width: detector_file.input_width.unwrap_or(defaults.input_width),
            input_height: detector_file.input_height.unwrap_or(defaults.input_height),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            nms_threshold: detector_file.nms_threshold.unwrap_or(defaults.nms_threshold),
            record_min_confidence: detector_file.record_min_confidence,
            timeout,
            custom_vision,
        };

        let severity_file = file.severity.unwrap_or_default();
        let severity = SeverityThresholds {
            low: severity_file.low.unwrap_or(DEFAULT_LOW_THRESHOLD),
            high: severity_file.high.unwrap_or(DEFAULT_HIGH_THRESHOLD),
        };

        let dedup_tolerance_px = file
            .dedup
            .and_then(|dedup| dedup.tolerance_px)
            .unwrap_or(DEFAULT_DEDUP_TOLERANCE_PX);

        let location_file = file.location.unwrap_or_default();
        let fix = match (location_file.latitude, location_file.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinate {
                latitude,
                longitude,
            }),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "location.latitude and location.longitude must be set together"
                ))
            }
        };
        let location = LocationSettings {
            fix,
            ip_lookup: location_file.ip_lookup.unwrap_or(true),
            timeout: Duration::from_secs(
                location_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_LOCATION_TIMEOUT_SECS),
            ),
            cache_ttl: Duration::from_secs(
                location_file
                    .cache_ttl_secs
                    .unwrap_or(DEFAULT_LOCATION_CACHE_TTL_SECS),
            ),
            default: Coordinate {
                latitude: location_file.default_latitude.unwrap_or(DEFAULT_LATITUDE),
                longitude: location_file.default_longitude.unwrap_or(DEFAULT_LONGITUDE),
            },
        };

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };

        let map_file = file.map.unwrap_or_default();
        let map = MapSettings {
            output: map_file
                .output
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MAP_OUTPUT)),
            zoom: map_file.zoom.unwrap_or(DEFAULT_MAP_ZOOM),
        };

        Ok(Self {
            dataset_path: file
                .dataset_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATASET_PATH)),
            detector,
            severity,
            dedup_tolerance_px,
            location,
            camera,
            map,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("POTHOLE_DATASET") {
            self.dataset_path = PathBuf::from(path);
        }
        if let Some(backend) = non_empty_env("POTHOLE_DETECTOR_BACKEND") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(path) = non_empty_env("POTHOLE_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("POTHOLE_LABELS_PATH") {
            self.detector.labels_path = PathBuf::from(path);
        }
        match (
            non_empty_env("POTHOLE_LATITUDE"),
            non_empty_env("POTHOLE_LONGITUDE"),
        ) {
            (Some(lat), Some(lon)) => {
                let latitude: f64 = lat
                    .parse()
                    .map_err(|_| anyhow!("POTHOLE_LATITUDE must be decimal degrees"))?;
                let longitude: f64 = lon
                    .parse()
                    .map_err(|_| anyhow!("POTHOLE_LONGITUDE must be decimal degrees"))?;
                self.location.fix = Some(Coordinate {
                    latitude,
                    longitude,
                });
            }
            (None, None) => {}
            _ => {
                return Err(anyhow!(
                    "POTHOLE_LATITUDE and POTHOLE_LONGITUDE must be set together"
                ))
            }
        }
        if let Some(device) = non_empty_env("POTHOLE_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(key) = non_empty_env("POTHOLE_CUSTOM_VISION_KEY") {
            self.detector
                .custom_vision
                .get_or_insert_with(CustomVisionSettings::default)
                .prediction_key = key;
        }
        if let Some(flag) = non_empty_env("POTHOLE_IP_LOOKUP") {
            self.location.ip_lookup = parse_bool(&flag)
                .ok_or_else(|| anyhow!("POTHOLE_IP_LOOKUP must be true/false or 1/0"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.severity.validate()?;
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("nms_threshold", self.detector.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector.{} must be within [0, 1], got {}", name, value));
            }
        }
        if let Some(min) = self.detector.record_min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(anyhow!(
                    "detector.record_min_confidence must be within [0, 1], got {}",
                    min
                ));
            }
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input dimensions must be non-zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if let Some(fix) = &self.location.fix {
            fix.validate().context("invalid location fix")?;
        }
        self.location
            .default
            .validate()
            .context("invalid default location")?;

        if self.detector.backend == BackendKind::CustomVision {
            let cv = self.detector.custom_vision.as_ref().ok_or_else(|| {
                anyhow!("custom-vision backend requires a [detector.custom_vision] section")
            })?;
            for (name, value) in [
                ("endpoint", &cv.endpoint),
                ("prediction_key", &cv.prediction_key),
                ("project_id", &cv.project_id),
                ("iteration", &cv.iteration),
            ] {
                if value.trim().is_empty() {
                    return Err(anyhow!("detector.custom_vision.{} is required", name));
                }
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PotholeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
