use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use pothole_watch::config::PotholeConfig;
use pothole_watch::detect::BackendKind;
use pothole_watch::geo::Coordinate;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "POTHOLE_CONFIG",
        "POTHOLE_DATASET",
        "POTHOLE_DETECTOR_BACKEND",
        "POTHOLE_MODEL_PATH",
        "POTHOLE_LABELS_PATH",
        "POTHOLE_LATITUDE",
        "POTHOLE_LONGITUDE",
        "POTHOLE_CAMERA_DEVICE",
        "POTHOLE_CUSTOM_VISION_KEY",
        "POTHOLE_IP_LOOKUP",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_toml_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        dataset_path = "survey/potholes.csv"

        [detector]
        backend = "stub"
        confidence_threshold = 0.6
        nms_threshold = 0.3
        record_min_confidence = 0.7
        timeout_secs = 10

        [severity]
        low = 0.01
        high = 0.03

        [dedup]
        tolerance_px = 15

        [location]
        ip_lookup = true
        cache_ttl_secs = 60

        [camera]
        device = "/dev/video2"
        width = 1280
        height = 720

        [map]
        output = "survey/map.html"
        zoom = 15
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("POTHOLE_CONFIG", file.path());
    std::env::set_var("POTHOLE_DATASET", "override.csv");
    std::env::set_var("POTHOLE_LATITUDE", "19.0760");
    std::env::set_var("POTHOLE_LONGITUDE", "72.8777");
    std::env::set_var("POTHOLE_IP_LOOKUP", "false");

    let cfg = PotholeConfig::load().expect("load config");

    assert_eq!(cfg.dataset_path, PathBuf::from("override.csv"));
    assert_eq!(cfg.detector.backend, BackendKind::Stub);
    assert_eq!(cfg.detector.confidence_threshold, 0.6);
    assert_eq!(cfg.detector.nms_threshold, 0.3);
    assert_eq!(cfg.detector.record_min_confidence, Some(0.7));
    assert_eq!(cfg.detector.timeout, Some(Duration::from_secs(10)));
    assert_eq!(cfg.severity.low, 0.01);
    assert_eq!(cfg.severity.high, 0.03);
    assert_eq!(cfg.dedup_tolerance_px, 15);
    assert_eq!(
        cfg.location.fix,
        Some(Coordinate {
            latitude: 19.0760,
            longitude: 72.8777
        })
    );
    assert!(!cfg.location.ip_lookup);
    assert_eq!(cfg.location.cache_ttl, Duration::from_secs(60));
    assert_eq!(cfg.camera.device, "/dev/video2");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.map.output, PathBuf::from("survey/map.html"));
    assert_eq!(cfg.map.zoom, 15);

    clear_env();
}

#[test]
fn json_config_is_accepted() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "dataset_path": "roads.csv",
        "detector": { "backend": "stub", "timeout_secs": 0 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("POTHOLE_CONFIG", file.path());

    let cfg = PotholeConfig::load().expect("load config");
    assert_eq!(cfg.dataset_path, PathBuf::from("roads.csv"));
    assert_eq!(cfg.detector.timeout, None);

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PotholeConfig::load().expect("load defaults");
    assert_eq!(cfg.dataset_path, PathBuf::from("pothole_data.csv"));
    assert_eq!(cfg.detector.backend, BackendKind::Tract);
    assert_eq!(cfg.detector.model_path, PathBuf::from("utils/yolov4_tiny.onnx"));
    assert_eq!(cfg.detector.labels_path, PathBuf::from("utils/obj.names"));
    assert_eq!(cfg.severity.low, 0.007);
    assert_eq!(cfg.severity.high, 0.02);
    assert!(cfg.location.ip_lookup);
    assert_eq!(cfg.location.default, Coordinate::default());

    clear_env();
}

#[test]
fn rejects_lone_latitude_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("POTHOLE_LATITUDE", "12.0");
    let err = PotholeConfig::load().expect_err("longitude missing");
    assert!(err.to_string().contains("POTHOLE_LONGITUDE"));

    clear_env();
}

#[test]
fn rejects_unknown_backend() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("POTHOLE_DETECTOR_BACKEND", "opencv-dnn");
    assert!(PotholeConfig::load().is_err());

    clear_env();
}

#[test]
fn custom_vision_key_from_env_completes_section() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [detector]
        backend = "custom-vision"

        [detector.custom_vision]
        endpoint = "https://example.cognitiveservices.azure.com"
        project_id = "a1b2c3"
        iteration = "Iteration2"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("POTHOLE_CONFIG", file.path());

    assert!(PotholeConfig::load().is_err(), "prediction key is required");

    std::env::set_var("POTHOLE_CUSTOM_VISION_KEY", "secret-key");
    let cfg = PotholeConfig::load().expect("load config");
    let cv = cfg.detector.custom_vision.expect("custom vision settings");
    assert_eq!(cv.prediction_key, "secret-key");
    assert_eq!(cv.iteration, "Iteration2");

    clear_env();
}
