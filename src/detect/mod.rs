mod backend;
pub mod backends;
pub mod labels;
mod registry;
mod result;
pub mod watchdog;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
pub use registry::{load_backend, BackendKind};
pub use result::{non_max_suppression, BoundingBox, Detection, DetectionParams};
pub use watchdog::{DetectorLost, DetectorStalled, WatchdogBackend};
