pub mod custom_vision;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use custom_vision::{CustomVisionBackend, CustomVisionConfig};
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
