pub mod face;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use face::{BoundingBox, Detection, Embedding};
pub use pipeline::Pipeline;
pub use video::Camera;
