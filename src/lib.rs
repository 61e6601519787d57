pub mod annotate;
pub mod config;
pub mod display;
pub mod engine;
pub mod gallery;
pub mod live;
pub mod matcher;
pub mod overlay;
pub mod palette;
pub mod worker;

// Re-export vision types for convenience
pub use facecam_vision::{
    face, pipeline, video, BoundingBox, Camera, Detection, Embedding, Pipeline,
};
