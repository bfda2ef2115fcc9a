//! nutricam
//!
//! A camera-backed food nutrition service. One physical capture device is
//! shared between two access paths:
//!
//! - a live MJPEG stream (`GET /video_feed`) serving any number of viewers,
//! - on-demand snapshot classification (`GET /food_classification`).
//!
//! Both paths go through `CameraManager`, the single exclusion point for
//! the device lifecycle: lazy open on first need, bounded reads, and an
//! idempotent release that in-flight reads observe as "no frame".
//!
//! # Module Structure
//!
//! - `camera`: resource manager and capture backends (stub://, V4L2)
//! - `frame`: raw frame model and JPEG encoding
//! - `classify`: classifier backends, label table, pipeline
//! - `store`: nutrition record repository (sqlite / in-memory)
//! - `api`: HTTP server and the multipart streaming session
//! - `config`: file + env configuration

pub mod api;
pub mod camera;
pub mod classify;
pub mod config;
pub mod frame;
pub mod store;

pub use camera::source::SourceConfig;
pub use camera::{CameraManager, CameraStats, ReadOutcome, ReleaseOutcome};
pub use classify::{
    ClassificationResult, ClassifierBackend, ClassifierPipeline, ClassifyError, LabelTable,
    StubClassifier,
};
#[cfg(feature = "backend-tract")]
pub use classify::TractClassifier;
pub use config::NutricamConfig;
pub use frame::{encode_jpeg, EncodedFrame, Frame};
pub use store::{
    InMemoryNutritionStore, NewNutritionRecord, NutritionRecord, NutritionStore,
    SqliteNutritionStore,
};
