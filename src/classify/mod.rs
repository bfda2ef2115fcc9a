//! Food classification: backend trait, backends, label table, pipeline.

pub mod backend;
pub mod backends;
pub mod labels;
pub mod pipeline;

pub use backend::ClassifierBackend;
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use labels::LabelTable;
pub use pipeline::{ClassificationResult, ClassifierPipeline, ClassifyError};
