pub mod stub;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;
