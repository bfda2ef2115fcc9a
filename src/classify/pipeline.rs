//! Classification orchestration: snapshot -> preprocess -> inference ->
//! label -> nutrition lookup.

use anyhow::Result;
use serde::Serialize;
use std::fmt;

use crate::camera::CameraManager;
use crate::classify::backend::ClassifierBackend;
use crate::classify::labels::LabelTable;
use crate::frame::Frame;
use crate::store::{NutritionRecord, NutritionStore};

/// Why a classification request failed. Callers can distinguish "no
/// camera" from model trouble; "no matching record" is NOT a failure and
/// surfaces as a null `food_info` instead.
#[derive(Debug)]
pub enum ClassifyError {
    /// The snapshot produced no frame (camera unavailable or read failed).
    CaptureFailed(String),
    /// No usable model was configured or it failed to load at startup.
    ModelUnavailable,
    /// The model rejected the input or inference itself failed.
    Inference(String),
    /// Store or other internal failure.
    Internal(String),
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::CaptureFailed(msg) => write!(f, "failed to capture frame: {}", msg),
            ClassifyError::ModelUnavailable => write!(f, "classification model unavailable"),
            ClassifyError::Inference(msg) => write!(f, "inference failed: {}", msg),
            ClassifyError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ClassifyError {}

/// A label plus the nutrition record matched to it, if any.
#[derive(Clone, Debug, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    pub food_info: Option<NutritionRecord>,
}

pub struct ClassifierPipeline {
    backend: Option<Box<dyn ClassifierBackend>>,
    labels: LabelTable,
    input_size: u32,
}

impl ClassifierPipeline {
    pub fn new(
        backend: Option<Box<dyn ClassifierBackend>>,
        labels: LabelTable,
        input_size: u32,
    ) -> Self {
        Self {
            backend,
            labels,
            input_size,
        }
    }

    /// Give the backend a chance to pre-load weights. Called once at
    /// daemon startup; failures downgrade the pipeline to ModelUnavailable.
    pub fn warm_up(&mut self) -> Result<()> {
        if let Some(backend) = self.backend.as_mut() {
            backend.warm_up()?;
        }
        Ok(())
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_deref().map(|b| b.name())
    }

    /// Capture one frame and classify it, then look its label up in the
    /// nutrition store.
    pub fn classify(
        &mut self,
        camera: &CameraManager,
        store: &mut dyn NutritionStore,
    ) -> Result<ClassificationResult, ClassifyError> {
        let outcome = camera
            .snapshot()
            .map_err(|err| ClassifyError::CaptureFailed(format!("{err:#}")))?;
        let frame = outcome
            .frame()
            .ok_or_else(|| ClassifyError::CaptureFailed("no frame from device".to_string()))?;

        if self.labels.is_empty() {
            return Err(ClassifyError::ModelUnavailable);
        }
        let backend = self
            .backend
            .as_mut()
            .ok_or(ClassifyError::ModelUnavailable)?;

        let input = resize_nearest(&frame, self.input_size);
        let class = backend
            .classify(&input, self.input_size, self.input_size)
            .map_err(|err| ClassifyError::Inference(format!("{err:#}")))?;
        let label = self
            .labels
            .label(class)
            .map_err(|err| ClassifyError::Inference(format!("{err:#}")))?
            .to_string();

        let food_info = store
            .find_by_label(&label)
            .map_err(|err| ClassifyError::Internal(format!("{err:#}")))?;

        log::debug!(
            "classified frame as '{}' (class {}, record: {})",
            label,
            class,
            food_info.is_some()
        );
        Ok(ClassificationResult { label, food_info })
    }
}

/// Nearest-neighbor resize of a packed RGB frame to a square model input.
fn resize_nearest(frame: &Frame, size: u32) -> Vec<u8> {
    let size = size.max(1) as usize;
    let src_w = frame.width.max(1) as usize;
    let src_h = frame.height.max(1) as usize;
    let mut out = vec![0u8; size * size * 3];
    for y in 0..size {
        let src_y = y * src_h / size;
        for x in 0..size {
            let src_x = x * src_w / size;
            let src = (src_y * src_w + src_x) * 3;
            let dst = (y * size + x) * 3;
            if src + 3 <= frame.data.len() {
                out[dst..dst + 3].copy_from_slice(&frame.data[src..src + 3]);
            }
        }
    }
    out
}
