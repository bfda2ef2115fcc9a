use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::classify::backend::ClassifierBackend;

/// Stub classifier for tests and model-less deployments. Hashes the pixel
/// content and maps it onto the class range, so identical frames always
/// classify identically.
pub struct StubClassifier {
    classes: usize,
    fixed_class: Option<usize>,
}

impl StubClassifier {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            fixed_class: None,
        }
    }

    /// Always return the given class. Test hook.
    pub fn with_fixed_class(mut self, class: usize) -> Self {
        self.fixed_class = Some(class);
        self
    }
}

impl ClassifierBackend for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<usize> {
        if self.classes == 0 {
            return Err(anyhow!("stub classifier has no classes"));
        }
        if let Some(class) = self.fixed_class {
            return Ok(class);
        }
        let digest: [u8; 32] = Sha256::digest(pixels).into();
        let mut value = [0u8; 8];
        value.copy_from_slice(&digest[..8]);
        Ok((u64::from_be_bytes(value) % self.classes as u64) as usize)
    }
}
