use anyhow::Result;

/// Classifier backend trait.
///
/// Implementations receive an RGB frame already resized to the model's
/// input shape and return a class index into the configured label table.
/// The pixel slice is read-only and must not be retained past the call.
pub trait ClassifierBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on a preprocessed RGB frame.
    fn classify(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<usize>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
