//! Frame model and JPEG encoding.
//!
//! - `Frame`: one raw captured image, packed RGB8. Produced by the capture
//!   layer and owned by whichever caller pulled it; the camera manager never
//!   retains a frame after handoff.
//! - `EncodedFrame`: a frame serialized for wire transmission.
//! - `encode_jpeg`: pure Frame -> EncodedFrame conversion.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// Content type tag carried by every encoded frame.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// One raw captured image in packed RGB8 layout (`height * width * 3` bytes).
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Expected byte length for the declared dimensions.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
    }
}

/// A frame serialized to a wire-transmissible byte format. Immutable;
/// consumed once by being written to a response stream.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Encode a raw RGB frame as JPEG at the given quality (1-100).
///
/// Deterministic for identical input bytes and quality. The only failure
/// path is malformed input: empty frames or a byte length that does not
/// match the declared dimensions.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<EncodedFrame> {
    if frame.data.is_empty() {
        return Err(anyhow!("cannot encode empty frame"));
    }
    let expected = frame
        .expected_len()
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if frame.data.len() != expected {
        return Err(anyhow!(
            "frame byte length {} does not match {}x{} RGB ({} expected)",
            frame.data.len(),
            frame.width,
            frame.height,
            expected
        ));
    }

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(
            &frame.data,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .context("encode jpeg frame")?;

    Ok(EncodedFrame {
        content_type: JPEG_CONTENT_TYPE,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame() -> Frame {
        let mut data = vec![0u8; 16 * 8 * 3];
        for (i, px) in data.iter_mut().enumerate() {
            *px = (i % 256) as u8;
        }
        Frame::new(16, 8, data)
    }

    #[test]
    fn encode_produces_jpeg_magic() -> Result<()> {
        let encoded = encode_jpeg(&test_frame(), 80)?;
        assert_eq!(encoded.content_type, JPEG_CONTENT_TYPE);
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn encode_is_deterministic() -> Result<()> {
        let a = encode_jpeg(&test_frame(), 80)?;
        let b = encode_jpeg(&test_frame(), 80)?;
        assert_eq!(a.bytes, b.bytes);
        Ok(())
    }

    #[test]
    fn encode_rejects_empty_frame() {
        let frame = Frame::new(0, 0, vec![]);
        assert!(encode_jpeg(&frame, 80).is_err());
    }

    #[test]
    fn encode_rejects_inconsistent_length() {
        let frame = Frame::new(16, 8, vec![0u8; 10]);
        assert!(encode_jpeg(&frame, 80).is_err());
    }
}
