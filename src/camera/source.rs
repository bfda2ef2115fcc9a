//! Device capture backends.
//!
//! `FrameSource` is the device handle: it knows how to open a capture
//! session, read one frame, and close. Two backends:
//!
//! - Synthetic, selected by `stub://` device strings. Generates patterned
//!   RGB frames; `stub://name?frames=N` stops after N frames, which is how
//!   tests script end-of-stream and read failures.
//! - V4L2 (feature: capture-v4l2) for local device nodes like /dev/video0.
//!
//! The source layer never retains frames past handoff and never touches
//! the network or disk.

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

/// Configuration for a frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Device path (e.g., "/dev/video0") or a `stub://` string.
    pub device: String,
    /// Target frame rate. The synthetic backend paces to this rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// An open capture session over one of the backends.
pub struct FrameSource {
    backend: Backend,
}

enum Backend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "capture-v4l2")]
    V4l2(v4l2::DeviceV4l2Source),
}

impl FrameSource {
    /// Open a capture session. Failure means the device is unavailable:
    /// busy, missing node, or permission denied.
    pub fn open(config: &SourceConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            let source = SyntheticSource::open(config)?;
            return Ok(Self {
                backend: Backend::Synthetic(source),
            });
        }

        #[cfg(feature = "capture-v4l2")]
        {
            let source = v4l2::DeviceV4l2Source::open(config)?;
            Ok(Self {
                backend: Backend::V4l2(source),
            })
        }

        #[cfg(not(feature = "capture-v4l2"))]
        {
            Err(anyhow!(
                "device '{}' requires the capture-v4l2 feature; only stub:// sources are built in",
                config.device
            ))
        }
    }

    /// Read the next frame. Blocks until the device produces one.
    ///
    /// An error means the device failed or the source is exhausted; the
    /// capture loop treats it as end-of-stream.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            Backend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            Backend::V4l2(source) => source.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    width: u32,
    height: u32,
    frame_interval: std::time::Duration,
    frame_count: u64,
    /// Stop after this many frames when set (`stub://name?frames=N`).
    frame_limit: Option<u64>,
}

impl SyntheticSource {
    fn open(config: &SourceConfig) -> Result<Self> {
        let frame_limit = parse_frame_limit(&config.device)?;
        let fps = config.target_fps.max(1);
        log::info!("FrameSource: opened {} (synthetic)", config.device);
        Ok(Self {
            width: config.width,
            height: config.height,
            frame_interval: std::time::Duration::from_millis(1000 / fps as u64),
            frame_count: 0,
            frame_limit,
        })
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!("synthetic source exhausted after {} frames", limit));
            }
        }
        std::thread::sleep(self.frame_interval);
        self.frame_count += 1;

        let pixel_count = (self.width * self.height * 3) as usize;
        let mut data = vec![0u8; pixel_count];
        for (i, px) in data.iter_mut().enumerate() {
            *px = ((i as u64 + self.frame_count) % 256) as u8;
        }
        Ok(Frame::new(self.width, self.height, data))
    }
}

/// Parse the optional `?frames=N` suffix of a stub device string.
fn parse_frame_limit(device: &str) -> Result<Option<u64>> {
    let Some(query) = device.split('?').nth(1) else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "frames" {
                let limit: u64 = value
                    .parse()
                    .with_context(|| format!("invalid frames limit '{}' in '{}'", value, device))?;
                return Ok(Some(limit));
            }
        }
    }
    Ok(None)
}

// ----------------------------------------------------------------------------
// V4L2 source
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
mod v4l2 {
    use anyhow::{Context, Result};
    use ouroboros::self_referencing;

    use super::SourceConfig;
    use crate::frame::Frame;

    pub(super) struct DeviceV4l2Source {
        state: DeviceState,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct DeviceState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceV4l2Source {
        pub(super) fn open(config: &SourceConfig) -> Result<Self> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(&config.device)
                .with_context(|| format!("open v4l2 device {}", config.device))?;
            let mut format = device.format().context("read v4l2 format")?;
            format.width = config.width;
            format.height = config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "FrameSource: failed to set format on {}: {}",
                        config.device,
                        err
                    );
                    device
                        .format()
                        .context("read v4l2 format after set failure")?
                }
            };

            if config.target_fps > 0 {
                let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
                if let Err(err) = device.set_params(&params) {
                    log::warn!("FrameSource: failed to set fps on {}: {}", config.device, err);
                }
            }

            let active_width = format.width;
            let active_height = format.height;

            let state = DeviceStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
                },
            }
            .try_build()?;

            log::info!(
                "FrameSource: opened {} ({}x{})",
                config.device,
                active_width,
                active_height
            );
            Ok(Self {
                state,
                active_width,
                active_height,
            })
        }

        pub(super) fn next_frame(&mut self) -> Result<Frame> {
            use v4l::io::traits::CaptureStream;

            let (buf, _meta) = self
                .state
                .with_mut(|fields| fields.stream.next())
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;

            Ok(Frame::new(
                self.active_width,
                self.active_height,
                buf.to_vec(),
            ))
        }
    }
}
