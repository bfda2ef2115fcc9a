//! Streaming session: the per-viewer control loop.
//!
//! Produces a `multipart/x-mixed-replace` body: one JPEG part per frame,
//! delimited by the `frame` boundary, until the camera stops producing
//! frames or the consumer goes away.

use std::io::Write;

use crate::camera::{CameraManager, ReadOutcome};
use crate::frame::encode_jpeg;

/// Boundary token; must match the Content-Type header sent by the API.
pub const BOUNDARY: &str = "frame";

/// Run one streaming session, writing multipart parts into `out`.
///
/// Terminates when:
/// - a read returns no frame (camera released, device failure, timeout) —
///   the normal end of stream, with no error surfaced mid-body;
/// - the consumer disconnects (a part write fails).
///
/// Either way the loop exits within one read interval of the event.
/// Returns the number of parts written.
pub fn stream_video<W: Write>(camera: &CameraManager, quality: u8, out: &mut W) -> u64 {
    let mut parts = 0u64;
    loop {
        let frame = match camera.read_frame() {
            ReadOutcome::Frame(frame) => frame,
            ReadOutcome::NoFrame => {
                log::debug!("stream ending after {} parts: no frame", parts);
                break;
            }
        };
        let encoded = match encode_jpeg(&frame, quality) {
            Ok(encoded) => encoded,
            Err(err) => {
                log::warn!("stream ending after {} parts: {err:#}", parts);
                break;
            }
        };
        if write_part(out, &encoded.bytes).is_err() {
            log::debug!("stream consumer disconnected after {} parts", parts);
            break;
        }
        parts += 1;
    }
    parts
}

fn write_part<W: Write>(out: &mut W, jpeg: &[u8]) -> std::io::Result<()> {
    out.write_all(format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY).as_bytes())?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::source::SourceConfig;
    use std::time::{Duration, Instant};

    fn manager(device: &str) -> CameraManager {
        let config = SourceConfig {
            device: device.to_string(),
            target_fps: 100,
            width: 32,
            height: 24,
        };
        CameraManager::new(config, Duration::from_millis(300))
    }

    #[test]
    fn emits_one_part_per_frame_then_ends() -> anyhow::Result<()> {
        let camera = manager("stub://stream?frames=3");
        camera.acquire()?;

        let mut body = Vec::new();
        let parts = stream_video(&camera, 80, &mut body);
        assert_eq!(parts, 3);

        let boundary_count = body
            .windows(b"--frame\r\n".len())
            .filter(|w| w == b"--frame\r\n")
            .count();
        assert_eq!(boundary_count, 3);
        assert!(body
            .windows(b"Content-Type: image/jpeg".len())
            .any(|w| w == b"Content-Type: image/jpeg".as_slice()));
        Ok(())
    }

    #[test]
    fn closed_camera_streams_nothing() {
        let camera = manager("stub://stream");
        let mut body = Vec::new();
        assert_eq!(stream_video(&camera, 80, &mut body), 0);
        assert!(body.is_empty());
    }

    /// A sink that fails after accepting a fixed number of parts.
    struct FailingSink {
        accepted_parts: usize,
        writes_per_part: usize,
        writes: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.writes >= self.accepted_parts * self.writes_per_part {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "consumer gone",
                ));
            }
            self.writes += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn consumer_disconnect_stops_session_promptly() -> anyhow::Result<()> {
        let camera = manager("stub://stream");
        camera.acquire()?;

        // write_part issues 3 writes per part; fail from part 3 onwards.
        let mut sink = FailingSink {
            accepted_parts: 2,
            writes_per_part: 3,
            writes: 0,
        };
        let start = Instant::now();
        let parts = stream_video(&camera, 80, &mut sink);
        assert_eq!(parts, 2);
        // Bounded by one read interval plus slack, not by the stream length.
        assert!(start.elapsed() < Duration::from_secs(2));

        camera.release()?;
        Ok(())
    }
}
