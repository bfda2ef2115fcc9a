//! Camera resource lifecycle.
//!
//! `CameraManager` is the process-wide owner of the capture device. All
//! state transitions go through one mutex, so open/close races and torn
//! reads cannot occur:
//!
//! - `acquire`: lazy-open. The first caller opens the device and starts the
//!   capture thread; racing callers observe the same session or the same
//!   open failure. At most one physical session exists at a time.
//! - `read_frame`: bounded read. Returns `ReadOutcome::NoFrame` on timeout,
//!   when the camera is closed, or when the capture thread has gone away,
//!   never a partially-valid frame.
//! - `release`: idempotent close. A release racing an in-flight read causes
//!   that read to observe `NoFrame` rather than stale data.
//!
//! The capture thread owns the open `FrameSource` and pushes frames into a
//! rendezvous channel with a one-frame buffer, which is the backpressure
//! bound: a slow consumer never causes more than one frame to queue.

pub mod source;

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::Frame;
use source::{FrameSource, SourceConfig};

/// Result of one read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    /// The device reported failure, is unopened, or is mid-teardown.
    NoFrame,
}

impl ReadOutcome {
    pub fn frame(self) -> Option<Frame> {
        match self {
            ReadOutcome::Frame(frame) => Some(frame),
            ReadOutcome::NoFrame => None,
        }
    }
}

/// Result of a release request. Both variants are normal outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Nothing to stop; the camera was not open.
    NotOpen,
}

/// Open/close counters, observable for tests and diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct CameraStats {
    pub opens: u64,
    pub closes: u64,
}

enum CameraState {
    Closed,
    Open(ActiveCamera),
}

/// One live capture session. The capture thread holds the device; this
/// handle holds the consumer side of the frame channel.
struct ActiveCamera {
    session_id: u64,
    frames: Arc<Mutex<Receiver<Frame>>>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

pub struct CameraManager {
    config: SourceConfig,
    read_timeout: Duration,
    state: Mutex<CameraState>,
    opens: AtomicU64,
    closes: AtomicU64,
}

impl CameraManager {
    pub fn new(config: SourceConfig, read_timeout: Duration) -> Self {
        Self {
            config,
            read_timeout,
            state: Mutex::new(CameraState::Closed),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        }
    }

    /// Open the device if it is not already open. Idempotent while open.
    pub fn acquire(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("camera state lock poisoned"))?;
        if let CameraState::Open(_) = *state {
            return Ok(());
        }

        let source = FrameSource::open(&self.config)
            .with_context(|| format!("acquire camera '{}'", self.config.device))?;
        let session_id = self.opens.fetch_add(1, Ordering::SeqCst) + 1;

        let (tx, rx) = mpsc::sync_channel::<Frame>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let join = std::thread::spawn(move || run_capture(source, tx, stop_thread));

        *state = CameraState::Open(ActiveCamera {
            session_id,
            frames: Arc::new(Mutex::new(rx)),
            stop,
            join: Some(join),
        });
        log::info!("camera '{}' acquired (session {})", self.config.device, session_id);
        Ok(())
    }

    /// Attempt one read from the current session.
    ///
    /// The read is bounded by the configured timeout so a hung device
    /// surfaces as `NoFrame` instead of blocking the caller indefinitely.
    pub fn read_frame(&self) -> ReadOutcome {
        // Grab the session under the state lock, then read without it so a
        // concurrent release is never blocked behind an in-progress read.
        let (session_id, frames) = {
            let Ok(state) = self.state.lock() else {
                return ReadOutcome::NoFrame;
            };
            match &*state {
                CameraState::Open(active) => (active.session_id, active.frames.clone()),
                CameraState::Closed => return ReadOutcome::NoFrame,
            }
        };

        let Ok(receiver) = frames.lock() else {
            return ReadOutcome::NoFrame;
        };
        match receiver.recv_timeout(self.read_timeout) {
            Ok(frame) => ReadOutcome::Frame(frame),
            Err(RecvTimeoutError::Timeout) => ReadOutcome::NoFrame,
            Err(RecvTimeoutError::Disconnected) => {
                drop(receiver);
                // The capture thread is gone (device failure or exhaustion).
                // Close this session so the next acquire can reopen.
                if let Err(err) = self.release_session(session_id) {
                    log::warn!("failed to tear down dead camera session: {err:#}");
                }
                ReadOutcome::NoFrame
            }
        }
    }

    /// Acquire if needed, then read exactly one frame.
    ///
    /// The device stays open afterwards; repeated open/close per snapshot
    /// would be slow and racy against a concurrent streaming session.
    pub fn snapshot(&self) -> Result<ReadOutcome> {
        self.acquire()?;
        Ok(self.read_frame())
    }

    /// Close the device. Idempotent: releasing a closed camera reports
    /// `NotOpen` rather than erroring.
    pub fn release(&self) -> Result<ReleaseOutcome> {
        self.release_session(u64::MAX)
    }

    /// Close the current session, but only if it matches `session_id`
    /// (`u64::MAX` matches any). Guards the disconnect-triggered teardown
    /// in `read_frame` against racing with a fresh acquire.
    fn release_session(&self, session_id: u64) -> Result<ReleaseOutcome> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("camera state lock poisoned"))?;
        let mut active = match &*state {
            CameraState::Open(active)
                if session_id == u64::MAX || active.session_id == session_id =>
            {
                let CameraState::Open(active) = std::mem::replace(&mut *state, CameraState::Closed)
                else {
                    unreachable!()
                };
                active
            }
            _ => return Ok(ReleaseOutcome::NotOpen),
        };
        drop(state);

        active.stop.store(true, Ordering::SeqCst);
        let session = active.session_id;
        if let Some(join) = active.join.take() {
            if join.join().is_err() {
                log::warn!("capture thread panicked (session {})", session);
            }
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        log::info!("camera '{}' released (session {})", self.config.device, session);
        Ok(ReleaseOutcome::Released)
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state.lock().as_deref(),
            Ok(CameraState::Open(_))
        )
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            opens: self.opens.load(Ordering::SeqCst),
            closes: self.closes.load(Ordering::SeqCst),
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Capture loop. Owns the device for the lifetime of one session.
///
/// Frames flow into a one-slot channel, so consumers lag the device by at
/// most one frame and a slow consumer paces capture instead of growing a
/// queue. A read error ends the loop, which drops the sender and wakes any
/// blocked readers with a disconnect.
fn run_capture(mut source: FrameSource, tx: SyncSender<Frame>, stop: Arc<AtomicBool>) {
    'capture: loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let mut pending = match source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::info!("capture loop ending: {err:#}");
                break;
            }
        };
        loop {
            // Do not hand out frames once a release was requested.
            if stop.load(Ordering::SeqCst) {
                break 'capture;
            }
            match tx.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(frame)) => {
                    pending = frame;
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(TrySendError::Disconnected(_)) => break 'capture,
            }
        }
    }
}
