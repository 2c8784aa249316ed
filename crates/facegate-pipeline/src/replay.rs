//! Replay of pre-extracted signatures as a capture source.
//!
//! A recording is a JSON file holding either one signature or an array in
//! which `null` stands for a frame where no face was found. Each entry is
//! delivered as a frame stamped with the pipeline clock; the paired
//! [`ReplayExtractor`] decodes it back into a signature.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use facegate_core::{Clock, Signature};
use serde::Deserialize;

use crate::capture::{CameraError, CaptureAdapter, CaptureDevice, Frame, SignatureExtractor};

#[derive(Deserialize)]
#[serde(untagged)]
enum Recording {
    Many(Vec<Option<Signature>>),
    One(Signature),
}

pub struct ReplayCapture {
    frames: Vec<Option<Signature>>,
    interval: Duration,
    looped: bool,
    clock: Arc<dyn Clock>,
}

impl ReplayCapture {
    pub fn new(frames: Vec<Option<Signature>>, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            frames,
            interval,
            looped: false,
            clock,
        }
    }

    /// Read a recording. A missing or unreadable file behaves like an absent camera.
    pub fn from_file(path: &Path, interval: Duration, clock: Arc<dyn Clock>) -> Result<Self, CameraError> {
        let raw = std::fs::read(path)
            .map_err(|e| CameraError::DeviceUnavailable(format!("{}: {e}", path.display())))?;
        let recording: Recording = serde_json::from_slice(&raw).map_err(|e| {
            CameraError::DeviceUnavailable(format!("{}: not a signature recording: {e}", path.display()))
        })?;
        let frames = match recording {
            Recording::Many(frames) => frames,
            Recording::One(signature) => vec![Some(signature)],
        };
        Ok(Self::new(frames, interval, clock))
    }

    /// Start over from the first frame instead of ending the stream.
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl CaptureAdapter for ReplayCapture {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if self.frames.is_empty() {
            return Err(CameraError::DeviceUnavailable("recording has no frames".into()));
        }
        let payloads = self
            .frames
            .iter()
            .map(|frame| match frame {
                Some(sig) => serde_json::to_vec(sig)
                    .map_err(|e| CameraError::CaptureFailed(format!("encoding frame: {e}"))),
                None => Ok(Vec::new()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(ReplayDevice {
            payloads,
            next: 0,
            sequence: 0,
            interval: self.interval,
            looped: self.looped,
            clock: self.clock.clone(),
        }))
    }
}

struct ReplayDevice {
    payloads: Vec<Vec<u8>>,
    next: usize,
    sequence: u32,
    interval: Duration,
    looped: bool,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl CaptureDevice for ReplayDevice {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.next >= self.payloads.len() {
            if !self.looped {
                return Ok(None);
            }
            self.next = 0;
        }
        if self.sequence > 0 {
            if self.interval.is_zero() {
                // Back-to-back frames would otherwise starve the stop signal.
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.interval).await;
            }
        }

        let data = self.payloads[self.next].clone();
        self.next += 1;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(Frame {
            data,
            width: 0,
            height: 0,
            timestamp_ms: self.clock.now_ms(),
            sequence: self.sequence,
        }))
    }

    fn release(&mut self) {
        self.payloads.clear();
    }
}

/// Decodes frames produced by [`ReplayCapture`].
#[derive(Debug, Default)]
pub struct ReplayExtractor;

impl SignatureExtractor for ReplayExtractor {
    fn extract(&mut self, frame: &Frame) -> Option<Signature> {
        if frame.data.is_empty() {
            return None;
        }
        match serde_json::from_slice(&frame.data) {
            Ok(signature) => Some(signature),
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "undecodable replay frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{live_channel, spawn_capture};
    use facegate_core::{LandmarkSet, ManualClock};
    use std::io::Write;

    fn sig(x: f32) -> Signature {
        Signature::from(LandmarkSet::try_from(vec![(x, 0.5); 60]).unwrap())
    }

    #[test]
    fn test_recording_single_or_many() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        let mut one = tempfile::NamedTempFile::new().unwrap();
        write!(one, "{}", serde_json::to_string(&sig(0.1)).unwrap()).unwrap();
        let replay = ReplayCapture::from_file(one.path(), Duration::ZERO, clock.clone()).unwrap();
        assert_eq!(replay.frame_count(), 1);

        let mut many = tempfile::NamedTempFile::new().unwrap();
        let frames = serde_json::to_string(&vec![Some(sig(0.1)), None, Some(sig(0.2))]).unwrap();
        write!(many, "{frames}").unwrap();
        let replay = ReplayCapture::from_file(many.path(), Duration::ZERO, clock).unwrap();
        assert_eq!(replay.frame_count(), 3);
    }

    #[test]
    fn test_missing_recording_is_device_unavailable() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let err = ReplayCapture::from_file(Path::new("/nonexistent/face.json"), Duration::ZERO, clock)
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_replay_through_capture_loop() {
        let clock = Arc::new(ManualClock::new(5_000));
        let replay = ReplayCapture::new(vec![Some(sig(0.1)), None, Some(sig(0.2)), None], Duration::ZERO, clock);
        let (tx, rx) = live_channel();

        let handle = spawn_capture(&replay, Box::new(ReplayExtractor), tx).unwrap();
        assert_eq!(handle.join().await.unwrap(), 4);

        let live = rx.borrow().clone().unwrap();
        assert_eq!(live.signature, sig(0.2));
        assert_eq!(live.observed_at_ms, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_looped_replay_runs_until_stopped() {
        let clock = Arc::new(ManualClock::new(0));
        let replay = ReplayCapture::new(vec![Some(sig(0.1))], Duration::from_millis(100), clock).looped(true);
        let (tx, _rx) = live_channel();

        let handle = spawn_capture(&replay, Box::new(ReplayExtractor), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let frames = handle.stop().await.unwrap();
        assert!(frames >= 10, "only {frames} frames replayed");
    }

    #[tokio::test]
    async fn test_unpaced_loop_still_stoppable() {
        let clock = Arc::new(ManualClock::new(0));
        let replay = ReplayCapture::new(vec![Some(sig(0.1)), None], Duration::ZERO, clock).looped(true);
        let (tx, rx) = live_channel();

        let handle = spawn_capture(&replay, Box::new(ReplayExtractor), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let frames = handle.stop().await.unwrap();
        assert!(frames > 0);
        assert_eq!(rx.borrow().as_ref().unwrap().signature, sig(0.1));
    }

    #[test]
    fn test_empty_recording_cannot_open() {
        let replay = ReplayCapture::new(vec![], Duration::ZERO, Arc::new(ManualClock::new(0)));
        assert!(matches!(replay.open().err(), Some(CameraError::DeviceUnavailable(_))));
    }
}
