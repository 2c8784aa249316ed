//! Camera capture contract and the capture loop.
//!
//! The loop is the only writer of the shared [`LiveDetection`]: it owns the
//! `watch::Sender`, everything else reads through receivers.

use async_trait::async_trait;
use facegate_core::{LiveDetection, Signature};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::PipelineError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl CameraError {
    pub fn remedy(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied(_) => {
                "Camera access was denied. Allow camera access and try again."
            }
            CameraError::DeviceUnavailable(_) => {
                "No camera found. Connect a camera or close other apps using it."
            }
            CameraError::CaptureFailed(_) => "The camera stopped responding. Reconnect it and try again.",
        }
    }
}

/// A captured frame. The pixel payload is opaque to the pipeline and only
/// interpreted by the [`SignatureExtractor`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time in milliseconds on the pipeline clock.
    pub timestamp_ms: u64,
    pub sequence: u32,
}

/// An opened camera stream.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Next frame, or `None` once the stream has ended.
    async fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Give the device back. Called exactly once, by [`CameraSession`].
    fn release(&mut self);
}

/// Source of camera devices.
pub trait CaptureAdapter: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

/// Face model: zero or one signature per frame.
pub trait SignatureExtractor: Send {
    fn extract(&mut self, frame: &Frame) -> Option<Signature>;
}

/// Scoped ownership of an open device; releases it on drop.
pub struct CameraSession {
    device: Option<Box<dyn CaptureDevice>>,
}

impl CameraSession {
    pub fn open(adapter: &dyn CaptureAdapter) -> Result<Self, CameraError> {
        let device = adapter.open()?;
        tracing::debug!("camera acquired");
        Ok(Self {
            device: Some(device),
        })
    }

    pub async fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.device.as_mut() {
            Some(device) => device.next_frame().await,
            None => Ok(None),
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            tracing::debug!("camera released");
        }
    }
}

/// Fresh `LiveDetection` channel with no detection yet.
pub fn live_channel() -> (
    watch::Sender<Option<LiveDetection>>,
    watch::Receiver<Option<LiveDetection>>,
) {
    watch::channel(None)
}

/// Handle to a running capture loop.
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct CaptureHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<u64, CameraError>>,
}

impl CaptureHandle {
    /// Stop capturing and wait until the camera has been released.
    /// Returns the number of frames processed.
    pub async fn stop(mut self) -> Result<u64, PipelineError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.wait().await
    }

    /// Wait for the stream to end on its own.
    pub async fn join(mut self) -> Result<u64, PipelineError> {
        self.wait().await
    }

    async fn wait(&mut self) -> Result<u64, PipelineError> {
        match (&mut self.task).await {
            Ok(result) => result.map_err(PipelineError::from),
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(join) => Err(CameraError::CaptureFailed(join.to_string()).into()),
        }
    }
}

/// Open the camera and start publishing detections.
///
/// Opening failures (permission, missing device) are returned immediately.
/// Frames without a face leave the previous detection in place; it goes
/// stale on its own.
pub fn spawn_capture(
    adapter: &dyn CaptureAdapter,
    mut extractor: Box<dyn SignatureExtractor>,
    live: watch::Sender<Option<LiveDetection>>,
) -> Result<CaptureHandle, PipelineError> {
    let mut session = CameraSession::open(adapter)?;
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut processed = 0u64;
        let result = loop {
            let next = tokio::select! {
                biased;
                _ = &mut stop_rx => break Ok(processed),
                next = session.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    processed += 1;
                    if let Some(signature) = extractor.extract(&frame) {
                        tracing::trace!(seq = frame.sequence, kind = %signature.kind(), "face detected");
                        live.send_replace(Some(LiveDetection {
                            signature,
                            observed_at_ms: frame.timestamp_ms,
                        }));
                    }
                }
                Ok(None) => break Ok(processed),
                Err(e) => {
                    tracing::warn!(error = %e, "capture loop aborted");
                    break Err(e);
                }
            }
        };
        drop(session);
        tracing::debug!(frames = processed, "capture loop finished");
        result
    });

    Ok(CaptureHandle {
        stop: Some(stop_tx),
        task,
    })
}
