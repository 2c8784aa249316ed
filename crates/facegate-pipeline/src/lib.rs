//! facegate-pipeline: Capture loop, enrollment and verification.
//!
//! The capture loop publishes the latest [`LiveDetection`](facegate_core::LiveDetection)
//! through a `watch` channel. [`FacePipeline`] reads it, gates it for
//! freshness and runs registration, keyed verification and scan passes
//! against an [`EnrollmentStore`](facegate_store::EnrollmentStore).
//! [`ScanScheduler`] turns scan passes into a cancellable, time-bounded task.

pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod replay;
pub mod scan;
pub mod session;

pub use capture::{
    live_channel, spawn_capture, CameraError, CameraSession, CaptureAdapter, CaptureDevice,
    CaptureHandle, Frame, SignatureExtractor,
};
pub use config::{Config, ConfigError};
pub use error::PipelineError;
pub use pipeline::{FacePipeline, ScanTick, VerifyOutcome};
pub use replay::{ReplayCapture, ReplayExtractor};
pub use scan::{ScanHandle, ScanOutcome, ScanScheduler};
pub use session::SessionSlot;
