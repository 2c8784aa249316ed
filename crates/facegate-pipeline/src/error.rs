use facegate_core::{GateError, MatchError, SignatureKind, ValidationError};
use facegate_store::StoreError;
use thiserror::Error;

use crate::capture::CameraError;
use crate::config::ConfigError;

/// Everything a registration or verification can fail with.
///
/// Each variant maps to a [`remedy`](PipelineError::remedy) suitable for
/// showing to the person at the camera.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),
    #[error("no live face: {0}")]
    NoLiveFace(#[from] GateError),
    #[error("cannot compare {candidate} signature against {reference} signature")]
    IncompatibleSignatureKind {
        candidate: SignatureKind,
        reference: SignatureKind,
    },
    #[error("signature has {actual} points/dimensions, at least {required} required")]
    InsufficientSignatureData { required: usize, actual: usize },
    #[error("identity '{0}' is already enrolled")]
    DuplicateIdentity(String),
    #[error("no enrollment found for '{0}'")]
    RecordNotFound(String),
    #[error("enrollment store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("enrollment store I/O failed: {0}")]
    StoreIo(String),
    #[error("invalid registration data: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<MatchError> for PipelineError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::IncompatibleSignatureKind {
                candidate,
                reference,
            } => PipelineError::IncompatibleSignatureKind {
                candidate,
                reference,
            },
            MatchError::InsufficientSignatureData { required, actual } => {
                PipelineError::InsufficientSignatureData { required, actual }
            }
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(key) => PipelineError::DuplicateIdentity(key),
            StoreError::Unavailable(msg) => PipelineError::StoreUnavailable(msg),
            other @ (StoreError::Io(_) | StoreError::Corrupt { .. }) => {
                PipelineError::StoreIo(other.to_string())
            }
        }
    }
}

impl PipelineError {
    /// What the user can do about it.
    pub fn remedy(&self) -> &'static str {
        match self {
            PipelineError::CameraUnavailable(e) => e.remedy(),
            PipelineError::NoLiveFace(e) => e.remedy(),
            PipelineError::IncompatibleSignatureKind { .. } => {
                "This enrollment was made with a different face model. Enroll again."
            }
            PipelineError::InsufficientSignatureData { .. } => {
                "The face could not be measured completely. Face the camera and try again."
            }
            PipelineError::DuplicateIdentity(_) => {
                "That username or email is already registered. Log in or use another one."
            }
            PipelineError::RecordNotFound(_) => {
                "No face is registered for that username or email. Register first."
            }
            PipelineError::StoreUnavailable(_) | PipelineError::StoreIo(_) => {
                "Enrollment data could not be accessed. Try again later."
            }
            PipelineError::Validation(_) => "Check the registration form and correct the marked field.",
            PipelineError::Config(_) => "Fix the facegate configuration and restart.",
        }
    }

    /// Whether the operation may succeed if simply retried with a new frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::NoLiveFace(_))
    }
}
