//! facegate-core: Signature types, matching and liveness gating.
//!
//! Pure logic only: no camera, storage or model inference lives here.

pub mod clock;
pub mod liveness;
pub mod matcher;
pub mod profile;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use liveness::{GateError, GateState, LivenessGate};
pub use matcher::{
    matches, EuclideanMatcher, LandmarkPrefixMatcher, MatchError, MatchResult, Matcher,
    SignatureMatcher,
};
pub use profile::{Profile, ValidationError};
pub use types::{
    EmbeddingVector, EnrollmentRecord, Landmark, LandmarkSet, LiveDetection, SessionGrant,
    Signature, SignatureError, SignatureKind, EMBEDDING_DIM,
};
