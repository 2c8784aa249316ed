//! Freshness gate in front of the matcher.
//!
//! Matching is only allowed against a detection that is recent and looks like
//! a real face. The gate is a function of the latest [`LiveDetection`] and the
//! current time, so its state machine is:
//!
//! ```text
//! NoFace ──valid detection──▶ FaceLive ──window elapsed──▶ FaceStale
//!   ▲                            ▲                            │
//!   └── invalid detection        └──────valid detection───────┘
//! ```

use crate::types::{LiveDetection, Signature};
use thiserror::Error;

pub const DEFAULT_FRESHNESS_WINDOW_MS: u64 = 1000;
pub const DEFAULT_MIN_LANDMARK_POINTS: usize = 50;
pub const DEFAULT_VALIDITY_PREFIX: usize = 10;
pub const DEFAULT_MIN_VALID_PREFIX_POINTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NoFace,
    FaceStale,
    FaceLive,
}

/// Why the gate refused to let a match through.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("no face detected")]
    NoFace,
    #[error("last face detection is {age_ms} ms old")]
    Stale { age_ms: u64 },
    #[error("detected face is incomplete ({valid} usable points)")]
    Degenerate { valid: usize },
}

impl GateError {
    /// Instruction for the person in front of the camera.
    pub fn remedy(&self) -> &'static str {
        match self {
            GateError::NoFace => {
                "No face in view. Uncover the camera and look straight at it."
            }
            GateError::Stale { .. } => "Face lost. Stay in front of the camera and hold still.",
            GateError::Degenerate { .. } => {
                "Face not clearly visible. Improve the lighting and face the camera."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessGate {
    pub freshness_window_ms: u64,
    pub min_landmark_points: usize,
    pub validity_prefix: usize,
    pub min_valid_prefix_points: usize,
}

impl Default for LivenessGate {
    fn default() -> Self {
        Self {
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            min_landmark_points: DEFAULT_MIN_LANDMARK_POINTS,
            validity_prefix: DEFAULT_VALIDITY_PREFIX,
            min_valid_prefix_points: DEFAULT_MIN_VALID_PREFIX_POINTS,
        }
    }
}

impl LivenessGate {
    /// Check a signature's shape, independent of its age.
    pub fn validate(&self, signature: &Signature) -> Result<(), GateError> {
        match signature {
            // Embedding construction already guarantees dimension and finiteness.
            Signature::Embedding(_) => Ok(()),
            Signature::Landmarks(set) => {
                let valid = set
                    .points()
                    .iter()
                    .take(self.validity_prefix)
                    .filter(|p| !p.is_degenerate())
                    .count();
                let finite = set.points().iter().all(|p| p.is_finite());
                if !finite
                    || set.len() < self.min_landmark_points
                    || valid < self.min_valid_prefix_points
                {
                    return Err(GateError::Degenerate { valid });
                }
                Ok(())
            }
        }
    }

    /// Let a detection through, or say why not.
    ///
    /// A detection stamped ahead of `now_ms` counts as zero age.
    pub fn admit<'a>(
        &self,
        detection: Option<&'a LiveDetection>,
        now_ms: u64,
    ) -> Result<&'a Signature, GateError> {
        let detection = detection.ok_or(GateError::NoFace)?;
        self.validate(&detection.signature)?;

        let age_ms = now_ms.saturating_sub(detection.observed_at_ms);
        if age_ms > self.freshness_window_ms {
            return Err(GateError::Stale { age_ms });
        }
        Ok(&detection.signature)
    }

    pub fn state(&self, detection: Option<&LiveDetection>, now_ms: u64) -> GateState {
        match self.admit(detection, now_ms) {
            Ok(_) => GateState::FaceLive,
            Err(GateError::Stale { .. }) => GateState::FaceStale,
            Err(GateError::NoFace | GateError::Degenerate { .. }) => GateState::NoFace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmbeddingVector, Landmark, LandmarkSet, EMBEDDING_DIM};

    fn face(points: usize) -> Signature {
        Signature::from(LandmarkSet::new(
            (0..points).map(|i| Landmark::new(0.2 + i as f32 * 0.001, 0.5)).collect(),
        )
        .unwrap())
    }

    fn detection(signature: Signature, at: u64) -> LiveDetection {
        LiveDetection {
            signature,
            observed_at_ms: at,
        }
    }

    #[test]
    fn test_no_detection_blocks() {
        let gate = LivenessGate::default();
        assert_eq!(gate.admit(None, 5_000), Err(GateError::NoFace));
        assert_eq!(gate.state(None, 5_000), GateState::NoFace);
    }

    #[test]
    fn test_freshness_window_boundary() {
        let gate = LivenessGate::default();
        let d = detection(face(468), 10_000);

        assert_eq!(gate.state(Some(&d), 10_999), GateState::FaceLive);
        assert_eq!(gate.state(Some(&d), 11_000), GateState::FaceLive);
        assert_eq!(gate.state(Some(&d), 11_001), GateState::FaceStale);
        assert_eq!(
            gate.admit(Some(&d), 11_001),
            Err(GateError::Stale { age_ms: 1001 })
        );
    }

    #[test]
    fn test_stale_recovers_on_new_detection() {
        let gate = LivenessGate::default();
        let old = detection(face(468), 0);
        assert_eq!(gate.state(Some(&old), 5_000), GateState::FaceStale);
        let new = detection(face(468), 4_900);
        assert_eq!(gate.state(Some(&new), 5_000), GateState::FaceLive);
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let gate = LivenessGate::default();
        let d = detection(face(468), 2_000);
        assert!(gate.admit(Some(&d), 1_000).is_ok());
    }

    #[test]
    fn test_too_few_points_is_degenerate() {
        let gate = LivenessGate::default();
        let d = detection(face(49), 0);
        assert_eq!(gate.admit(Some(&d), 0), Err(GateError::Degenerate { valid: 10 }));
        assert_eq!(gate.state(Some(&d), 0), GateState::NoFace);
        assert!(gate.admit(Some(&detection(face(50), 0)), 0).is_ok());
    }

    #[test]
    fn test_zeroed_prefix_points() {
        let gate = LivenessGate::default();
        let mut points: Vec<Landmark> = (0..468).map(|i| Landmark::new(0.2 + i as f32 * 0.001, 0.5)).collect();

        // Two bad points out of ten is still acceptable
        points[0] = Landmark::new(0.0, 0.0);
        points[4] = Landmark::new(0.0, 0.0);
        let d = detection(Signature::from(LandmarkSet::new(points.clone()).unwrap()), 0);
        assert!(gate.admit(Some(&d), 0).is_ok());

        // A third one is not
        points[9] = Landmark::new(0.0, 0.0);
        let d = detection(Signature::from(LandmarkSet::new(points).unwrap()), 0);
        assert_eq!(gate.admit(Some(&d), 0), Err(GateError::Degenerate { valid: 7 }));
    }

    #[test]
    fn test_embedding_detection_admitted() {
        let gate = LivenessGate::default();
        let sig = Signature::from(EmbeddingVector::new(vec![0.05; EMBEDDING_DIM]).unwrap());
        let d = detection(sig, 100);
        assert!(gate.admit(Some(&d), 900).is_ok());
        assert_eq!(gate.state(Some(&d), 1_200), GateState::FaceStale);
    }

    #[test]
    fn test_remedies_are_actionable() {
        assert!(GateError::NoFace.remedy().contains("camera"));
        assert!(GateError::Degenerate { valid: 0 }.remedy().contains("lighting"));
    }
}
