//! Signature comparison strategies.
//!
//! A [`Matcher`] turns two signatures into a distance; lower means more
//! similar. A pair matches when the distance is strictly below the
//! threshold. The threshold is a distance bound, not a probability.

use crate::types::{EmbeddingVector, LandmarkSet, Signature, SignatureKind};
use thiserror::Error;

/// Default embedding threshold (Euclidean distance over 128 dimensions).
pub const DEFAULT_EMBEDDING_THRESHOLD: f32 = 0.5;
/// Default landmark threshold (mean distance in normalized coordinates).
pub const DEFAULT_LANDMARK_THRESHOLD: f32 = 0.02;
/// Number of leading landmarks compared by [`LandmarkPrefixMatcher`].
pub const DEFAULT_LANDMARK_PREFIX: usize = 10;
/// Distances at or below this are treated as identical signatures.
pub const SELF_MATCH_EPSILON: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("cannot compare {candidate} signature against {reference} signature")]
    IncompatibleSignatureKind {
        candidate: SignatureKind,
        reference: SignatureKind,
    },
    #[error("signature has {actual} points/dimensions, at least {required} required")]
    InsufficientSignatureData { required: usize, actual: usize },
}

/// Outcome of a single comparison, kept for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    pub distance: f32,
    pub threshold: f32,
}

/// Strategy for measuring how far apart two signatures are.
///
/// Implementations must be pure and symmetric.
pub trait Matcher: Send + Sync {
    fn distance(&self, candidate: &Signature, reference: &Signature) -> Result<f32, MatchError>;

    fn compare(
        &self,
        candidate: &Signature,
        reference: &Signature,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let distance = self.distance(candidate, reference)?;
        Ok(MatchResult {
            matched: distance < threshold || distance <= SELF_MATCH_EPSILON,
            distance,
            threshold,
        })
    }

    fn matches(
        &self,
        candidate: &Signature,
        reference: &Signature,
        threshold: f32,
    ) -> Result<bool, MatchError> {
        Ok(self.compare(candidate, reference, threshold)?.matched)
    }
}

fn incompatible(candidate: &Signature, reference: &Signature) -> MatchError {
    MatchError::IncompatibleSignatureKind {
        candidate: candidate.kind(),
        reference: reference.kind(),
    }
}

/// Euclidean distance over every embedding dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl EuclideanMatcher {
    pub fn embedding_distance(
        &self,
        a: &EmbeddingVector,
        b: &EmbeddingVector,
    ) -> Result<f32, MatchError> {
        if a.len() != b.len() {
            return Err(MatchError::InsufficientSignatureData {
                required: a.len().max(b.len()),
                actual: a.len().min(b.len()),
            });
        }
        Ok(a.values()
            .iter()
            .zip(b.values().iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

impl Matcher for EuclideanMatcher {
    fn distance(&self, candidate: &Signature, reference: &Signature) -> Result<f32, MatchError> {
        match (candidate, reference) {
            (Signature::Embedding(a), Signature::Embedding(b)) => self.embedding_distance(a, b),
            _ => Err(incompatible(candidate, reference)),
        }
    }
}

/// Mean planar distance over the first `prefix_len` landmarks only.
///
/// Pairs where either point is zeroed out are skipped, so a prefix with a
/// couple of missing points still self-matches at distance zero.
/// No alignment or pose normalization is applied, so this is only
/// meaningful for frontal faces at a similar distance from the camera.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkPrefixMatcher {
    pub prefix_len: usize,
}

impl Default for LandmarkPrefixMatcher {
    fn default() -> Self {
        Self {
            prefix_len: DEFAULT_LANDMARK_PREFIX,
        }
    }
}

impl LandmarkPrefixMatcher {
    pub fn new(prefix_len: usize) -> Self {
        Self { prefix_len }
    }

    pub fn landmark_distance(&self, a: &LandmarkSet, b: &LandmarkSet) -> Result<f32, MatchError> {
        let required = self.prefix_len.max(1);
        let shortest = a.len().min(b.len());
        if shortest < required {
            return Err(MatchError::InsufficientSignatureData {
                required,
                actual: shortest,
            });
        }

        // Pairs where either side is degenerate carry no information and
        // are left out of the mean.
        let (total, usable) = a.points()[..required]
            .iter()
            .zip(&b.points()[..required])
            .filter(|(p, q)| !p.is_degenerate() && !q.is_degenerate())
            .fold((0.0f32, 0usize), |(total, n), (p, q)| (total + p.distance_2d(q), n + 1));
        if usable == 0 {
            return Err(MatchError::InsufficientSignatureData {
                required: 1,
                actual: 0,
            });
        }
        Ok(total / usable as f32)
    }
}

impl Matcher for LandmarkPrefixMatcher {
    fn distance(&self, candidate: &Signature, reference: &Signature) -> Result<f32, MatchError> {
        match (candidate, reference) {
            (Signature::Landmarks(a), Signature::Landmarks(b)) => self.landmark_distance(a, b),
            _ => Err(incompatible(candidate, reference)),
        }
    }
}

/// Dispatches to the metric for the signatures' kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureMatcher {
    pub embedding: EuclideanMatcher,
    pub landmarks: LandmarkPrefixMatcher,
}

impl SignatureMatcher {
    pub fn with_landmark_prefix(prefix_len: usize) -> Self {
        Self {
            embedding: EuclideanMatcher,
            landmarks: LandmarkPrefixMatcher::new(prefix_len),
        }
    }
}

impl Matcher for SignatureMatcher {
    fn distance(&self, candidate: &Signature, reference: &Signature) -> Result<f32, MatchError> {
        match (candidate, reference) {
            (Signature::Embedding(a), Signature::Embedding(b)) => self.embedding.embedding_distance(a, b),
            (Signature::Landmarks(a), Signature::Landmarks(b)) => self.landmarks.landmark_distance(a, b),
            _ => Err(incompatible(candidate, reference)),
        }
    }
}

/// Decide whether two signatures denote the same person using the default metrics.
pub fn matches(candidate: &Signature, reference: &Signature, threshold: f32) -> Result<bool, MatchError> {
    SignatureMatcher::default().matches(candidate, reference, threshold)
}
