use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::profile::{Profile, ValidationError};

/// Dimension of a face descriptor embedding.
pub const EMBEDDING_DIM: usize = 128;

/// Representation kind of a [`Signature`]. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Embedding,
    Landmarks,
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureKind::Embedding => f.write_str("embedding"),
            SignatureKind::Landmarks => f.write_str("landmarks"),
        }
    }
}

impl std::str::FromStr for SignatureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedding" | "embeddings" => Ok(SignatureKind::Embedding),
            "landmarks" | "landmark" => Ok(SignatureKind::Landmarks),
            other => Err(format!("unknown signature kind '{other}' (expected embedding or landmarks)")),
        }
    }
}

/// Fixed-length face descriptor produced by a recognition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEmbedding")]
pub struct EmbeddingVector {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct RawEmbedding {
    values: Vec<f32>,
}

impl TryFrom<RawEmbedding> for EmbeddingVector {
    type Error = SignatureError;

    fn try_from(raw: RawEmbedding) -> Result<Self, Self::Error> {
        Self::new(raw.values)
    }
}

impl EmbeddingVector {
    /// Build an embedding, requiring exactly [`EMBEDDING_DIM`] finite values.
    pub fn new(values: Vec<f32>) -> Result<Self, SignatureError> {
        if values.len() != EMBEDDING_DIM {
            return Err(SignatureError::WrongDimension {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SignatureError::NonFinite);
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One face-mesh keypoint, normalized to [0, 1] relative to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: None }
    }

    /// Planar distance to another point. Depth is ignored.
    pub fn distance_2d(&self, other: &Landmark) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.map_or(true, f32::is_finite)
    }

    /// A point is degenerate when either coordinate is not a number
    /// or it sits exactly at the origin (unpopulated model output).
    pub fn is_degenerate(&self) -> bool {
        !self.x.is_finite() || !self.y.is_finite() || (self.x == 0.0 && self.y == 0.0)
    }
}

/// Ordered face-mesh landmarks (typically 468 or 478 points).
///
/// Every coordinate is finite; zeroed points are allowed and left to the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLandmarkSet")]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

#[derive(Deserialize)]
struct RawLandmarkSet {
    points: Vec<Landmark>,
}

impl TryFrom<RawLandmarkSet> for LandmarkSet {
    type Error = SignatureError;

    fn try_from(raw: RawLandmarkSet) -> Result<Self, Self::Error> {
        Self::new(raw.points)
    }
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Result<Self, SignatureError> {
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(SignatureError::NonFiniteLandmark { index });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl TryFrom<Vec<(f32, f32)>> for LandmarkSet {
    type Error = SignatureError;

    fn try_from(points: Vec<(f32, f32)>) -> Result<Self, Self::Error> {
        Self::new(points.into_iter().map(|(x, y)| Landmark::new(x, y)).collect())
    }
}

/// Facial signature extracted from a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signature {
    Embedding(EmbeddingVector),
    Landmarks(LandmarkSet),
}

impl Signature {
    pub fn kind(&self) -> SignatureKind {
        match self {
            Signature::Embedding(_) => SignatureKind::Embedding,
            Signature::Landmarks(_) => SignatureKind::Landmarks,
        }
    }
}

impl From<EmbeddingVector> for Signature {
    fn from(value: EmbeddingVector) -> Self {
        Signature::Embedding(value)
    }
}

impl From<LandmarkSet> for Signature {
    fn from(value: LandmarkSet) -> Self {
        Signature::Landmarks(value)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignatureError {
    #[error("embedding must have {expected} dimensions, got {actual}")]
    WrongDimension { expected: usize, actual: usize },
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("landmark {index} has a non-finite coordinate")]
    NonFiniteLandmark { index: usize },
}

/// A persisted identity: key, profile and enrolled signature.
///
/// Fields are private so every record in the system went through
/// [`EnrollmentRecord::new`] validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct EnrollmentRecord {
    key: String,
    profile: Profile,
    signature: Signature,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawRecord {
    key: String,
    profile: Profile,
    signature: Signature,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawRecord> for EnrollmentRecord {
    type Error = ValidationError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        Self::new(raw.key, raw.profile, raw.signature, raw.created_at)
    }
}

impl EnrollmentRecord {
    pub fn new(
        key: impl Into<String>,
        profile: Profile,
        signature: Signature,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        Ok(Self {
            key,
            profile,
            signature,
            created_at,
        })
    }

    /// Identity key, case-sensitive as stored.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Most recent signature seen by the capture loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDetection {
    pub signature: Signature,
    /// Capture time in milliseconds on the pipeline clock.
    pub observed_at_ms: u64,
}

/// Proof of a successful verification, handed to the post-login consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionGrant {
    pub key: String,
    pub profile: Profile,
    pub granted_at: DateTime<Utc>,
}

impl SessionGrant {
    pub fn for_record(record: &EnrollmentRecord, granted_at: DateTime<Utc>) -> Self {
        Self {
            key: record.key().to_string(),
            profile: record.profile().clone(),
            granted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_requires_exact_dimension() {
        let err = EmbeddingVector::new(vec![0.1; 64]).unwrap_err();
        assert_eq!(
            err,
            SignatureError::WrongDimension {
                expected: EMBEDDING_DIM,
                actual: 64
            }
        );
        assert!(EmbeddingVector::new(vec![0.1; EMBEDDING_DIM]).is_ok());
    }

    #[test]
    fn test_embedding_rejects_nan() {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[3] = f32::NAN;
        assert_eq!(EmbeddingVector::new(values).unwrap_err(), SignatureError::NonFinite);
    }

    #[test]
    fn test_landmark_degenerate() {
        assert!(Landmark::new(0.0, 0.0).is_degenerate());
        assert!(Landmark::new(f32::NAN, 0.4).is_degenerate());
        assert!(!Landmark::new(0.0, 0.4).is_degenerate());
        assert!(!Landmark::new(0.5, 0.5).is_degenerate());
    }

    #[test]
    fn test_signature_serde_tagging() {
        let sig = Signature::from(LandmarkSet::try_from(vec![(0.25, 0.5)]).unwrap());
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["kind"], "landmarks");
        assert_eq!(json["points"][0]["x"], 0.25);
        assert!(json["points"][0].get("z").is_none());

        let back: Signature = serde_json::from_value(json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_embedding_deserialize_validates() {
        let short = serde_json::json!({ "kind": "embedding", "values": [0.1, 0.2] });
        assert!(serde_json::from_value::<Signature>(short).is_err());

        let full = serde_json::json!({ "kind": "embedding", "values": vec![0.1f32; EMBEDDING_DIM] });
        let sig: Signature = serde_json::from_value(full).unwrap();
        assert_eq!(sig.kind(), SignatureKind::Embedding);
    }

    #[test]
    fn test_signature_kind_parse() {
        assert_eq!("Embedding".parse::<SignatureKind>(), Ok(SignatureKind::Embedding));
        assert_eq!("landmarks".parse::<SignatureKind>(), Ok(SignatureKind::Landmarks));
        assert!("mesh".parse::<SignatureKind>().is_err());
    }

    #[test]
    fn test_landmarks_reject_non_finite() {
        let mut points: Vec<Landmark> = (0..468).map(|i| Landmark::new(0.2 + i as f32 * 0.001, 0.5)).collect();
        points[200].x = f32::NAN;
        assert_eq!(
            LandmarkSet::new(points.clone()).unwrap_err(),
            SignatureError::NonFiniteLandmark { index: 200 }
        );

        points[200] = Landmark { x: 0.4, y: 0.5, z: Some(f32::INFINITY) };
        assert!(LandmarkSet::new(points.clone()).is_err());

        // Zeroed points are finite; the gate decides about them
        points[200] = Landmark::new(0.0, 0.0);
        assert!(LandmarkSet::new(points).is_ok());
    }

    #[test]
    fn test_landmarks_deserialize_validates() {
        let bad = serde_json::json!({ "kind": "landmarks", "points": [{ "x": 0.1, "y": null }] });
        assert!(serde_json::from_value::<Signature>(bad).is_err());
    }

    #[test]
    fn test_record_deserialize_rejects_blank_key() {
        let profile = Profile::new("Ana", "", "600123456", "ana@example.com").unwrap();
        let sig = Signature::from(LandmarkSet::try_from(vec![(0.1, 0.1)]).unwrap());
        let record = EnrollmentRecord::new("ana", profile, sig, Utc::now()).unwrap();

        let mut json = serde_json::to_value(&record).unwrap();
        assert_eq!(serde_json::from_value::<EnrollmentRecord>(json.clone()).unwrap(), record);
        json["key"] = serde_json::json!("  ");
        assert!(serde_json::from_value::<EnrollmentRecord>(json).is_err());
    }

    #[test]
    fn test_record_rejects_blank_key() {
        let profile = Profile::new("Ana", "", "600123456", "ana@example.com").unwrap();
        let sig = Signature::from(LandmarkSet::try_from(vec![(0.1, 0.1)]).unwrap());
        let err = EnrollmentRecord::new("   ", profile, sig, Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyKey);
    }
}
