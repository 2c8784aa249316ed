//! The face pipeline: one object owning everything a login page needs.
//!
//! Registration and both verification modes read the latest detection from
//! the capture loop's `watch` channel, pass it through the [`LivenessGate`],
//! and only then touch the store or the matcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use facegate_core::{
    Clock, EnrollmentRecord, GateState, LiveDetection, LivenessGate, Matcher, Profile,
    SessionGrant, Signature, SignatureKind,
};
use facegate_store::EnrollmentStore;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::PipelineError;
use crate::session::SessionSlot;

/// Result of a keyed verification that got as far as matching.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Granted(SessionGrant),
    NotRecognized { distance: f32 },
}

/// Result of one scan pass over all enrollments.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanTick {
    /// Another scan was still running.
    Skipped,
    NoMatch,
    Granted(SessionGrant),
}

pub struct FacePipeline {
    store: Arc<dyn EnrollmentStore>,
    live: watch::Receiver<Option<LiveDetection>>,
    gate: LivenessGate,
    matcher: Arc<dyn Matcher>,
    kind: SignatureKind,
    threshold: f32,
    clock: Arc<dyn Clock>,
    sessions: SessionSlot,
    scanning: AtomicBool,
}

/// Clears the scan flag however the scan ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FacePipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn EnrollmentStore>,
        live: watch::Receiver<Option<LiveDetection>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            live,
            gate: config.gate(),
            matcher: Arc::new(config.matcher()),
            kind: config.signature_kind,
            threshold: config.threshold(),
            sessions: SessionSlot::new(config.session_ttl(), clock.clone()),
            clock,
            scanning: AtomicBool::new(false),
        }
    }

    /// Swap the distance strategy and its threshold.
    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>, threshold: f32) -> Self {
        self.matcher = matcher;
        self.threshold = threshold;
        self
    }

    pub fn signature_kind(&self) -> SignatureKind {
        self.kind
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn gate_state(&self) -> GateState {
        let now = self.clock.now_ms();
        self.gate.state(self.live.borrow().as_ref(), now)
    }

    /// Latest detection that passes the gate.
    ///
    /// The channel borrow is released before returning so callers can await
    /// while the capture loop keeps publishing.
    fn live_signature(&self) -> Result<Signature, PipelineError> {
        let now = self.clock.now_ms();
        let current = self.live.borrow();
        let signature = self.gate.admit(current.as_ref(), now)?;
        Ok(signature.clone())
    }

    /// Enroll the face currently in front of the camera under `key`.
    ///
    /// Never overwrites: an existing key fails with `DuplicateIdentity` and
    /// the stored record is left as it was.
    pub async fn register(
        &self,
        key: &str,
        profile: Profile,
    ) -> Result<EnrollmentRecord, PipelineError> {
        let signature = self.live_signature()?;
        if signature.kind() != self.kind {
            return Err(PipelineError::IncompatibleSignatureKind {
                candidate: signature.kind(),
                reference: self.kind,
            });
        }

        let record = EnrollmentRecord::new(key, profile, signature, self.clock.now_utc())?;
        if self.store.get_by_key(record.key()).await?.is_some() {
            tracing::warn!(key = record.key(), "registration rejected: key already enrolled");
            return Err(PipelineError::DuplicateIdentity(record.key().to_string()));
        }
        // Insert-if-absent closes the gap between the lookup and the write.
        self.store.insert(record.clone()).await?;

        tracing::info!(key = record.key(), kind = %self.kind, "identity enrolled");
        Ok(record)
    }

    /// Compare the live face against the single record stored under `key`.
    pub async fn verify(&self, key: &str) -> Result<VerifyOutcome, PipelineError> {
        let signature = self.live_signature()?;
        let record = self
            .store
            .get_by_key(key)
            .await?
            .ok_or_else(|| PipelineError::RecordNotFound(key.to_string()))?;

        let result = self
            .matcher
            .compare(&signature, record.signature(), self.threshold)?;
        tracing::debug!(key, distance = result.distance, threshold = result.threshold, "keyed comparison");

        if !result.matched {
            tracing::info!(key, distance = result.distance, "face not recognized");
            return Ok(VerifyOutcome::NotRecognized {
                distance: result.distance,
            });
        }
        Ok(VerifyOutcome::Granted(self.grant(&record)))
    }

    /// One scan pass: the live face against every enrollment in store order.
    ///
    /// The first record within threshold wins, even if a later one is closer.
    /// Returns [`ScanTick::Skipped`] without touching the store when another
    /// pass is still in flight.
    pub async fn scan_once(&self) -> Result<ScanTick, PipelineError> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            tracing::debug!("scan tick skipped, previous scan still running");
            return Ok(ScanTick::Skipped);
        }
        let _guard = ScanGuard(&self.scanning);

        let signature = self.live_signature()?;
        let records = self.store.get_all().await?;
        tracing::debug!(enrolled = records.len(), "scanning enrollments");

        for record in &records {
            let result = self
                .matcher
                .compare(&signature, record.signature(), self.threshold)?;
            if result.matched {
                tracing::debug!(key = record.key(), distance = result.distance, "scan match");
                return Ok(ScanTick::Granted(self.grant(record)));
            }
        }
        Ok(ScanTick::NoMatch)
    }

    fn grant(&self, record: &EnrollmentRecord) -> SessionGrant {
        let grant = SessionGrant::for_record(record, self.clock.now_utc());
        self.sessions.offer(grant.clone());
        tracing::info!(key = %grant.key, "session granted");
        grant
    }

    /// Claim the most recent unexpired grant.
    pub fn take_session(&self) -> Option<SessionGrant> {
        self.sessions.take()
    }

    pub fn sessions(&self) -> &SessionSlot {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::live_channel;
    use async_trait::async_trait;
    use facegate_core::{EmbeddingVector, GateError, LandmarkSet, ManualClock, EMBEDDING_DIM};
    use facegate_store::{InMemoryEnrollmentStore, StoreError};
    use tokio::sync::Notify;

    fn face(dx: f32) -> Signature {
        Signature::from(
            LandmarkSet::try_from(
                (0..68).map(|i| (0.3 + i as f32 * 0.005 + dx, 0.4)).collect::<Vec<_>>(),
            )
            .unwrap(),
        )
    }

    fn profile() -> Profile {
        Profile::new("Alice", "Liddell", "600 123 456", "alice@example.com").unwrap()
    }

    struct Rig {
        pipeline: FacePipeline,
        live: watch::Sender<Option<LiveDetection>>,
        clock: Arc<ManualClock>,
    }

    impl Rig {
        fn new(store: Arc<dyn EnrollmentStore>) -> Self {
            let clock = Arc::new(ManualClock::new(10_000));
            let (live, rx) = live_channel();
            let pipeline = FacePipeline::new(&Config::default(), store, rx, clock.clone());
            Self {
                pipeline,
                live,
                clock,
            }
        }

        fn show(&self, signature: Signature) {
            self.live.send_replace(Some(LiveDetection {
                signature,
                observed_at_ms: self.clock.now_ms(),
            }));
        }
    }

    #[tokio::test]
    async fn test_register_requires_live_face() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        let err = rig.pipeline.register("alice", profile()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoLiveFace(GateError::NoFace)));

        rig.show(face(0.0));
        rig.clock.advance(1_001);
        let err = rig.pipeline.register("alice", profile()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoLiveFace(GateError::Stale { age_ms: 1001 })));
    }

    #[tokio::test]
    async fn test_register_then_verify() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        rig.show(face(0.0));
        let record = rig.pipeline.register("alice@example.com", profile()).await.unwrap();
        assert_eq!(record.key(), "alice@example.com");

        rig.show(face(0.01));
        let outcome = rig.pipeline.verify("alice@example.com").await.unwrap();
        let VerifyOutcome::Granted(grant) = outcome else {
            panic!("expected grant, got {outcome:?}");
        };
        assert_eq!(grant.key, "alice@example.com");
        assert_eq!(rig.pipeline.take_session(), Some(grant));
        assert!(rig.pipeline.take_session().is_none());
    }

    #[tokio::test]
    async fn test_verify_unknown_key() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        rig.show(face(0.0));
        let err = rig.pipeline.verify("nobody").await.unwrap_err();
        assert!(matches!(err, PipelineError::RecordNotFound(ref k) if k == "nobody"));
    }

    #[tokio::test]
    async fn test_register_rejects_wrong_kind() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        rig.show(Signature::from(EmbeddingVector::new(vec![0.1; EMBEDDING_DIM]).unwrap()));
        let err = rig.pipeline.register("alice", profile()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompatibleSignatureKind {
                candidate: SignatureKind::Embedding,
                reference: SignatureKind::Landmarks,
            }
        ));
    }

    #[tokio::test]
    async fn test_register_blank_key_is_validation_error() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        rig.show(face(0.0));
        let err = rig.pipeline.register("  ", profile()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_scan_no_enrollments() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        rig.show(face(0.0));
        assert_eq!(rig.pipeline.scan_once().await.unwrap(), ScanTick::NoMatch);
    }

    /// Store whose `get_all` parks until released.
    struct ParkedStore {
        inner: InMemoryEnrollmentStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl EnrollmentStore for ParkedStore {
        async fn put(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
            self.inner.put(record).await
        }

        async fn insert(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
            self.inner.insert(record).await
        }

        async fn get_by_key(&self, key: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
            self.inner.get_by_key(key).await
        }

        async fn get_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.get_all().await
        }

        async fn remove(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_scan_is_skipped() {
        let store = Arc::new(ParkedStore {
            inner: InMemoryEnrollmentStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let rig = Rig::new(store.clone());
        rig.show(face(0.0));
        let pipeline = Arc::new(rig.pipeline);

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.scan_once().await }
        });
        store.entered.notified().await;

        assert_eq!(pipeline.scan_once().await.unwrap(), ScanTick::Skipped);

        store.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), ScanTick::NoMatch);

        // Flag cleared once the first scan finished
        store.release.notify_one();
        assert_eq!(pipeline.scan_once().await.unwrap(), ScanTick::NoMatch);
    }

    #[tokio::test]
    async fn test_scan_flag_cleared_after_error() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        assert!(rig.pipeline.scan_once().await.is_err());
        rig.show(face(0.0));
        assert_eq!(rig.pipeline.scan_once().await.unwrap(), ScanTick::NoMatch);
    }

    #[tokio::test]
    async fn test_gate_state_follows_detections() {
        let rig = Rig::new(Arc::new(InMemoryEnrollmentStore::new()));
        assert_eq!(rig.pipeline.gate_state(), GateState::NoFace);
        rig.show(face(0.0));
        assert_eq!(rig.pipeline.gate_state(), GateState::FaceLive);
        rig.clock.advance(2_000);
        assert_eq!(rig.pipeline.gate_state(), GateState::FaceStale);
    }
}
