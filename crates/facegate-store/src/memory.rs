use std::sync::RwLock;

use async_trait::async_trait;
use facegate_core::EnrollmentRecord;

use crate::store::{EnrollmentStore, StoreError};

/// Process-local store. Keeps insertion order; `put` on an existing key
/// replaces the record in place.
#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    records: RwLock<Vec<EnrollmentRecord>>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = EnrollmentRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("in-memory store lock poisoned".into())
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn put(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        match records.iter_mut().find(|r| r.key() == record.key()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn insert(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        if records.iter().any(|r| r.key() == record.key()) {
            return Err(StoreError::Duplicate(record.key().to_string()));
        }
        records.push(record);
        Ok(())
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.iter().find(|r| r.key() == key).cloned())
    }

    async fn get_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.clone())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let before = records.len();
        records.retain(|r| r.key() != key);
        Ok(records.len() != before)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().map_err(|_| Self::poisoned())?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use facegate_core::{LandmarkSet, Profile, Signature};

    fn record(key: &str, name: &str) -> EnrollmentRecord {
        let profile = Profile::new(name, "", "600123456", "someone@example.com").unwrap();
        let sig = Signature::from(LandmarkSet::try_from(vec![(0.5, 0.5); 10]).unwrap());
        EnrollmentRecord::new(key, profile, sig, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_and_keeps_original() {
        let store = InMemoryEnrollmentStore::new();
        store.insert(record("alice", "Alice")).await.unwrap();

        let err = store.insert(record("alice", "Mallory")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(ref k) if k == "alice"));

        let kept = store.get_by_key("alice").await.unwrap().unwrap();
        assert_eq!(kept.profile().name(), "Alice");
    }

    #[tokio::test]
    async fn test_keys_are_case_sensitive() {
        let store = InMemoryEnrollmentStore::new();
        store.insert(record("Alice", "A")).await.unwrap();
        store.insert(record("alice", "B")).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert!(store.get_by_key("ALICE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_in_place() {
        let store = InMemoryEnrollmentStore::with_records([record("a", "A"), record("b", "B")]);
        store.put(record("a", "Replaced")).await.unwrap();
        store.put(record("c", "C")).await.unwrap();

        let keys: Vec<String> = store
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.key().to_string())
            .collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(store.get_by_key("a").await.unwrap().unwrap().profile().name(), "Replaced");
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryEnrollmentStore::with_records([record("a", "A")]);
        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
