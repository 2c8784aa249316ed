use async_trait::async_trait;
use facegate_core::EnrollmentRecord;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("enrollment store unavailable: {0}")]
    Unavailable(String),
    #[error("enrollment store I/O failed: {0}")]
    Io(String),
    #[error("identity '{0}' is already enrolled")]
    Duplicate(String),
    #[error("stored record for '{key}' is unreadable: {message}")]
    Corrupt { key: String, message: String },
}

/// Key-value store of enrolled identities.
///
/// Every call either resolves with a result or fails; a failed write leaves
/// previously stored records untouched.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Insert or replace the record under its key.
    ///
    /// Registration must not use this; see [`EnrollmentStore::insert`].
    async fn put(&self, record: EnrollmentRecord) -> Result<(), StoreError>;

    /// Insert only if no record exists under the key.
    async fn insert(&self, record: EnrollmentRecord) -> Result<(), StoreError>;

    async fn get_by_key(&self, key: &str) -> Result<Option<EnrollmentRecord>, StoreError>;

    /// All records, in store order (first enrollment first).
    async fn get_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError>;

    /// Delete a record. Returns whether one existed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.get_all().await?.len())
    }
}
