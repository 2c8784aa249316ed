//! facegate-store: Persistence for enrollment records.
//!
//! The [`EnrollmentStore`] trait is the only thing the pipeline sees.
//! [`SqliteEnrollmentStore`] is the on-disk backend opened once at startup;
//! [`InMemoryEnrollmentStore`] serves tests and throwaway sessions.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::InMemoryEnrollmentStore;
pub use sqlite::SqliteEnrollmentStore;
pub use store::{EnrollmentStore, StoreError};
