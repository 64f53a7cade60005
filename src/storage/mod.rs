//! Storage layer for the Themis classification engine
//!
//! Provides the persistence boundary: get/put/list for classification and
//! feedback records, and compare-and-swap puts for configuration versions.
//! Engine internals never assume a particular backend; the in-memory
//! implementation is the reference backend and the test harness.

pub mod memory;

use crate::error::Result;
use crate::types::{
    ClassificationId, ClassificationRecord, ConfigurationVersion, FeedbackRecord,
};
use async_trait::async_trait;

pub use memory::MemoryStorage;

/// Storage backend trait defining all required operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a new classification record (immutable once stored)
    async fn put_classification(&self, record: &ClassificationRecord) -> Result<()>;

    /// Retrieve a classification record by ID
    async fn get_classification(&self, id: ClassificationId) -> Result<ClassificationRecord>;

    /// Mark a classification as invalidated by reject feedback.
    /// The only permitted mutation of a stored record.
    async fn invalidate_classification(&self, id: ClassificationId) -> Result<()>;

    /// List classification records, oldest first, up to `limit`
    async fn list_classifications(&self, limit: usize) -> Result<Vec<ClassificationRecord>>;

    /// Append a feedback record (append-only)
    async fn put_feedback(&self, record: &FeedbackRecord) -> Result<()>;

    /// List feedback records with `seq` in [from_seq, to_seq), ordered by seq
    async fn list_feedback_range(&self, from_seq: u64, to_seq: u64) -> Result<Vec<FeedbackRecord>>;

    /// Store a configuration version iff `expected_latest` is still the
    /// highest committed version id. A lost race is a `VersionConflict`.
    async fn put_version(
        &self,
        version: &ConfigurationVersion,
        expected_latest: Option<u64>,
    ) -> Result<()>;

    /// Retrieve a configuration version by id
    async fn get_version(&self, version_id: u64) -> Result<ConfigurationVersion>;

    /// Latest committed configuration version, if any
    async fn latest_version(&self) -> Result<Option<ConfigurationVersion>>;

    /// All committed versions, oldest first
    async fn list_versions(&self) -> Result<Vec<ConfigurationVersion>>;
}
