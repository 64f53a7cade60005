//! In-memory storage backend
//!
//! Reference implementation of [`StorageBackend`] over tokio RwLock maps.
//! Used directly in tests and as the default backend for embedded use.

use crate::error::{Result, ThemisError};
use crate::storage::StorageBackend;
use crate::types::{
    ClassificationId, ClassificationRecord, ConfigurationVersion, FeedbackRecord,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStorage {
    classifications: RwLock<HashMap<ClassificationId, ClassificationRecord>>,
    classification_order: RwLock<Vec<ClassificationId>>,
    feedback: RwLock<Vec<FeedbackRecord>>,
    versions: RwLock<BTreeMap<u64, ConfigurationVersion>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put_classification(&self, record: &ClassificationRecord) -> Result<()> {
        let mut map = self.classifications.write().await;
        if map.contains_key(&record.id) {
            return Err(ThemisError::Storage(format!(
                "Classification {} already exists",
                record.id
            )));
        }
        map.insert(record.id, record.clone());
        self.classification_order.write().await.push(record.id);
        Ok(())
    }

    async fn get_classification(&self, id: ClassificationId) -> Result<ClassificationRecord> {
        self.classifications
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ThemisError::ClassificationNotFound(id.to_string()))
    }

    async fn invalidate_classification(&self, id: ClassificationId) -> Result<()> {
        let mut map = self.classifications.write().await;
        let record = map
            .get_mut(&id)
            .ok_or_else(|| ThemisError::ClassificationNotFound(id.to_string()))?;
        record.invalidated = true;
        Ok(())
    }

    async fn list_classifications(&self, limit: usize) -> Result<Vec<ClassificationRecord>> {
        let order = self.classification_order.read().await;
        let map = self.classifications.read().await;
        Ok(order
            .iter()
            .take(limit)
            .filter_map(|id| map.get(id).cloned())
            .collect())
    }

    async fn put_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        self.feedback.write().await.push(record.clone());
        Ok(())
    }

    async fn list_feedback_range(&self, from_seq: u64, to_seq: u64) -> Result<Vec<FeedbackRecord>> {
        let feedback = self.feedback.read().await;
        let mut range: Vec<FeedbackRecord> = feedback
            .iter()
            .filter(|f| f.seq >= from_seq && f.seq < to_seq)
            .cloned()
            .collect();
        range.sort_by_key(|f| f.seq);
        Ok(range)
    }

    async fn put_version(
        &self,
        version: &ConfigurationVersion,
        expected_latest: Option<u64>,
    ) -> Result<()> {
        let mut versions = self.versions.write().await;
        let latest = versions.keys().next_back().copied();
        if latest != expected_latest {
            return Err(ThemisError::VersionConflict(format!(
                "expected latest {:?}, found {:?}",
                expected_latest, latest
            )));
        }
        if versions.contains_key(&version.version_id) {
            return Err(ThemisError::VersionConflict(format!(
                "version {} already committed",
                version.version_id
            )));
        }
        versions.insert(version.version_id, version.clone());
        Ok(())
    }

    async fn get_version(&self, version_id: u64) -> Result<ConfigurationVersion> {
        self.versions
            .read()
            .await
            .get(&version_id)
            .cloned()
            .ok_or(ThemisError::RollbackTargetNotFound(version_id))
    }

    async fn latest_version(&self) -> Result<Option<ConfigurationVersion>> {
        Ok(self.versions.read().await.values().next_back().cloned())
    }

    async fn list_versions(&self) -> Result<Vec<ConfigurationVersion>> {
        Ok(self.versions.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfigSnapshot, FeedbackId, FeedbackType};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn version(id: u64) -> ConfigurationVersion {
        ConfigurationVersion {
            version_id: id,
            snapshot: ConfigSnapshot::default(),
            change_log: vec![format!("version {}", id)],
            created_at: Utc::now(),
        }
    }

    fn feedback(seq: u64) -> FeedbackRecord {
        FeedbackRecord {
            id: FeedbackId::new(),
            classification_id: ClassificationId::new(),
            feedback: FeedbackType::Accept,
            additional_context: BTreeMap::new(),
            user_id: "tester".to_string(),
            seq,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_version_cas_rejects_stale_writer() {
        let storage = MemoryStorage::new();

        storage.put_version(&version(1), None).await.unwrap();

        // Second writer still believes the store is empty
        let result = storage.put_version(&version(2), None).await;
        assert!(matches!(result, Err(ThemisError::VersionConflict(_))));

        // Correct expectation succeeds
        storage.put_version(&version(2), Some(1)).await.unwrap();
        assert_eq!(storage.latest_version().await.unwrap().unwrap().version_id, 2);
    }

    #[tokio::test]
    async fn test_missing_version_is_rollback_target_not_found() {
        let storage = MemoryStorage::new();
        let result = storage.get_version(42).await;
        assert!(matches!(result, Err(ThemisError::RollbackTargetNotFound(42))));
    }

    #[tokio::test]
    async fn test_feedback_range_is_half_open() {
        let storage = MemoryStorage::new();
        for seq in 1..=20 {
            storage.put_feedback(&feedback(seq)).await.unwrap();
        }

        let batch = storage.list_feedback_range(11, 21).await.unwrap();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch.first().unwrap().seq, 11);
        assert_eq!(batch.last().unwrap().seq, 20);
    }

    #[tokio::test]
    async fn test_duplicate_classification_rejected() {
        let storage = MemoryStorage::new();
        let record = ClassificationRecord {
            id: ClassificationId::new(),
            description: "Test work item description".to_string(),
            input_context: BTreeMap::new(),
            matched_scenario: None,
            alternatives: vec![],
            enhanced_context: BTreeMap::new(),
            applied_rules: vec![],
            result: crate::types::ClassificationResult {
                size: crate::types::DimensionResult {
                    value: crate::types::Size::M,
                    confidence: 0.9,
                    reasoning: "medium".to_string(),
                },
                complexity: crate::types::DimensionResult {
                    value: crate::types::Complexity::Low,
                    confidence: 0.9,
                    reasoning: "simple".to_string(),
                },
                work_type: crate::types::DimensionResult {
                    value: crate::types::WorkType::Bug,
                    confidence: 0.9,
                    reasoning: "defect".to_string(),
                },
            },
            alignment_score: None,
            invalidated: false,
            config_version: 1,
            created_at: Utc::now(),
        };

        storage.put_classification(&record).await.unwrap();
        assert!(storage.put_classification(&record).await.is_err());
    }
}
