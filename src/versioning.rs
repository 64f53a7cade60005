//! Configuration Version Manager
//!
//! Immutable, versioned snapshots of scenarios, context rules, and prompt
//! templates. Commits are serialized through a single writer lock and
//! persisted with compare-and-swap, so concurrent commit attempts queue
//! rather than interleave. Rollback is itself a logged commit whose
//! snapshot equals the target's content; history is linear and never
//! rewritten.
//!
//! Readers always see an immutable `Arc<ConfigurationVersion>` reference,
//! so the classification hot path takes no locks beyond one Arc clone.

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{ConfigSnapshot, ConfigurationVersion};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// A proposed configuration change: the full next snapshot plus the log
/// entries describing what changed.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub snapshot: ConfigSnapshot,
    pub change_log: Vec<String>,
}

/// Manages the linear history of configuration versions
pub struct VersionManager {
    storage: Arc<dyn StorageBackend>,
    current: RwLock<Arc<ConfigurationVersion>>,
    commit_lock: Mutex<()>,
}

impl VersionManager {
    /// Open the version history, committing a genesis version from `seed`
    /// when the store is empty.
    pub async fn open(storage: Arc<dyn StorageBackend>, seed: ConfigSnapshot) -> Result<Self> {
        let current = match storage.latest_version().await? {
            Some(version) => {
                debug!("Resuming at configuration version {}", version.version_id);
                version
            }
            None => {
                let genesis = ConfigurationVersion {
                    version_id: 1,
                    snapshot: seed,
                    change_log: vec!["initial configuration".to_string()],
                    created_at: Utc::now(),
                };
                storage.put_version(&genesis, None).await?;
                info!("Committed genesis configuration version 1");
                genesis
            }
        };

        Ok(Self {
            storage,
            current: RwLock::new(Arc::new(current)),
            commit_lock: Mutex::new(()),
        })
    }

    /// The active configuration version. Cheap: one Arc clone.
    pub async fn current(&self) -> Arc<ConfigurationVersion> {
        self.current.read().await.clone()
    }

    /// Commit a change set as the next version and return its id.
    ///
    /// Transactional: if persistence fails, no new version exists and the
    /// in-memory current snapshot is unchanged.
    pub async fn commit(&self, change_set: ChangeSet) -> Result<u64> {
        let _guard = self.commit_lock.lock().await;

        let current = self.current.read().await.clone();
        let next = ConfigurationVersion {
            version_id: current.version_id + 1,
            snapshot: change_set.snapshot,
            change_log: change_set.change_log,
            created_at: Utc::now(),
        };

        self.storage
            .put_version(&next, Some(current.version_id))
            .await?;

        let next = Arc::new(next);
        *self.current.write().await = next.clone();
        info!(
            "Committed configuration version {} ({} change log entries)",
            next.version_id,
            next.change_log.len()
        );
        Ok(next.version_id)
    }

    /// Fetch a committed version by id
    pub async fn get(&self, version_id: u64) -> Result<ConfigurationVersion> {
        self.storage.get_version(version_id).await
    }

    /// Roll back to a previous version's content.
    ///
    /// Creates a *new* version whose snapshot equals the target's; returns
    /// the new version id.
    pub async fn rollback(&self, target_version_id: u64) -> Result<u64> {
        let target = self.storage.get_version(target_version_id).await?;

        let change_set = ChangeSet {
            snapshot: target.snapshot,
            change_log: vec![format!("rollback to version {}", target_version_id)],
        };
        let new_id = self.commit(change_set).await?;
        info!(
            "Rolled back to version {} as new version {}",
            target_version_id, new_id
        );
        Ok(new_id)
    }

    /// Full committed history, oldest first
    pub async fn history(&self) -> Result<Vec<ConfigurationVersion>> {
        self.storage.list_versions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThemisError;
    use crate::storage::MemoryStorage;
    use crate::types::{ContextRule, TriggerCondition};
    use std::collections::BTreeMap;

    async fn manager() -> VersionManager {
        let storage = Arc::new(MemoryStorage::new());
        VersionManager::open(storage, ConfigSnapshot::default())
            .await
            .unwrap()
    }

    fn snapshot_with_rule(keyword: &str) -> ConfigSnapshot {
        let mut additions = BTreeMap::new();
        additions.insert("hint".to_string(), keyword.to_string());
        ConfigSnapshot {
            scenarios: vec![],
            context_rules: vec![ContextRule::new(
                TriggerCondition::KeywordContains {
                    keywords: vec![keyword.to_string()],
                    match_all: false,
                },
                additions,
            )],
            prompt_templates: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_genesis_version_is_one() {
        let manager = manager().await;
        assert_eq!(manager.current().await.version_id, 1);
    }

    #[tokio::test]
    async fn test_version_ids_strictly_increase() {
        let manager = manager().await;

        let v2 = manager
            .commit(ChangeSet {
                snapshot: snapshot_with_rule("oauth"),
                change_log: vec!["add oauth rule".to_string()],
            })
            .await
            .unwrap();
        let v3 = manager.rollback(1).await.unwrap();
        let v4 = manager
            .commit(ChangeSet {
                snapshot: snapshot_with_rule("migration"),
                change_log: vec!["add migration rule".to_string()],
            })
            .await
            .unwrap();

        assert_eq!((v2, v3, v4), (2, 3, 4));

        let history = manager.history().await.unwrap();
        let ids: Vec<u64> = history.iter().map(|v| v.version_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_rollback_round_trip() {
        let manager = manager().await;
        let before = manager.current().await.snapshot.clone();

        manager
            .commit(ChangeSet {
                snapshot: snapshot_with_rule("oauth"),
                change_log: vec!["add rule".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(manager.current().await.snapshot.context_rules.len(), 1);

        manager.rollback(1).await.unwrap();
        let after = manager.current().await.snapshot.clone();

        assert_eq!(after.context_rules.len(), before.context_rules.len());
        assert_eq!(after.scenarios.len(), before.scenarios.len());
    }

    #[tokio::test]
    async fn test_rollback_never_rewrites_history() {
        let manager = manager().await;
        manager
            .commit(ChangeSet {
                snapshot: snapshot_with_rule("oauth"),
                change_log: vec!["add rule".to_string()],
            })
            .await
            .unwrap();
        manager.rollback(1).await.unwrap();

        // The rolled-over version 2 still exists with its content
        let v2 = manager.get(2).await.unwrap();
        assert_eq!(v2.snapshot.context_rules.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_to_missing_version() {
        let manager = manager().await;
        let result = manager.rollback(99).await;
        assert!(matches!(
            result,
            Err(ThemisError::RollbackTargetNotFound(99))
        ));
        // No version was created by the failed rollback
        assert_eq!(manager.current().await.version_id, 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_queue() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = Arc::new(
            VersionManager::open(storage, ConfigSnapshot::default())
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .commit(ChangeSet {
                        snapshot: ConfigSnapshot::default(),
                        change_log: vec![format!("commit {}", i)],
                    })
                    .await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4, 5, 6, 7, 8, 9]);
    }
}
