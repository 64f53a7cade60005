//! Classification engine facade
//!
//! Wires the matcher, enhancer, orchestrator, feedback recorder, and
//! learning tiers into the surface consumed by API/CLI layers:
//! classify, submit_feedback, library access, manual learning triggers,
//! and configuration rollback.
//!
//! The hot path is read-only against an immutable configuration snapshot;
//! the only mutable state it touches is per-scenario counters under their
//! own locks. classify() is safely retryable: results are cached for a
//! short TTL under an idempotency key derived from the request, so a
//! retried call returns the recorded classification without re-counting
//! scenario usage.

use crate::classifier::ClassifierOrchestrator;
use crate::config::ThemisConfig;
use crate::enhancer::ContextEnhancer;
use crate::error::{Result, ThemisError};
use crate::feedback::{FeedbackAck, FeedbackRecorder};
use crate::learning::{
    DeepOptimizer, NoMatchCandidate, OptimizationReport, PatternAnalyzer, PatternReport,
};
use crate::library::LibraryState;
use crate::matcher::ScenarioMatcher;
use crate::oracle::ReasoningOracle;
use crate::storage::StorageBackend;
use crate::types::{
    ClassificationId, ClassificationRecord, ConfigSnapshot, ConfigurationVersion, ContextRule,
    FeedbackType, MatchOutcome, RuleId, Scenario, ScenarioId,
};
use crate::versioning::{ChangeSet, VersionManager};
use chrono::Utc;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A work item classification request
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub description: String,
    pub context: BTreeMap<String, String>,
}

/// The self-improving work item classification engine
pub struct ClassificationEngine {
    config: ThemisConfig,
    oracle: Arc<dyn ReasoningOracle>,
    storage: Arc<dyn StorageBackend>,
    versions: Arc<VersionManager>,
    library: Arc<LibraryState>,
    matcher: ScenarioMatcher,
    orchestrator: ClassifierOrchestrator,
    recorder: FeedbackRecorder,
    analyzer: Arc<PatternAnalyzer>,
    optimizer: Arc<DeepOptimizer>,
    review_queue: Arc<Mutex<Vec<ContextRule>>>,
    /// Serializes manual configuration changes with the learning tiers so
    /// no commit is built from a stale snapshot
    optimization_lock: Arc<Mutex<()>>,
    classify_cache: Mutex<LruCache<String, (Instant, ClassificationRecord)>>,
}

impl ClassificationEngine {
    /// Build an engine over the given Oracle and storage backend,
    /// committing `seed_scenarios` as the genesis configuration when the
    /// store holds no versions yet.
    pub async fn new(
        config: ThemisConfig,
        oracle: Arc<dyn ReasoningOracle>,
        storage: Arc<dyn StorageBackend>,
        seed_scenarios: Vec<Scenario>,
    ) -> Result<Self> {
        config.validate()?;

        let seed = ConfigSnapshot {
            scenarios: seed_scenarios,
            context_rules: Vec::new(),
            prompt_templates: BTreeMap::new(),
        };
        let versions = Arc::new(VersionManager::open(storage.clone(), seed).await?);

        let library = Arc::new(LibraryState::new(
            config.learning.clone(),
            config.oracle.cache_capacity,
        ));
        let optimization_lock = Arc::new(Mutex::new(()));
        let review_queue = Arc::new(Mutex::new(Vec::new()));
        let no_match_pool = Arc::new(Mutex::new(Vec::new()));

        let analyzer = Arc::new(PatternAnalyzer::new(
            config.learning.clone(),
            storage.clone(),
            versions.clone(),
            optimization_lock.clone(),
            review_queue.clone(),
        ));
        let optimizer = Arc::new(DeepOptimizer::new(
            config.learning.clone(),
            storage.clone(),
            versions.clone(),
            library.clone(),
            optimization_lock.clone(),
            no_match_pool,
        ));
        let recorder = FeedbackRecorder::new(
            config.learning.clone(),
            storage.clone(),
            versions.clone(),
            library.clone(),
            analyzer.clone(),
            optimizer.clone(),
        );

        let cache_capacity =
            NonZeroUsize::new(config.oracle.cache_capacity).expect("validated non-zero");

        Ok(Self {
            matcher: ScenarioMatcher::new(config.matcher.clone(), config.oracle.clone()),
            orchestrator: ClassifierOrchestrator::new(
                config.classifier.clone(),
                config.oracle.clone(),
            ),
            config,
            oracle,
            storage,
            versions,
            library,
            recorder,
            analyzer,
            optimizer,
            review_queue,
            optimization_lock,
            classify_cache: Mutex::new(LruCache::new(cache_capacity)),
        })
    }

    /// Classify a work item description.
    ///
    /// Validation failures surface before any Oracle call; Oracle outages
    /// surface as [`ThemisError::OracleUnavailable`] after the retry
    /// budget, never as a fallback classification.
    pub async fn classify(&self, request: ClassificationRequest) -> Result<ClassificationRecord> {
        self.orchestrator.validate_description(&request.description)?;

        let key = idempotency_key(&request.description, &request.context);
        {
            let mut cache = self.classify_cache.lock().await;
            if let Some((cached_at, record)) = cache.get(&key) {
                if cached_at.elapsed() < self.config.oracle.cache_ttl {
                    debug!("Returning cached classification for retried request");
                    return Ok(record.clone());
                }
                cache.pop(&key);
            }
        }

        let version = self.versions.current().await;
        let snapshot = &version.snapshot;

        let outcome = self
            .matcher
            .match_description(self.oracle.as_ref(), &request.description, snapshot)
            .await?;
        let scenario = outcome.matched_scenario().and_then(|id| snapshot.scenario(id));

        let enhanced = ContextEnhancer::enhance(
            &request.description,
            &request.context,
            scenario,
            &snapshot.context_rules,
        );
        for rule_id in &enhanced.applied_rules {
            self.library.record_rule_applied(*rule_id).await;
        }

        let (result, alignment_score) = self
            .orchestrator
            .classify(
                self.oracle.as_ref(),
                &request.description,
                &enhanced.context,
                scenario,
            )
            .await?;

        let alternatives = match &outcome {
            MatchOutcome::Ambiguous { candidates } => candidates.clone(),
            _ => Vec::new(),
        };

        let record = ClassificationRecord {
            id: ClassificationId::new(),
            description: request.description.clone(),
            input_context: request.context,
            matched_scenario: scenario.map(|s| s.id),
            alternatives,
            enhanced_context: enhanced.context,
            applied_rules: enhanced.applied_rules,
            result,
            alignment_score,
            invalidated: false,
            config_version: version.version_id,
            created_at: Utc::now(),
        };
        self.storage.put_classification(&record).await?;

        match (&outcome, scenario) {
            (MatchOutcome::Matched { .. }, Some(scenario)) => {
                self.library.record_usage(scenario, &key).await;
            }
            (MatchOutcome::NoMatch { .. }, _) => {
                // Remember for the Deep Optimizer's scenario creation pass
                self.optimizer
                    .remember_no_match(NoMatchCandidate {
                        description: record.description.clone(),
                        size: record.result.size.value,
                        complexity: record.result.complexity.value,
                        work_type: record.result.work_type.value,
                    })
                    .await;
            }
            _ => {}
        }

        self.classify_cache
            .lock()
            .await
            .put(key, (Instant::now(), record.clone()));

        info!(
            "Classified {} as {}/{}/{} (scenario {:?}, alignment {:?})",
            record.id,
            record.result.size.value,
            record.result.complexity.value,
            record.result.work_type.value,
            record.matched_scenario,
            record.alignment_score
        );
        Ok(record)
    }

    /// Record user feedback on a classification
    pub async fn submit_feedback(
        &self,
        classification_id: ClassificationId,
        feedback: FeedbackType,
        additional_context: BTreeMap<String, String>,
        user_id: &str,
    ) -> Result<FeedbackAck> {
        self.recorder
            .submit(classification_id, feedback, additional_context, user_id)
            .await
    }

    /// Fetch a stored classification record
    pub async fn get_classification(&self, id: ClassificationId) -> Result<ClassificationRecord> {
        self.storage.get_classification(id).await
    }

    /// The active scenario library with live counters folded in
    pub async fn scenario_library(&self) -> Vec<Scenario> {
        let version = self.versions.current().await;
        let mut scenarios = Vec::new();
        for scenario in version.snapshot.active_scenarios() {
            scenarios.push(self.library.overlay(scenario).await);
        }
        scenarios
    }

    /// Fetch one active scenario with live counters folded in
    pub async fn get_scenario(&self, id: ScenarioId) -> Result<Scenario> {
        let version = self.versions.current().await;
        match version.snapshot.scenario(id) {
            Some(scenario) => Ok(self.library.overlay(scenario).await),
            None => Err(ThemisError::ScenarioNotFound(id.to_string())),
        }
    }

    /// Commit a manually curated scenario into the library
    pub async fn add_scenario(&self, scenario: Scenario) -> Result<ScenarioId> {
        let _guard = self.optimization_lock.lock().await;
        let version = self.versions.current().await;
        let mut snapshot = version.snapshot.clone();
        if snapshot.scenarios.iter().any(|s| s.id == scenario.id) {
            return Err(ThemisError::Validation(format!(
                "Scenario {} already exists",
                scenario.id
            )));
        }
        let scenario_id = scenario.id;
        let title = scenario.title.clone();
        snapshot.scenarios.push(scenario);
        self.versions
            .commit(ChangeSet {
                snapshot,
                change_log: vec![format!("manual: added scenario {} ({})", scenario_id, title)],
            })
            .await?;
        Ok(scenario_id)
    }

    /// Rules proposed by pattern analysis that await manual review
    pub async fn pending_rules(&self) -> Vec<ContextRule> {
        self.review_queue.lock().await.clone()
    }

    /// Promote a queued rule into the active configuration
    pub async fn approve_rule(&self, rule_id: RuleId) -> Result<u64> {
        let rule = {
            let mut queue = self.review_queue.lock().await;
            let index = queue
                .iter()
                .position(|rule| rule.id == rule_id)
                .ok_or_else(|| {
                    ThemisError::Validation(format!("Rule {} is not awaiting review", rule_id))
                })?;
            queue.remove(index)
        };

        let _guard = self.optimization_lock.lock().await;
        let version = self.versions.current().await;
        let mut snapshot = version.snapshot.clone();
        let change_log = vec![format!("manual: approved rule {}", rule.id)];
        snapshot.context_rules.push(rule);
        self.versions.commit(ChangeSet { snapshot, change_log }).await
    }

    /// Run pattern analysis over the most recent completed batch
    pub async fn trigger_pattern_analysis(&self) -> Result<PatternReport> {
        let batch = self.config.learning.pattern_batch_size;
        let total = self.recorder.feedback_count();
        let end = total - total % batch;
        if end == 0 {
            return Ok(PatternReport::default());
        }
        self.analyzer.run(end + 1 - batch, end + 1).await
    }

    /// Run deep optimization over the most recent completed batch
    pub async fn trigger_deep_optimization(&self) -> Result<OptimizationReport> {
        let batch = self.config.learning.deep_batch_size;
        let total = self.recorder.feedback_count();
        let end = total - total % batch;
        // Scenario creation from no-match candidates works without feedback
        let (from, to) = if end == 0 { (1, 1) } else { (end + 1 - batch, end + 1) };
        self.optimizer.run(from, to).await
    }

    /// Roll the configuration back to a previous version's content;
    /// returns the new version id.
    pub async fn rollback_configuration(&self, version_id: u64) -> Result<u64> {
        let _guard = self.optimization_lock.lock().await;
        self.versions.rollback(version_id).await
    }

    /// The active configuration version id
    pub async fn current_version(&self) -> u64 {
        self.versions.current().await.version_id
    }

    /// Full configuration history, oldest first
    pub async fn version_history(&self) -> Result<Vec<ConfigurationVersion>> {
        self.versions.history().await
    }

    /// Total feedback items recorded
    pub fn feedback_count(&self) -> u64 {
        self.recorder.feedback_count()
    }

    /// Learning batches triggered so far (pattern, deep)
    pub fn trigger_counts(&self) -> (u64, u64) {
        (
            self.recorder.pattern_trigger_count(),
            self.recorder.deep_trigger_count(),
        )
    }
}

/// Idempotency key: SHA-256 over the description and the canonical
/// (sorted-key) serialization of the context.
fn idempotency_key(description: &str, context: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hasher.update([0u8]);
    for (key, value) in context {
        hasher.update(key.as_bytes());
        hasher.update([1u8]);
        hasher.update(value.as_bytes());
        hasher.update([2u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_stable_and_context_sensitive() {
        let mut context = BTreeMap::new();
        context.insert("team".to_string(), "platform".to_string());

        let a = idempotency_key("Integrate OAuth", &context);
        let b = idempotency_key("Integrate OAuth", &context);
        assert_eq!(a, b);

        context.insert("priority".to_string(), "high".to_string());
        let c = idempotency_key("Integrate OAuth", &context);
        assert_ne!(a, c);

        let d = idempotency_key("Integrate SAML", &context);
        assert_ne!(c, d);
    }

    #[test]
    fn test_idempotency_key_separates_key_value_boundaries() {
        let mut ab = BTreeMap::new();
        ab.insert("a".to_string(), "bc".to_string());
        let mut ab2 = BTreeMap::new();
        ab2.insert("ab".to_string(), "c".to_string());

        assert_ne!(
            idempotency_key("same description", &ab),
            idempotency_key("same description", &ab2)
        );
    }
}
