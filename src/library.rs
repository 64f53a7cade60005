//! Scenario library runtime state
//!
//! The structural scenario library lives in immutable configuration
//! snapshots; the counters that move on the hot path (usage counts,
//! accuracy scores, rule application counts) live here, under
//! fine-grained per-scenario locks. No global lock is ever taken across
//! scenarios, so concurrent classifications only contend when they touch
//! the same scenario.
//!
//! Usage increments are deduplicated by idempotency key so a retried
//! classify() call counts once.

use crate::config::LearningConfig;
use crate::types::{Dimension, RuleId, Scenario, ScenarioId};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Runtime counters for one scenario
#[derive(Debug, Clone)]
pub struct ScenarioStats {
    /// Times this scenario matched
    pub usage_count: u64,

    /// Per-dimension EMA accuracy, ordered as [`Dimension::ALL`]
    pub dimension_accuracy: [f32; 3],

    /// Feedback observations folded in so far
    pub feedback_count: u64,

    /// Set when repeated rejects push accuracy below the review threshold
    pub flagged_for_review: bool,
}

impl ScenarioStats {
    fn seeded(usage_count: u64, accuracy: f32) -> Self {
        Self {
            usage_count,
            dimension_accuracy: [accuracy; 3],
            feedback_count: 0,
            flagged_for_review: false,
        }
    }

    /// Overall accuracy: mean of the per-dimension scores
    pub fn accuracy_score(&self) -> f32 {
        self.dimension_accuracy.iter().sum::<f32>() / self.dimension_accuracy.len() as f32
    }
}

/// Outcome of one accuracy update
#[derive(Debug, Clone, Copy)]
pub struct AccuracyUpdate {
    pub accuracy_score: f32,
    pub flagged_for_review: bool,
}

/// Fine-grained runtime state for the scenario library
pub struct LibraryState {
    config: LearningConfig,
    stats: RwLock<HashMap<ScenarioId, Arc<Mutex<ScenarioStats>>>>,
    rule_applies: RwLock<HashMap<RuleId, Arc<AtomicU64>>>,
    counted_keys: Mutex<LruCache<String, ()>>,
}

impl LibraryState {
    pub fn new(config: LearningConfig, dedupe_window: usize) -> Self {
        let capacity = NonZeroUsize::new(dedupe_window.max(1)).expect("window is non-zero");
        Self {
            config,
            stats: RwLock::new(HashMap::new()),
            rule_applies: RwLock::new(HashMap::new()),
            counted_keys: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Handle to a scenario's counters, creating them from the committed
    /// baseline on first touch.
    pub async fn stats_handle(&self, scenario: &Scenario) -> Arc<Mutex<ScenarioStats>> {
        {
            let stats = self.stats.read().await;
            if let Some(handle) = stats.get(&scenario.id) {
                return handle.clone();
            }
        }

        let mut stats = self.stats.write().await;
        stats
            .entry(scenario.id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(ScenarioStats::seeded(
                    scenario.usage_count,
                    scenario.accuracy_score,
                )))
            })
            .clone()
    }

    /// Increment a scenario's usage count unless this idempotency key was
    /// already counted. Returns whether the increment happened.
    pub async fn record_usage(&self, scenario: &Scenario, idempotency_key: &str) -> bool {
        {
            let mut counted = self.counted_keys.lock().await;
            if counted.put(idempotency_key.to_string(), ()).is_some() {
                debug!(
                    "Skipping duplicate usage increment for scenario {} (retried request)",
                    scenario.id
                );
                return false;
            }
        }

        let handle = self.stats_handle(scenario).await;
        let mut stats = handle.lock().await;
        stats.usage_count += 1;
        true
    }

    /// Accept feedback: every dimension observes a perfect score
    pub async fn record_accept(&self, scenario: &Scenario) -> AccuracyUpdate {
        self.update_accuracy(scenario, &[], false).await
    }

    /// Edit feedback: corrected dimensions observe 0, unchanged observe 100
    pub async fn record_edit(
        &self,
        scenario: &Scenario,
        corrected: &[Dimension],
    ) -> AccuracyUpdate {
        self.update_accuracy(scenario, corrected, false).await
    }

    /// Reject feedback: every dimension observes 0; the scenario is
    /// flagged for Deep Optimizer review once accuracy drops below the
    /// review threshold.
    pub async fn record_reject(&self, scenario: &Scenario) -> AccuracyUpdate {
        self.update_accuracy(scenario, &Dimension::ALL, true).await
    }

    async fn update_accuracy(
        &self,
        scenario: &Scenario,
        corrected: &[Dimension],
        reject: bool,
    ) -> AccuracyUpdate {
        let retain = self.config.ema_retain;
        let handle = self.stats_handle(scenario).await;
        let mut stats = handle.lock().await;

        for (index, dimension) in Dimension::ALL.iter().enumerate() {
            let observation = if corrected.contains(dimension) { 0.0 } else { 100.0 };
            stats.dimension_accuracy[index] =
                retain * stats.dimension_accuracy[index] + (1.0 - retain) * observation;
        }
        stats.feedback_count += 1;

        let accuracy = stats.accuracy_score();
        if reject && accuracy < self.config.review_accuracy_threshold && !stats.flagged_for_review {
            stats.flagged_for_review = true;
            warn!(
                "Scenario {} accuracy fell to {:.1}, flagged for deep optimizer review",
                scenario.id, accuracy
            );
        }

        AccuracyUpdate {
            accuracy_score: accuracy,
            flagged_for_review: stats.flagged_for_review,
        }
    }

    /// Count one application of a context rule
    pub async fn record_rule_applied(&self, rule_id: RuleId) {
        {
            let applies = self.rule_applies.read().await;
            if let Some(counter) = applies.get(&rule_id) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut applies = self.rule_applies.write().await;
        applies
            .entry(rule_id)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// How many times a rule has fired since it entered the library
    pub async fn rule_applied_count(&self, rule_id: RuleId) -> u64 {
        self.rule_applies
            .read()
            .await
            .get(&rule_id)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// A scenario with its live counters folded in
    pub async fn overlay(&self, scenario: &Scenario) -> Scenario {
        let stats = self.stats.read().await;
        match stats.get(&scenario.id) {
            Some(handle) => {
                let stats = handle.lock().await;
                let mut merged = scenario.clone();
                merged.usage_count = stats.usage_count;
                merged.accuracy_score = stats.accuracy_score();
                merged
            }
            None => scenario.clone(),
        }
    }

    /// Scenarios currently flagged for Deep Optimizer review
    pub async fn flagged_scenarios(&self) -> Vec<ScenarioId> {
        let stats = self.stats.read().await;
        let mut flagged = Vec::new();
        for (id, handle) in stats.iter() {
            if handle.lock().await.flagged_for_review {
                flagged.push(*id);
            }
        }
        flagged.sort();
        flagged
    }

    /// Clear a review flag once the Deep Optimizer has acted on it
    pub async fn clear_review_flag(&self, scenario_id: ScenarioId) {
        let stats = self.stats.read().await;
        if let Some(handle) = stats.get(&scenario_id) {
            handle.lock().await.flagged_for_review = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Complexity, ExpectedClassification, Size, WorkType};

    fn scenario() -> Scenario {
        Scenario::new(
            "OAuth Integration (Single Provider)",
            "authentication",
            ExpectedClassification {
                size: Size::L,
                complexity: Complexity::Medium,
                work_type: WorkType::Feature,
            },
        )
    }

    fn library() -> LibraryState {
        LibraryState::new(crate::config::ThemisConfig::default().learning, 64)
    }

    #[tokio::test]
    async fn test_accept_raises_accuracy() {
        let library = library();
        let scenario = scenario();

        let update = library.record_accept(&scenario).await;
        // 0.9 * 65 + 0.1 * 100 = 68.5
        assert!((update.accuracy_score - 68.5).abs() < 0.01);
        assert!(!update.flagged_for_review);
    }

    #[tokio::test]
    async fn test_edit_mixes_dimension_observations() {
        let library = library();
        let scenario = scenario();

        let update = library
            .record_edit(&scenario, &[Dimension::Complexity])
            .await;
        // size/work_type: 0.9*65 + 0.1*100 = 68.5; complexity: 0.9*65 = 58.5
        let expected = (68.5 + 58.5 + 68.5) / 3.0;
        assert!((update.accuracy_score - expected).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_three_rejects_flag_scenario() {
        let library = library();
        let scenario = scenario();

        let first = library.record_reject(&scenario).await;
        let second = library.record_reject(&scenario).await;
        assert!(!second.flagged_for_review);

        let third = library.record_reject(&scenario).await;
        // 65 * 0.9^3 = 47.385
        assert!(third.accuracy_score < 50.0);
        assert!(third.flagged_for_review);
        assert!(first.accuracy_score > second.accuracy_score);

        assert_eq!(library.flagged_scenarios().await, vec![scenario.id]);
    }

    #[tokio::test]
    async fn test_usage_increment_is_idempotent_per_key() {
        let library = library();
        let scenario = scenario();

        assert!(library.record_usage(&scenario, "key-1").await);
        assert!(!library.record_usage(&scenario, "key-1").await);
        assert!(library.record_usage(&scenario, "key-2").await);

        let merged = library.overlay(&scenario).await;
        assert_eq!(merged.usage_count, 2);
    }

    #[tokio::test]
    async fn test_rule_apply_counter() {
        let library = library();
        let rule_id = RuleId::new();

        assert_eq!(library.rule_applied_count(rule_id).await, 0);
        library.record_rule_applied(rule_id).await;
        library.record_rule_applied(rule_id).await;
        assert_eq!(library.rule_applied_count(rule_id).await, 2);
    }

    #[tokio::test]
    async fn test_overlay_without_stats_returns_baseline() {
        let library = library();
        let scenario = scenario();

        let merged = library.overlay(&scenario).await;
        assert_eq!(merged.usage_count, scenario.usage_count);
        assert_eq!(merged.accuracy_score, scenario.accuracy_score);
    }
}
