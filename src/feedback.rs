//! Feedback Recorder
//!
//! Persists accept/edit/reject feedback, folds it into per-scenario
//! accuracy via exponential moving average, and fires the learning tiers
//! at their batch boundaries. The global feedback counter is an atomic
//! fetch-add, so every sequence number is handed out exactly once and
//! each threshold crossing fires exactly one batch run regardless of
//! concurrent submitters. Learning runs are spawned and never block the
//! feedback write.

use crate::config::LearningConfig;
use crate::error::{Result, ThemisError};
use crate::learning::{DeepOptimizer, PatternAnalyzer};
use crate::library::LibraryState;
use crate::storage::StorageBackend;
use crate::types::{
    ClassificationId, FeedbackId, FeedbackRecord, FeedbackType,
};
use crate::versioning::VersionManager;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Acknowledgement returned for a recorded feedback item
#[derive(Debug, Clone)]
pub struct FeedbackAck {
    pub feedback_id: FeedbackId,

    /// Position in the global feedback sequence
    pub seq: u64,

    /// Scenario accuracy after this feedback, when a scenario was matched
    pub scenario_accuracy: Option<f32>,

    /// Whether this feedback pushed the scenario into optimizer review
    pub flagged_for_review: bool,

    /// Whether this submission crossed the pattern-analysis boundary
    pub pattern_analysis_triggered: bool,

    /// Whether this submission crossed the deep-optimization boundary
    pub deep_optimization_triggered: bool,
}

/// Records feedback and drives the learning cadence
pub struct FeedbackRecorder {
    config: LearningConfig,
    storage: Arc<dyn StorageBackend>,
    versions: Arc<VersionManager>,
    library: Arc<LibraryState>,
    analyzer: Arc<PatternAnalyzer>,
    optimizer: Arc<DeepOptimizer>,
    counter: AtomicU64,
    pattern_triggers: AtomicU64,
    deep_triggers: AtomicU64,
}

impl FeedbackRecorder {
    pub fn new(
        config: LearningConfig,
        storage: Arc<dyn StorageBackend>,
        versions: Arc<VersionManager>,
        library: Arc<LibraryState>,
        analyzer: Arc<PatternAnalyzer>,
        optimizer: Arc<DeepOptimizer>,
    ) -> Self {
        Self {
            config,
            storage,
            versions,
            library,
            analyzer,
            optimizer,
            counter: AtomicU64::new(0),
            pattern_triggers: AtomicU64::new(0),
            deep_triggers: AtomicU64::new(0),
        }
    }

    /// Record one feedback item against an existing classification.
    ///
    /// The write itself is synchronous; any learning batch it triggers
    /// runs in the background.
    pub async fn submit(
        &self,
        classification_id: ClassificationId,
        feedback: FeedbackType,
        additional_context: BTreeMap<String, String>,
        user_id: &str,
    ) -> Result<FeedbackAck> {
        let record = self.storage.get_classification(classification_id).await?;

        if let FeedbackType::Edit { corrections } = &feedback {
            if corrections.is_empty() {
                return Err(ThemisError::Validation(
                    "Edit feedback must correct at least one dimension".to_string(),
                ));
            }
        }

        // Unique sequence number; batch boundaries derive from it
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        let feedback_record = FeedbackRecord {
            id: FeedbackId::new(),
            classification_id,
            feedback: feedback.clone(),
            additional_context,
            user_id: user_id.to_string(),
            seq,
            created_at: Utc::now(),
        };
        self.storage.put_feedback(&feedback_record).await?;
        debug!(
            "Recorded {:?} feedback {} (seq {}) for classification {}",
            feedback_kind(&feedback),
            feedback_record.id,
            seq,
            classification_id
        );

        // Accuracy update under the matched scenario's own lock
        let mut scenario_accuracy = None;
        let mut flagged = false;
        if let Some(scenario_id) = record.matched_scenario {
            let version = self.versions.current().await;
            if let Some(scenario) = version.snapshot.scenario(scenario_id) {
                let update = match &feedback {
                    FeedbackType::Accept => self.library.record_accept(scenario).await,
                    FeedbackType::Edit { corrections } => {
                        self.library
                            .record_edit(scenario, &corrections.corrected_dimensions())
                            .await
                    }
                    FeedbackType::Reject { .. } => self.library.record_reject(scenario).await,
                };
                scenario_accuracy = Some(update.accuracy_score);
                flagged = update.flagged_for_review;
            }
        }

        if matches!(feedback, FeedbackType::Reject { .. }) {
            self.storage
                .invalidate_classification(classification_id)
                .await?;
        }

        let pattern_triggered = seq % self.config.pattern_batch_size == 0;
        let deep_triggered = seq % self.config.deep_batch_size == 0;

        if pattern_triggered {
            self.pattern_triggers.fetch_add(1, Ordering::SeqCst);
            let analyzer = self.analyzer.clone();
            let from = seq + 1 - self.config.pattern_batch_size;
            let to = seq + 1;
            info!("Feedback seq {} triggers pattern analysis [{}, {})", seq, from, to);
            tokio::spawn(async move {
                if let Err(e) = analyzer.run(from, to).await {
                    error!("Pattern analysis failed: {}", e);
                }
            });
        }

        if deep_triggered {
            self.deep_triggers.fetch_add(1, Ordering::SeqCst);
            let optimizer = self.optimizer.clone();
            let from = seq + 1 - self.config.deep_batch_size;
            let to = seq + 1;
            info!("Feedback seq {} triggers deep optimization [{}, {})", seq, from, to);
            tokio::spawn(async move {
                if let Err(e) = optimizer.run(from, to).await {
                    error!("Deep optimization failed: {}", e);
                }
            });
        }

        Ok(FeedbackAck {
            feedback_id: feedback_record.id,
            seq,
            scenario_accuracy,
            flagged_for_review: flagged,
            pattern_analysis_triggered: pattern_triggered,
            deep_optimization_triggered: deep_triggered,
        })
    }

    /// Total feedback items recorded
    pub fn feedback_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Pattern-analysis batches triggered so far
    pub fn pattern_trigger_count(&self) -> u64 {
        self.pattern_triggers.load(Ordering::SeqCst)
    }

    /// Deep-optimization batches triggered so far
    pub fn deep_trigger_count(&self) -> u64 {
        self.deep_triggers.load(Ordering::SeqCst)
    }
}

fn feedback_kind(feedback: &FeedbackType) -> &'static str {
    match feedback {
        FeedbackType::Accept => "accept",
        FeedbackType::Edit { .. } => "edit",
        FeedbackType::Reject { .. } => "reject",
    }
}
