//! Pattern Analyzer
//!
//! First learning tier. Runs on every full batch of feedback items,
//! groups the batch by matched scenario (keyword cluster for unmatched
//! records), and turns systematic corrections into context rule
//! proposals. A proposal auto-applies when its confidence clears the
//! threshold and it does not contradict an existing rule with the same
//! trigger; otherwise it joins the manual review queue.
//!
//! Runs are idempotent for a fixed batch: a cursor tracks the highest
//! processed sequence number, and the whole run executes under the
//! shared optimization lock.

use crate::config::LearningConfig;
use crate::error::Result;
use crate::learning::consistency::{keywords, ConsistencyValidator};
use crate::storage::StorageBackend;
use crate::types::{
    ClassificationRecord, ConfigSnapshot, ContextRule, Dimension, FeedbackRecord, FeedbackType,
    RuleId, RuleSource, TriggerCondition,
};
use crate::versioning::{ChangeSet, VersionManager};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Summary of one analyzer run
#[derive(Debug, Clone, Default)]
pub struct PatternReport {
    /// Feedback items examined
    pub feedback_processed: usize,

    /// Rules committed to the active configuration
    pub rules_applied: Vec<RuleId>,

    /// Rules parked for manual review
    pub rules_queued: Vec<RuleId>,

    /// Scenarios that gained examples
    pub scenarios_enriched: usize,

    /// Version committed by this run, if anything changed
    pub committed_version: Option<u64>,
}

/// One correction cluster: feedback grouped by scenario or keyword
struct Cluster {
    label: String,
    records: Vec<(FeedbackRecord, ClassificationRecord)>,
}

/// Detects correction patterns in feedback batches
pub struct PatternAnalyzer {
    config: LearningConfig,
    storage: Arc<dyn StorageBackend>,
    versions: Arc<VersionManager>,
    optimization_lock: Arc<Mutex<()>>,
    review_queue: Arc<Mutex<Vec<ContextRule>>>,
    processed_through: Mutex<u64>,
}

impl PatternAnalyzer {
    pub fn new(
        config: LearningConfig,
        storage: Arc<dyn StorageBackend>,
        versions: Arc<VersionManager>,
        optimization_lock: Arc<Mutex<()>>,
        review_queue: Arc<Mutex<Vec<ContextRule>>>,
    ) -> Self {
        Self {
            config,
            storage,
            versions,
            optimization_lock,
            review_queue,
            processed_through: Mutex::new(0),
        }
    }

    /// Analyze the feedback batch with `seq` in [from_seq, to_seq).
    ///
    /// Re-running an already-processed batch is a no-op, so duplicate
    /// triggers cannot double-apply rules.
    pub async fn run(&self, from_seq: u64, to_seq: u64) -> Result<PatternReport> {
        let _guard = self.optimization_lock.lock().await;

        {
            let mut cursor = self.processed_through.lock().await;
            if to_seq <= *cursor {
                debug!(
                    "Pattern batch [{}, {}) already processed (cursor {})",
                    from_seq, to_seq, *cursor
                );
                return Ok(PatternReport::default());
            }
            *cursor = to_seq;
        }

        let batch = self.storage.list_feedback_range(from_seq, to_seq).await?;
        info!(
            "Pattern analysis over batch [{}, {}): {} feedback items",
            from_seq,
            to_seq,
            batch.len()
        );

        let mut pairs = Vec::with_capacity(batch.len());
        for feedback in batch {
            let record = self
                .storage
                .get_classification(feedback.classification_id)
                .await?;
            pairs.push((feedback, record));
        }

        let history = self.storage.list_classifications(usize::MAX).await?;
        let version = self.versions.current().await;
        let snapshot = &version.snapshot;

        let clusters = cluster(pairs);
        let mut report = PatternReport {
            feedback_processed: clusters.iter().map(|c| c.records.len()).sum(),
            ..PatternReport::default()
        };

        let mut next_snapshot = snapshot.clone();
        let mut change_log = Vec::new();

        for cluster in &clusters {
            for dimension in Dimension::ALL {
                if let Some(mut proposal) = self.propose_rule(cluster, dimension, &history) {
                    // Never auto-apply against an active contradictory rule,
                    // including ones added earlier in this run
                    if next_snapshot
                        .context_rules
                        .iter()
                        .any(|existing| existing.contradicts(&proposal))
                    {
                        proposal.confidence = proposal
                            .confidence
                            .min(self.config.auto_apply_confidence - 0.01);
                    }

                    if proposal.confidence >= self.config.auto_apply_confidence {
                        change_log.push(format!(
                            "pattern analysis: add rule {} for cluster {} ({} corrections)",
                            proposal.id, cluster.label, dimension
                        ));
                        report.rules_applied.push(proposal.id);
                        next_snapshot.context_rules.push(proposal);
                    } else {
                        debug!(
                            "Rule proposal for cluster {} below auto-apply confidence ({:.2}), queueing",
                            cluster.label, proposal.confidence
                        );
                        report.rules_queued.push(proposal.id);
                        self.review_queue.lock().await.push(proposal);
                    }
                }
            }

            // Accepted classifications become scenario examples
            let enriched = enrich_examples(&mut next_snapshot, cluster);
            if enriched {
                report.scenarios_enriched += 1;
                change_log.push(format!("pattern analysis: examples added to {}", cluster.label));
            }
        }

        if !change_log.is_empty() {
            let committed = self
                .versions
                .commit(ChangeSet {
                    snapshot: next_snapshot,
                    change_log,
                })
                .await?;
            report.committed_version = Some(committed);
            info!(
                "Pattern analysis committed version {} ({} rules applied, {} queued)",
                committed,
                report.rules_applied.len(),
                report.rules_queued.len()
            );
        }

        Ok(report)
    }

    /// Build a rule proposal for one dimension of one cluster, if the
    /// correction rate clears the threshold.
    fn propose_rule(
        &self,
        cluster: &Cluster,
        dimension: Dimension,
        history: &[ClassificationRecord],
    ) -> Option<ContextRule> {
        let total = cluster.records.len();
        if total == 0 {
            return None;
        }

        // Corrected values on this dimension across the cluster
        let mut corrected_values: Vec<String> = Vec::new();
        for (feedback, _) in &cluster.records {
            if let FeedbackType::Edit { corrections } = &feedback.feedback {
                let value = match dimension {
                    Dimension::Size => corrections.size.map(|v| v.as_str().to_string()),
                    Dimension::Complexity => corrections.complexity.map(|v| v.as_str().to_string()),
                    Dimension::WorkType => corrections.work_type.map(|v| v.as_str().to_string()),
                };
                if let Some(value) = value {
                    corrected_values.push(value);
                }
            }
        }

        let correction_rate = corrected_values.len() as f32 / total as f32;
        if correction_rate <= self.config.correction_rate_threshold {
            return None;
        }

        // The systematic correction and how consistently the cluster agrees
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in &corrected_values {
            *counts.entry(value.as_str()).or_default() += 1;
        }
        let (systematic, count) = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))?;
        let confidence = count as f32 / corrected_values.len() as f32;

        // Corrections overturning historically consistent classifications
        // are worth surfacing; they still apply on their own merits.
        let overturned = cluster
            .records
            .iter()
            .filter(|(_, record)| ConsistencyValidator::validate(record, history).is_consistent())
            .count();
        if overturned * 2 > total {
            info!(
                "Cluster {} correction on {} overturns consistent precedent ({}/{} records)",
                cluster.label, dimension, overturned, total
            );
        }

        let trigger_keywords = common_keywords(cluster);
        if trigger_keywords.is_empty() {
            return None;
        }

        let trigger = TriggerCondition::KeywordContains {
            keywords: trigger_keywords,
            match_all: true,
        };
        let mut additions = BTreeMap::new();
        additions.insert(
            format!("{}_hint", dimension),
            systematic.to_lowercase(),
        );

        let mut rule = ContextRule::new(trigger, additions);
        rule.confidence = confidence.clamp(0.0, 1.0);
        rule.source = RuleSource::PatternAnalysis;
        Some(rule)
    }
}

/// Group feedback/classification pairs by matched scenario, falling back
/// to the lexicographically first keyword for unmatched records.
fn cluster(pairs: Vec<(FeedbackRecord, ClassificationRecord)>) -> Vec<Cluster> {
    let mut grouped: BTreeMap<String, Vec<(FeedbackRecord, ClassificationRecord)>> =
        BTreeMap::new();
    for (feedback, record) in pairs {
        let label = match record.matched_scenario {
            Some(scenario_id) => format!("scenario:{}", scenario_id),
            None => {
                let mut words: Vec<String> = keywords(&record.description).into_iter().collect();
                words.sort();
                match words.first() {
                    Some(word) => format!("keyword:{}", word),
                    None => "keyword:unclassified".to_string(),
                }
            }
        };
        grouped.entry(label).or_default().push((feedback, record));
    }

    grouped
        .into_iter()
        .map(|(label, records)| Cluster { label, records })
        .collect()
}

/// Keywords shared by at least half the cluster's descriptions, capped at
/// three for trigger readability.
fn common_keywords(cluster: &Cluster) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for (_, record) in &cluster.records {
        for word in keywords(&record.description) {
            *counts.entry(word).or_default() += 1;
        }
    }
    let threshold = cluster.records.len().div_ceil(2);
    let mut shared: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    shared.into_iter().take(3).map(|(word, _)| word).collect()
}

/// Append accepted descriptions to their scenario's examples (deduped,
/// capped at ten per scenario).
fn enrich_examples(snapshot: &mut ConfigSnapshot, cluster: &Cluster) -> bool {
    const MAX_EXAMPLES: usize = 10;
    let mut changed = false;

    for (feedback, record) in &cluster.records {
        if !matches!(feedback.feedback, FeedbackType::Accept) {
            continue;
        }
        let Some(scenario_id) = record.matched_scenario else {
            continue;
        };
        let Some(scenario) = snapshot
            .scenarios
            .iter_mut()
            .find(|s| s.id == scenario_id && !s.retired)
        else {
            continue;
        };
        if scenario.examples.len() < MAX_EXAMPLES
            && !scenario.examples.contains(&record.description)
        {
            scenario.examples.push(record.description.clone());
            changed = true;
        }
    }

    changed
}
