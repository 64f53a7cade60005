//! Deep Optimizer
//!
//! Second learning tier, run on every large feedback batch. Performs
//! three analyses and commits their combined outcome atomically as one
//! configuration version:
//!
//! (a) cross-scenario consistency — near-duplicate scenarios with
//!     divergent expectations are flagged in the change log;
//! (b) scenario evolution — merge near-duplicates that agree, split
//!     scenarios whose corrections cluster into distinct patterns,
//!     create scenarios from accumulated no-match candidates;
//! (c) rule consolidation — remove rules that never fired over the
//!     window, demote rules that did not reduce the correction rate.
//!
//! Runtime counters (usage, accuracy) are folded into the committed
//! snapshot, so every deep pass persists the library's live state.

use crate::config::LearningConfig;
use crate::error::Result;
use crate::learning::consistency::{jaccard, keywords, ConsistencyValidator};
use crate::library::LibraryState;
use crate::storage::StorageBackend;
use crate::types::{
    ClassificationRecord, Complexity, ConfigSnapshot, ExpectedClassification, FeedbackRecord,
    FeedbackType, RuleId, Scenario, ScenarioId, Size, WorkType,
};
use crate::versioning::{ChangeSet, VersionManager};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A NO_MATCH classification remembered as a new-scenario candidate
#[derive(Debug, Clone)]
pub struct NoMatchCandidate {
    pub description: String,
    pub size: Size,
    pub complexity: Complexity,
    pub work_type: WorkType,
}

/// Summary of one deep optimization run
#[derive(Debug, Clone, Default)]
pub struct OptimizationReport {
    pub feedback_processed: usize,
    pub near_duplicates_flagged: Vec<(ScenarioId, ScenarioId)>,
    pub scenarios_merged: Vec<(ScenarioId, ScenarioId)>,
    pub scenarios_split: Vec<ScenarioId>,
    pub scenarios_created: Vec<ScenarioId>,
    pub rules_removed: Vec<RuleId>,
    pub rules_demoted: Vec<RuleId>,
    pub committed_version: Option<u64>,
}

/// Cross-scenario optimization over large feedback batches
pub struct DeepOptimizer {
    config: LearningConfig,
    storage: Arc<dyn StorageBackend>,
    versions: Arc<VersionManager>,
    library: Arc<LibraryState>,
    optimization_lock: Arc<Mutex<()>>,
    no_match_pool: Arc<Mutex<Vec<NoMatchCandidate>>>,
    processed_through: Mutex<u64>,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
}

impl DeepOptimizer {
    pub fn new(
        config: LearningConfig,
        storage: Arc<dyn StorageBackend>,
        versions: Arc<VersionManager>,
        library: Arc<LibraryState>,
        optimization_lock: Arc<Mutex<()>>,
        no_match_pool: Arc<Mutex<Vec<NoMatchCandidate>>>,
    ) -> Self {
        Self {
            config,
            storage,
            versions,
            library,
            optimization_lock,
            no_match_pool,
            processed_through: Mutex::new(0),
            last_run_at: Mutex::new(None),
        }
    }

    /// Run the three analyses over the feedback batch [from_seq, to_seq).
    /// All changes land in one atomic configuration commit; a failed
    /// commit leaves the active configuration untouched.
    pub async fn run(&self, from_seq: u64, to_seq: u64) -> Result<OptimizationReport> {
        let _guard = self.optimization_lock.lock().await;

        {
            let mut cursor = self.processed_through.lock().await;
            if to_seq <= *cursor {
                debug!(
                    "Deep batch [{}, {}) already processed (cursor {})",
                    from_seq, to_seq, *cursor
                );
                return Ok(OptimizationReport::default());
            }
            *cursor = to_seq;
        }

        let batch = self.storage.list_feedback_range(from_seq, to_seq).await?;
        let mut pairs = Vec::with_capacity(batch.len());
        for feedback in batch {
            let record = self
                .storage
                .get_classification(feedback.classification_id)
                .await?;
            pairs.push((feedback, record));
        }
        info!(
            "Deep optimization over batch [{}, {}): {} feedback items",
            from_seq,
            to_seq,
            pairs.len()
        );

        let version = self.versions.current().await;
        let mut next = version.snapshot.clone();
        let mut change_log = Vec::new();
        let mut report = OptimizationReport {
            feedback_processed: pairs.len(),
            ..OptimizationReport::default()
        };

        // Fold live counters into the snapshot before structural work
        for scenario in next.scenarios.iter_mut() {
            let merged = self.library.overlay(scenario).await;
            scenario.usage_count = merged.usage_count;
            scenario.accuracy_score = merged.accuracy_score;
        }

        self.flag_near_duplicates(&next, &mut change_log, &mut report);
        self.merge_scenarios(&mut next, &pairs, &mut change_log, &mut report);
        self.split_scenarios(&mut next, &pairs, &mut change_log, &mut report);
        self.create_scenarios(&mut next, &mut change_log, &mut report)
            .await;
        self.consolidate_rules(&mut next, &pairs, &mut change_log, &mut report)
            .await;
        self.review_flagged(&pairs, &mut change_log).await;

        if change_log.is_empty() {
            debug!("Deep optimization produced no changes");
            return Ok(report);
        }

        let committed = self
            .versions
            .commit(ChangeSet {
                snapshot: next,
                change_log,
            })
            .await?;
        report.committed_version = Some(committed);
        *self.last_run_at.lock().await = Some(Utc::now());

        info!(
            "Deep optimization committed version {}: {} merged, {} split, {} created, {} rules removed",
            committed,
            report.scenarios_merged.len(),
            report.scenarios_split.len(),
            report.scenarios_created.len(),
            report.rules_removed.len()
        );
        Ok(report)
    }

    /// Queue a no-match classification as a new-scenario candidate
    pub async fn remember_no_match(&self, candidate: NoMatchCandidate) {
        self.no_match_pool.lock().await.push(candidate);
    }

    /// (a) Near-duplicate scenarios with divergent expectations are a
    /// library smell: flag them, never auto-repair.
    fn flag_near_duplicates(
        &self,
        snapshot: &ConfigSnapshot,
        change_log: &mut Vec<String>,
        report: &mut OptimizationReport,
    ) {
        let scenarios: Vec<&Scenario> = snapshot.active_scenarios().collect();
        for i in 0..scenarios.len() {
            for j in (i + 1)..scenarios.len() {
                let a = scenarios[i];
                let b = scenarios[j];
                if scenario_similarity(a, b) < self.config.scenario_similarity_threshold {
                    continue;
                }
                if a.expected != b.expected {
                    warn!(
                        "Near-duplicate scenarios with divergent expectations: {} vs {}",
                        a.id, b.id
                    );
                    change_log.push(format!(
                        "consistency: near-duplicates {} and {} expect different classifications",
                        a.id, b.id
                    ));
                    report.near_duplicates_flagged.push((a.id, b.id));
                }
            }
        }
    }

    /// (b1) Merge near-duplicate scenarios whose expectations agree,
    /// given enough shared feedback evidence. The higher-usage scenario
    /// survives; the other is soft-retired.
    fn merge_scenarios(
        &self,
        snapshot: &mut ConfigSnapshot,
        pairs: &[(FeedbackRecord, ClassificationRecord)],
        change_log: &mut Vec<String>,
        report: &mut OptimizationReport,
    ) {
        let mut feedback_per_scenario: HashMap<ScenarioId, usize> = HashMap::new();
        for (_, record) in pairs {
            if let Some(id) = record.matched_scenario {
                *feedback_per_scenario.entry(id).or_default() += 1;
            }
        }

        let candidates: Vec<(ScenarioId, ScenarioId)> = {
            let scenarios: Vec<&Scenario> = snapshot.active_scenarios().collect();
            let mut found = Vec::new();
            for i in 0..scenarios.len() {
                for j in (i + 1)..scenarios.len() {
                    let a = scenarios[i];
                    let b = scenarios[j];
                    if a.expected != b.expected {
                        continue;
                    }
                    if scenario_similarity(a, b) < self.config.scenario_similarity_threshold {
                        continue;
                    }
                    let shared = feedback_per_scenario.get(&a.id).copied().unwrap_or(0)
                        + feedback_per_scenario.get(&b.id).copied().unwrap_or(0);
                    if shared >= self.config.merge_min_shared_feedback {
                        found.push((a.id, b.id));
                    }
                }
            }
            found
        };

        let mut retired: HashSet<ScenarioId> = HashSet::new();
        for (a_id, b_id) in candidates {
            if retired.contains(&a_id) || retired.contains(&b_id) {
                continue;
            }
            let (a_usage, b_usage) = {
                let a = snapshot.scenario(a_id).expect("merge candidate exists");
                let b = snapshot.scenario(b_id).expect("merge candidate exists");
                (a.usage_count, b.usage_count)
            };
            // Higher usage wins; ties keep the lower id
            let (kept_id, gone_id) = if b_usage > a_usage {
                (b_id, a_id)
            } else {
                (a_id, b_id)
            };

            let (gone_examples, gone_context) = {
                let gone = snapshot
                    .scenarios
                    .iter_mut()
                    .find(|s| s.id == gone_id)
                    .expect("merge candidate exists");
                gone.retired = true;
                (gone.examples.clone(), gone.context_requirements.clone())
            };

            let kept = snapshot
                .scenarios
                .iter_mut()
                .find(|s| s.id == kept_id)
                .expect("merge candidate exists");
            for example in gone_examples {
                if !kept.examples.contains(&example) {
                    kept.examples.push(example);
                }
            }
            for (key, value) in gone_context {
                kept.context_requirements.entry(key).or_insert(value);
            }
            kept.version += 1;

            change_log.push(format!("evolution: merged scenario {} into {}", gone_id, kept_id));
            report.scenarios_merged.push((kept_id, gone_id));
            retired.insert(gone_id);
        }
    }

    /// (b2) Split a scenario whose corrections cluster into at least two
    /// distinct patterns, each covering enough of its feedback.
    fn split_scenarios(
        &self,
        snapshot: &mut ConfigSnapshot,
        pairs: &[(FeedbackRecord, ClassificationRecord)],
        change_log: &mut Vec<String>,
        report: &mut OptimizationReport,
    ) {
        // BTreeMap keeps the split order deterministic across runs
        let mut by_scenario: BTreeMap<ScenarioId, Vec<&(FeedbackRecord, ClassificationRecord)>> =
            BTreeMap::new();
        for pair in pairs {
            if let Some(id) = pair.1.matched_scenario {
                by_scenario.entry(id).or_default().push(pair);
            }
        }

        let mut created = Vec::new();
        for (scenario_id, scenario_pairs) in by_scenario {
            let total = scenario_pairs.len();
            if total < 2 {
                continue;
            }

            // Correction patterns: (dimension, corrected value) -> supporting records
            let mut patterns: BTreeMap<(String, String), Vec<&ClassificationRecord>> =
                BTreeMap::new();
            for (feedback, record) in &scenario_pairs {
                if let FeedbackType::Edit { corrections } = &feedback.feedback {
                    if let Some(size) = corrections.size {
                        patterns
                            .entry(("size".to_string(), size.as_str().to_string()))
                            .or_default()
                            .push(record);
                    }
                    if let Some(complexity) = corrections.complexity {
                        patterns
                            .entry(("complexity".to_string(), complexity.as_str().to_string()))
                            .or_default()
                            .push(record);
                    }
                    if let Some(work_type) = corrections.work_type {
                        patterns
                            .entry(("work_type".to_string(), work_type.as_str().to_string()))
                            .or_default()
                            .push(record);
                    }
                }
            }

            let strong: Vec<(&(String, String), &Vec<&ClassificationRecord>)> = patterns
                .iter()
                .filter(|(_, records)| {
                    records.len() as f32 / total as f32 > self.config.split_pattern_share
                })
                .collect();
            if strong.len() < 2 {
                continue;
            }

            let Some(base) = snapshot.scenario(scenario_id).cloned() else {
                continue;
            };

            for ((dimension, value), records) in &strong {
                let Some(expected) = corrected_expectation(&base.expected, dimension, value) else {
                    continue;
                };
                let mut split = Scenario::new(
                    format!("{} ({} {})", base.title, dimension, value),
                    base.domain.clone(),
                    expected,
                );
                split.context_requirements = base.context_requirements.clone();
                split.examples = records
                    .iter()
                    .map(|record| record.description.clone())
                    .take(10)
                    .collect();
                split.accuracy_score = self.config.initial_accuracy;

                change_log.push(format!(
                    "evolution: split scenario {} on {}={} into {}",
                    scenario_id, dimension, value, split.id
                ));
                report.scenarios_split.push(split.id);
                created.push(split);
            }

            if let Some(original) = snapshot.scenarios.iter_mut().find(|s| s.id == scenario_id) {
                original.version += 1;
            }
        }

        snapshot.scenarios.extend(created);
    }

    /// (b3) Accumulated no-match candidates with shared vocabulary become
    /// a new scenario; its expectation is the majority of the
    /// classifications the engine already produced for them.
    async fn create_scenarios(
        &self,
        snapshot: &mut ConfigSnapshot,
        change_log: &mut Vec<String>,
        report: &mut OptimizationReport,
    ) {
        let mut pool = self.no_match_pool.lock().await;
        if pool.len() < self.config.merge_min_shared_feedback {
            return;
        }

        // Cluster candidates by pairwise keyword overlap with the first
        // unclaimed candidate; greedy but deterministic over pool order.
        let mut claimed = vec![false; pool.len()];
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for i in 0..pool.len() {
            if claimed[i] {
                continue;
            }
            let seed = keywords(&pool[i].description);
            let mut cluster = vec![i];
            claimed[i] = true;
            for j in (i + 1)..pool.len() {
                if claimed[j] {
                    continue;
                }
                if jaccard(&seed, &keywords(&pool[j].description)) >= 0.3 {
                    cluster.push(j);
                    claimed[j] = true;
                }
            }
            clusters.push(cluster);
        }

        let mut consumed: HashSet<usize> = HashSet::new();
        for cluster in clusters {
            if cluster.len() < self.config.merge_min_shared_feedback {
                continue;
            }

            let members: Vec<&NoMatchCandidate> = cluster.iter().map(|&i| &pool[i]).collect();
            let size = majority_by(&members, |c| c.size);
            let complexity = majority_by(&members, |c| c.complexity);
            let work_type = majority_by(&members, |c| c.work_type);

            let mut shared_words: Vec<String> = members
                .iter()
                .map(|c| keywords(&c.description))
                .reduce(|acc, set| acc.intersection(&set).cloned().collect())
                .unwrap_or_default()
                .into_iter()
                .collect();
            shared_words.sort();
            let title = if shared_words.is_empty() {
                "Emerging Work Pattern".to_string()
            } else {
                format!("Emerging: {}", shared_words.join(" "))
            };

            let mut scenario = Scenario::new(
                title,
                "uncategorized",
                ExpectedClassification {
                    size,
                    complexity,
                    work_type,
                },
            );
            scenario.examples = members
                .iter()
                .map(|c| c.description.clone())
                .take(10)
                .collect();
            scenario.accuracy_score = self.config.initial_accuracy;

            change_log.push(format!(
                "evolution: created scenario {} from {} no-match candidates",
                scenario.id,
                members.len()
            ));
            report.scenarios_created.push(scenario.id);
            snapshot.scenarios.push(scenario);
            consumed.extend(cluster);
        }

        if !consumed.is_empty() {
            let mut index = 0usize;
            pool.retain(|_| {
                let keep = !consumed.contains(&index);
                index += 1;
                keep
            });
        }
    }

    /// (c) Remove rules that never fired over the window; demote rules
    /// whose presence did not reduce the correction rate.
    async fn consolidate_rules(
        &self,
        snapshot: &mut ConfigSnapshot,
        pairs: &[(FeedbackRecord, ClassificationRecord)],
        change_log: &mut Vec<String>,
        report: &mut OptimizationReport,
    ) {
        let window_start = *self.last_run_at.lock().await;

        // Correction rate with vs without each rule across the batch
        let corrected = |feedback: &FeedbackRecord| {
            matches!(
                feedback.feedback,
                FeedbackType::Edit { .. } | FeedbackType::Reject { .. }
            )
        };
        let overall_corrections = pairs.iter().filter(|(f, _)| corrected(f)).count();
        let overall_rate = if pairs.is_empty() {
            0.0
        } else {
            overall_corrections as f32 / pairs.len() as f32
        };

        let mut removed = Vec::new();
        let mut demoted = Vec::new();
        let mut kept_rules = Vec::with_capacity(snapshot.context_rules.len());

        for mut rule in snapshot.context_rules.drain(..) {
            let live_applied = self.library.rule_applied_count(rule.id).await;
            rule.applied_count = rule.applied_count.max(live_applied);

            // Zero applications across the rolling window: dead weight
            let in_window = window_start
                .map(|start| rule.created_at < start)
                .unwrap_or(false);
            if in_window && rule.applied_count == 0 {
                change_log.push(format!("consolidation: removed unused rule {}", rule.id));
                removed.push(rule.id);
                continue;
            }

            let with_rule: Vec<&(FeedbackRecord, ClassificationRecord)> = pairs
                .iter()
                .filter(|(_, record)| record.applied_rules.contains(&rule.id))
                .collect();
            if !with_rule.is_empty() {
                let with_corrections = with_rule.iter().filter(|(f, _)| corrected(f)).count();
                let with_rate = with_corrections as f32 / with_rule.len() as f32;
                if with_rate >= overall_rate && with_rate > 0.0 {
                    rule.confidence *= self.config.rule_demotion_factor;
                    if rule.confidence < self.config.auto_apply_confidence / 2.0 {
                        change_log.push(format!(
                            "consolidation: removed ineffective rule {} (confidence {:.2})",
                            rule.id, rule.confidence
                        ));
                        removed.push(rule.id);
                        continue;
                    }
                    change_log.push(format!(
                        "consolidation: demoted rule {} to confidence {:.2}",
                        rule.id, rule.confidence
                    ));
                    demoted.push(rule.id);
                }
            }

            kept_rules.push(rule);
        }

        snapshot.context_rules = kept_rules;
        report.rules_removed = removed;
        report.rules_demoted = demoted;
    }

    /// Scenarios flagged by repeated rejects get a review entry; the
    /// flag clears once the review is logged.
    async fn review_flagged(
        &self,
        pairs: &[(FeedbackRecord, ClassificationRecord)],
        change_log: &mut Vec<String>,
    ) {
        let history = match self.storage.list_classifications(usize::MAX).await {
            Ok(history) => history,
            Err(_) => Vec::new(),
        };

        for scenario_id in self.library.flagged_scenarios().await {
            let divergent = pairs
                .iter()
                .filter(|(_, record)| record.matched_scenario == Some(scenario_id))
                .filter(|(_, record)| {
                    !ConsistencyValidator::validate(record, &history).is_consistent()
                })
                .count();
            change_log.push(format!(
                "review: scenario {} accuracy below threshold ({} divergent classifications in batch)",
                scenario_id, divergent
            ));
            self.library.clear_review_flag(scenario_id).await;
        }
    }
}

/// Similarity between two scenarios: keyword Jaccard over title, domain,
/// and examples.
fn scenario_similarity(a: &Scenario, b: &Scenario) -> f32 {
    let text_a = format!("{} {} {}", a.title, a.domain, a.examples.join(" "));
    let text_b = format!("{} {} {}", b.title, b.domain, b.examples.join(" "));
    jaccard(&keywords(&text_a), &keywords(&text_b))
}

/// Apply a corrected value to one dimension of an expectation
fn corrected_expectation(
    base: &ExpectedClassification,
    dimension: &str,
    value: &str,
) -> Option<ExpectedClassification> {
    let mut expected = *base;
    match dimension {
        "size" => expected.size = value.parse().ok()?,
        "complexity" => expected.complexity = value.parse().ok()?,
        "work_type" => expected.work_type = value.parse().ok()?,
        _ => return None,
    }
    Some(expected)
}

/// Most common projected value; ties break toward the first seen for
/// determinism over stable pool order.
fn majority_by<T, C, F>(items: &[C], project: F) -> T
where
    T: Copy + Eq + std::hash::Hash,
    C: std::borrow::Borrow<NoMatchCandidate>,
    F: Fn(&NoMatchCandidate) -> T,
{
    let mut counts: Vec<(T, usize)> = Vec::new();
    for item in items {
        let value = project(item.borrow());
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(value, _)| value)
        .expect("majority_by requires a non-empty slice")
}
