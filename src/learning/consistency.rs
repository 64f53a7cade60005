//! Consistency Validator
//!
//! Compares a classification against historically similar ones. Both
//! learning tiers use it: the Pattern Analyzer to weigh proposed rules
//! against precedent, the Deep Optimizer to sanity-check scenario
//! evolution. Similarity is keyword Jaccard overlap over descriptions,
//! so the check is deterministic and Oracle-free.

use crate::types::{ClassificationRecord, Dimension};
use std::collections::{HashMap, HashSet};

/// Words too common to signal similarity
const STOPWORDS: [&str; 12] = [
    "the", "and", "for", "with", "into", "from", "this", "that", "our", "all", "add", "new",
];

/// Minimum Jaccard overlap for two descriptions to count as neighbors
const NEIGHBOR_THRESHOLD: f32 = 0.3;

/// Result of checking one classification against its historical neighbors
#[derive(Debug, Clone)]
pub struct ConsistencyReport {
    /// Historical records similar enough to compare against
    pub neighbor_count: usize,

    /// Dimensions where the record disagrees with the neighbor majority
    pub divergent_dimensions: Vec<Dimension>,

    /// Fraction of dimension comparisons agreeing with the majority
    /// (1.0 when there are no neighbors to compare against)
    pub consistency_ratio: f32,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.divergent_dimensions.is_empty()
    }
}

/// Keyword set for a description: lowercased words longer than three
/// characters, minus stopwords.
pub fn keywords(description: &str) -> HashSet<String> {
    description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 3 && !STOPWORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity between two keyword sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// Validates classifications against historical precedent
pub struct ConsistencyValidator;

impl ConsistencyValidator {
    /// Compare `record` against its nearest neighbors in `history`.
    pub fn validate(
        record: &ClassificationRecord,
        history: &[ClassificationRecord],
    ) -> ConsistencyReport {
        let record_keywords = keywords(&record.description);

        let neighbors: Vec<&ClassificationRecord> = history
            .iter()
            .filter(|past| past.id != record.id && !past.invalidated)
            .filter(|past| jaccard(&record_keywords, &keywords(&past.description)) >= NEIGHBOR_THRESHOLD)
            .collect();

        if neighbors.is_empty() {
            return ConsistencyReport {
                neighbor_count: 0,
                divergent_dimensions: Vec::new(),
                consistency_ratio: 1.0,
            };
        }

        let mut divergent = Vec::new();
        let mut agreements = 0usize;

        let size_majority = majority(neighbors.iter().map(|n| n.result.size.value.as_str()));
        if size_majority == Some(record.result.size.value.as_str()) {
            agreements += 1;
        } else if size_majority.is_some() {
            divergent.push(Dimension::Size);
        }

        let complexity_majority =
            majority(neighbors.iter().map(|n| n.result.complexity.value.as_str()));
        if complexity_majority == Some(record.result.complexity.value.as_str()) {
            agreements += 1;
        } else if complexity_majority.is_some() {
            divergent.push(Dimension::Complexity);
        }

        let type_majority = majority(neighbors.iter().map(|n| n.result.work_type.value.as_str()));
        if type_majority == Some(record.result.work_type.value.as_str()) {
            agreements += 1;
        } else if type_majority.is_some() {
            divergent.push(Dimension::WorkType);
        }

        ConsistencyReport {
            neighbor_count: neighbors.len(),
            divergent_dimensions: divergent,
            consistency_ratio: agreements as f32 / Dimension::ALL.len() as f32,
        }
    }
}

/// Most common value in the iterator; ties break toward the
/// lexicographically smallest value for determinism.
fn majority<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ClassificationId, ClassificationResult, Complexity, DimensionResult, Size, WorkType,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(description: &str, size: Size) -> ClassificationRecord {
        ClassificationRecord {
            id: ClassificationId::new(),
            description: description.to_string(),
            input_context: BTreeMap::new(),
            matched_scenario: None,
            alternatives: vec![],
            enhanced_context: BTreeMap::new(),
            applied_rules: vec![],
            result: ClassificationResult {
                size: DimensionResult {
                    value: size,
                    confidence: 0.9,
                    reasoning: "sized".to_string(),
                },
                complexity: DimensionResult {
                    value: Complexity::Medium,
                    confidence: 0.9,
                    reasoning: "standard".to_string(),
                },
                work_type: DimensionResult {
                    value: WorkType::Feature,
                    confidence: 0.9,
                    reasoning: "new capability".to_string(),
                },
            },
            alignment_score: None,
            invalidated: false,
            config_version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_keywords_filters_short_and_stop_words() {
        let extracted = keywords("Add the new OAuth provider integration");
        assert!(extracted.contains("oauth"));
        assert!(extracted.contains("provider"));
        assert!(extracted.contains("integration"));
        assert!(!extracted.contains("the"));
        assert!(!extracted.contains("add"));
    }

    #[test]
    fn test_jaccard_bounds() {
        let a = keywords("oauth provider integration");
        let b = keywords("oauth provider integration");
        let c = keywords("kafka billing pipeline");
        assert!((jaccard(&a, &b) - 1.0).abs() < f32::EPSILON);
        assert_eq!(jaccard(&a, &c), 0.0);
    }

    #[test]
    fn test_no_neighbors_is_consistent() {
        let record = record("Integrate Google OAuth authentication provider", Size::L);
        let history = vec![record.clone(), self::record("Kafka billing rewrite", Size::S)];

        let report = ConsistencyValidator::validate(&record, &history);
        assert_eq!(report.neighbor_count, 0);
        assert!(report.is_consistent());
        assert_eq!(report.consistency_ratio, 1.0);
    }

    #[test]
    fn test_divergence_from_neighbor_majority() {
        let subject = record("Integrate Google OAuth authentication provider sync", Size::Xs);
        let history = vec![
            record("Integrate GitHub OAuth authentication provider sync", Size::L),
            record("Integrate Microsoft OAuth authentication provider sync", Size::L),
            record("Integrate Apple OAuth authentication provider sync", Size::L),
        ];

        let report = ConsistencyValidator::validate(&subject, &history);
        assert_eq!(report.neighbor_count, 3);
        assert_eq!(report.divergent_dimensions, vec![Dimension::Size]);
        assert!(report.consistency_ratio < 1.0);
    }

    #[test]
    fn test_invalidated_history_is_ignored() {
        let subject = record("Integrate Google OAuth authentication provider sync", Size::L);
        let mut rejected = record("Integrate GitHub OAuth authentication provider sync", Size::Xs);
        rejected.invalidated = true;

        let report = ConsistencyValidator::validate(&subject, &[rejected]);
        assert_eq!(report.neighbor_count, 0);
    }
}
