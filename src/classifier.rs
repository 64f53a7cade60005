//! Classifier Orchestrator
//!
//! Drives the Oracle classification call and validates the result against
//! the matched scenario's expectation. The primary result is always
//! canonical: validation never replaces a value, it only penalizes
//! confidence (×0.7 beyond one enum step) and appends the disagreement to
//! the dimension's reasoning. Alignment with the scenario expectation is
//! scored 100/66/33/0, and any deviating dimension must carry non-empty
//! reasoning.

use crate::config::{ClassifierConfig, OracleConfig};
use crate::error::{Result, ThemisError};
use crate::oracle::{call_with_retry, OracleClassification, ReasoningOracle};
use crate::types::{ClassificationResult, DimensionResult, Scenario};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Alignment ladder: 3/2/1/0 matching dimensions
const ALIGNMENT_LADDER: [u8; 4] = [0, 33, 66, 100];

/// Orchestrates Oracle classification and scenario validation
pub struct ClassifierOrchestrator {
    config: ClassifierConfig,
    oracle_config: OracleConfig,
}

impl ClassifierOrchestrator {
    pub fn new(config: ClassifierConfig, oracle_config: OracleConfig) -> Self {
        Self {
            config,
            oracle_config,
        }
    }

    /// Reject malformed descriptions before any Oracle call
    pub fn validate_description(&self, description: &str) -> Result<()> {
        let length = description.chars().count();
        if length < self.config.min_description_len || length > self.config.max_description_len {
            return Err(ThemisError::Validation(format!(
                "Description length {} outside [{}, {}]",
                length, self.config.min_description_len, self.config.max_description_len
            )));
        }
        Ok(())
    }

    /// Run the primary classification and, when a scenario matched, the
    /// validation pass. Returns the (possibly penalized) result and the
    /// alignment score.
    pub async fn classify(
        &self,
        oracle: &dyn ReasoningOracle,
        description: &str,
        context: &BTreeMap<String, String>,
        scenario: Option<&Scenario>,
    ) -> Result<(ClassificationResult, Option<u8>)> {
        let primary = call_with_retry(&self.oracle_config, "classify", || {
            oracle.classify(description, context)
        })
        .await?;

        let mut result: ClassificationResult = primary.into();

        let alignment = match scenario {
            Some(scenario) => {
                if self.config.validation_pass {
                    self.apply_validation(&mut result, scenario);
                }
                let score = self.alignment_score(&result, scenario)?;
                Some(score)
            }
            None => None,
        };

        debug!(
            "Classified as {}/{}/{} (alignment {:?})",
            result.size.value, result.complexity.value, result.work_type.value, alignment
        );

        Ok((result, alignment))
    }

    /// Compare each dimension with the scenario expectation; penalize
    /// confidence when the disagreement exceeds one enum step.
    fn apply_validation(&self, result: &mut ClassificationResult, scenario: &Scenario) {
        let penalty = self.config.disagreement_penalty;
        let expected = &scenario.expected;

        let size_distance = result.size.value.step().abs_diff(expected.size.step());
        if size_distance > 1 {
            penalize(&mut result.size, penalty, &expected.size.to_string(), size_distance);
        }

        let complexity_distance = result
            .complexity
            .value
            .step()
            .abs_diff(expected.complexity.step());
        if complexity_distance > 1 {
            penalize(
                &mut result.complexity,
                penalty,
                &expected.complexity.to_string(),
                complexity_distance,
            );
        }

        // Work type is nominal: distinct values are one step apart, so the
        // beyond-one-step penalty never applies; deviation still needs
        // reasoning and costs alignment.
    }

    /// 100/66/33/0 for 3/2/1/0 dimensions matching the expectation.
    /// A deviating dimension with empty reasoning is an invariant
    /// violation and fails the classification.
    fn alignment_score(&self, result: &ClassificationResult, scenario: &Scenario) -> Result<u8> {
        let expected = &scenario.expected;

        check_deviation_reasoning(
            "size",
            result.size.value != expected.size,
            &result.size.reasoning,
        )?;
        check_deviation_reasoning(
            "complexity",
            result.complexity.value != expected.complexity,
            &result.complexity.reasoning,
        )?;
        check_deviation_reasoning(
            "work_type",
            result.work_type.value != expected.work_type,
            &result.work_type.reasoning,
        )?;

        let matching = result.matching_dimensions(expected);
        let score = ALIGNMENT_LADDER[matching];
        if matching < 3 {
            info!(
                "Classification deviates from scenario {} on {} dimension(s), alignment {}",
                scenario.id,
                3 - matching,
                score
            );
        }
        Ok(score)
    }
}

fn penalize<T: std::fmt::Display>(
    dimension: &mut DimensionResult<T>,
    penalty: f32,
    expected: &str,
    distance: usize,
) {
    dimension.confidence *= penalty;
    let note = format!(
        "Validation: disagrees with scenario expectation {} by {} steps",
        expected, distance
    );
    if dimension.reasoning.is_empty() {
        dimension.reasoning = note;
    } else {
        dimension.reasoning = format!("{}. {}", dimension.reasoning, note);
    }
}

fn check_deviation_reasoning(dimension: &str, deviates: bool, reasoning: &str) -> Result<()> {
    if deviates && reasoning.trim().is_empty() {
        return Err(ThemisError::InconsistentState(format!(
            "{} deviates from scenario expectation without reasoning",
            dimension
        )));
    }
    Ok(())
}

/// Convert a raw Oracle classification into a result without validation;
/// used when no scenario matched.
impl From<OracleClassification> for ClassificationResult {
    fn from(primary: OracleClassification) -> Self {
        Self {
            size: primary.size,
            complexity: primary.complexity,
            work_type: primary.work_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Complexity, ExpectedClassification, Size, WorkType};
    use async_trait::async_trait;

    /// Oracle stub returning one fixed classification
    struct FixedOracle {
        classification: OracleClassification,
    }

    #[async_trait]
    impl ReasoningOracle for FixedOracle {
        async fn score(&self, _description: &str, _scenario: &Scenario) -> Result<u8> {
            Ok(0)
        }

        async fn classify(
            &self,
            _description: &str,
            _context: &BTreeMap<String, String>,
        ) -> Result<OracleClassification> {
            Ok(self.classification.clone())
        }

        async fn analyze(&self, _payload: serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn dimension<T>(value: T, reasoning: &str) -> DimensionResult<T> {
        DimensionResult {
            value,
            confidence: 0.9,
            reasoning: reasoning.to_string(),
        }
    }

    fn oauth_scenario() -> Scenario {
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

    fn orchestrator() -> ClassifierOrchestrator {
        let config = crate::config::ThemisConfig::default();
        ClassifierOrchestrator::new(config.classifier, config.oracle)
    }

    const DESCRIPTION: &str =
        "Integrate Google OAuth authentication into our web app with profile sync";

    #[test]
    fn test_description_length_validation() {
        let orchestrator = orchestrator();
        assert!(orchestrator.validate_description("too short").is_err());
        assert!(orchestrator
            .validate_description(&"x".repeat(5001))
            .is_err());
        assert!(orchestrator.validate_description(DESCRIPTION).is_ok());
    }

    #[tokio::test]
    async fn test_full_agreement_scores_100() {
        let oracle = FixedOracle {
            classification: OracleClassification {
                size: dimension(Size::L, "multi-week"),
                complexity: dimension(Complexity::Medium, "known flows"),
                work_type: dimension(WorkType::Feature, "new capability"),
            },
        };
        let scenario = oauth_scenario();

        let (_, alignment) = orchestrator()
            .classify(&oracle, DESCRIPTION, &BTreeMap::new(), Some(&scenario))
            .await
            .unwrap();

        assert_eq!(alignment, Some(100));
    }

    #[tokio::test]
    async fn test_one_deviation_scores_66_with_reasoning() {
        let oracle = FixedOracle {
            classification: OracleClassification {
                size: dimension(Size::L, "multi-week"),
                complexity: dimension(Complexity::High, "token refresh edge cases"),
                work_type: dimension(WorkType::Feature, "new capability"),
            },
        };
        let scenario = oauth_scenario();

        let (result, alignment) = orchestrator()
            .classify(&oracle, DESCRIPTION, &BTreeMap::new(), Some(&scenario))
            .await
            .unwrap();

        assert_eq!(alignment, Some(66));
        assert!(!result.complexity.reasoning.is_empty());
        // One step off: no penalty
        assert!((result.complexity.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_large_disagreement_penalizes_confidence() {
        let oracle = FixedOracle {
            classification: OracleClassification {
                size: dimension(Size::L, "multi-week"),
                complexity: dimension(Complexity::Critical, "regulatory deadline"),
                work_type: dimension(WorkType::Feature, "new capability"),
            },
        };
        let scenario = oauth_scenario(); // expects Medium: 2 steps away

        let (result, alignment) = orchestrator()
            .classify(&oracle, DESCRIPTION, &BTreeMap::new(), Some(&scenario))
            .await
            .unwrap();

        assert_eq!(alignment, Some(66));
        // Primary value is canonical, never discarded
        assert_eq!(result.complexity.value, Complexity::Critical);
        assert!((result.complexity.confidence - 0.9 * 0.7).abs() < 1e-6);
        assert!(result.complexity.reasoning.contains("disagrees"));
    }

    #[tokio::test]
    async fn test_deviation_without_reasoning_is_rejected() {
        let oracle = FixedOracle {
            classification: OracleClassification {
                size: dimension(Size::M, ""),
                complexity: dimension(Complexity::Medium, "known flows"),
                work_type: dimension(WorkType::Feature, "new capability"),
            },
        };
        let scenario = oauth_scenario();

        let result = orchestrator()
            .classify(&oracle, DESCRIPTION, &BTreeMap::new(), Some(&scenario))
            .await;

        assert!(matches!(result, Err(ThemisError::InconsistentState(_))));
    }

    #[tokio::test]
    async fn test_no_scenario_means_no_alignment() {
        let oracle = FixedOracle {
            classification: OracleClassification {
                size: dimension(Size::S, "small fix"),
                complexity: dimension(Complexity::Low, "isolated"),
                work_type: dimension(WorkType::Bug, "defect"),
            },
        };

        let (_, alignment) = orchestrator()
            .classify(&oracle, DESCRIPTION, &BTreeMap::new(), None)
            .await
            .unwrap();

        assert_eq!(alignment, None);
    }

    #[tokio::test]
    async fn test_total_disagreement_scores_0() {
        let oracle = FixedOracle {
            classification: OracleClassification {
                size: dimension(Size::Xs, "trivial"),
                complexity: dimension(Complexity::Low, "no edge cases"),
                work_type: dimension(WorkType::Bug, "defect"),
            },
        };
        let scenario = oauth_scenario();

        let (result, alignment) = orchestrator()
            .classify(&oracle, DESCRIPTION, &BTreeMap::new(), Some(&scenario))
            .await
            .unwrap();

        assert_eq!(alignment, Some(0));
        // XS is 3 steps from L: penalized
        assert!((result.size.confidence - 0.9 * 0.7).abs() < 1e-6);
    }
}
