//! Scenario Matcher
//!
//! Scores a work item description against every active scenario in the
//! library via the Reasoning Oracle and buckets the best score:
//! MATCHED at or above the match threshold, AMBIGUOUS in the band below
//! it, NO_MATCH under the floor. Ties break deterministically toward the
//! lowest scenario id. An empty library is always NO_MATCH and costs no
//! Oracle call.

use crate::config::{MatcherConfig, OracleConfig};
use crate::error::Result;
use crate::oracle::{call_with_retry, ReasoningOracle};
use crate::types::{ConfigSnapshot, MatchOutcome, Scenario, ScenarioId};
use tracing::{debug, info};

/// Matches descriptions against the scenario library
pub struct ScenarioMatcher {
    config: MatcherConfig,
    oracle_config: OracleConfig,
}

impl ScenarioMatcher {
    pub fn new(config: MatcherConfig, oracle_config: OracleConfig) -> Self {
        Self {
            config,
            oracle_config,
        }
    }

    /// Score `description` against every active scenario and classify the
    /// best score into a match outcome.
    pub async fn match_description(
        &self,
        oracle: &dyn ReasoningOracle,
        description: &str,
        snapshot: &ConfigSnapshot,
    ) -> Result<MatchOutcome> {
        let scenarios: Vec<&Scenario> = snapshot.active_scenarios().collect();
        if scenarios.is_empty() {
            debug!("Scenario library is empty, returning NO_MATCH");
            return Ok(MatchOutcome::NoMatch { best_score: None });
        }

        let mut scored: Vec<(ScenarioId, u8)> = Vec::with_capacity(scenarios.len());
        for scenario in &scenarios {
            let score = call_with_retry(&self.oracle_config, "score", || {
                oracle.score(description, scenario)
            })
            .await?;
            scored.push((scenario.id, score));
        }

        // Highest score first; equal scores break toward the lowest id
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let (best_id, best_score) = scored[0];
        debug!(
            "Best scenario {} scored {} across {} candidates",
            best_id,
            best_score,
            scored.len()
        );

        if best_score >= self.config.match_threshold {
            info!("Description matched scenario {} (score {})", best_id, best_score);
            return Ok(MatchOutcome::Matched {
                scenario_id: best_id,
                score: best_score,
            });
        }

        if best_score >= self.config.ambiguous_threshold {
            let candidates: Vec<(ScenarioId, u8)> = scored
                .into_iter()
                .take(self.config.ambiguous_top_k)
                .collect();
            info!(
                "Ambiguous match: best score {} below threshold {}, returning {} alternatives",
                best_score,
                self.config.match_threshold,
                candidates.len()
            );
            return Ok(MatchOutcome::Ambiguous { candidates });
        }

        info!(
            "No scenario scored above {}: new-scenario candidate (best {})",
            self.config.ambiguous_threshold, best_score
        );
        Ok(MatchOutcome::NoMatch {
            best_score: Some(best_score),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThemisError;
    use crate::oracle::OracleClassification;
    use crate::types::{Complexity, ExpectedClassification, Size, WorkType};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};

    /// Oracle stub with a fixed score per scenario title
    struct ScriptedOracle {
        scores: HashMap<String, u8>,
    }

    #[async_trait]
    impl ReasoningOracle for ScriptedOracle {
        async fn score(&self, _description: &str, scenario: &Scenario) -> Result<u8> {
            self.scores
                .get(&scenario.title)
                .copied()
                .ok_or_else(|| ThemisError::Other(format!("no score for {}", scenario.title)))
        }

        async fn classify(
            &self,
            _description: &str,
            _context: &BTreeMap<String, String>,
        ) -> Result<OracleClassification> {
            unimplemented!("matcher tests never classify")
        }

        async fn analyze(&self, _payload: serde_json::Value) -> Result<serde_json::Value> {
            unimplemented!("matcher tests never analyze")
        }
    }

    fn scenario(title: &str) -> Scenario {
        Scenario::new(
            title,
            "authentication",
            ExpectedClassification {
                size: Size::L,
                complexity: Complexity::Medium,
                work_type: WorkType::Feature,
            },
        )
    }

    fn matcher() -> ScenarioMatcher {
        let config = crate::config::ThemisConfig::default();
        ScenarioMatcher::new(config.matcher, config.oracle)
    }

    fn snapshot(scenarios: Vec<Scenario>) -> ConfigSnapshot {
        ConfigSnapshot {
            scenarios,
            context_rules: vec![],
            prompt_templates: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_library_is_no_match() {
        let outcome = matcher()
            .match_description(
                &ScriptedOracle {
                    scores: HashMap::new(),
                },
                "Integrate Google OAuth authentication",
                &snapshot(vec![]),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, MatchOutcome::NoMatch { best_score: None }));
    }

    #[tokio::test]
    async fn test_score_above_threshold_matches() {
        let single = scenario("OAuth Integration (Single Provider)");
        let single_id = single.id;
        let oracle = ScriptedOracle {
            scores: HashMap::from([("OAuth Integration (Single Provider)".to_string(), 91)]),
        };

        let outcome = matcher()
            .match_description(
                &oracle,
                "Integrate Google OAuth authentication into our web app with profile sync",
                &snapshot(vec![single]),
            )
            .await
            .unwrap();

        match outcome {
            MatchOutcome::Matched { scenario_id, score } => {
                assert_eq!(scenario_id, single_id);
                assert_eq!(score, 91);
            }
            other => panic!("Expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ambiguous_band_returns_alternatives_in_order() {
        let a = scenario("OAuth Integration (Single Provider)");
        let b = scenario("Multi-Provider OAuth");
        let c = scenario("SAML SSO Integration");
        let oracle = ScriptedOracle {
            scores: HashMap::from([
                ("OAuth Integration (Single Provider)".to_string(), 74),
                ("Multi-Provider OAuth".to_string(), 82),
                ("SAML SSO Integration".to_string(), 40),
            ]),
        };

        let outcome = matcher()
            .match_description(
                &oracle,
                "Add Google, GitHub and Microsoft OAuth login",
                &snapshot(vec![a.clone(), b.clone(), c]),
            )
            .await
            .unwrap();

        match outcome {
            MatchOutcome::Ambiguous { candidates } => {
                assert_eq!(candidates[0].0, b.id);
                assert_eq!(candidates[0].1, 82);
                assert_eq!(candidates[1].0, a.id);
            }
            other => panic!("Expected ambiguous, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_below_floor_is_new_scenario_candidate() {
        let a = scenario("OAuth Integration (Single Provider)");
        let oracle = ScriptedOracle {
            scores: HashMap::from([("OAuth Integration (Single Provider)".to_string(), 12)]),
        };

        let outcome = matcher()
            .match_description(&oracle, "Rewrite billing pipeline in Kafka", &snapshot(vec![a]))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            MatchOutcome::NoMatch {
                best_score: Some(12)
            }
        ));
    }

    #[tokio::test]
    async fn test_tie_breaks_toward_lowest_id() {
        let a = scenario("Scenario A");
        let b = scenario("Scenario B");
        let lowest = a.id.min(b.id);
        let oracle = ScriptedOracle {
            scores: HashMap::from([
                ("Scenario A".to_string(), 90),
                ("Scenario B".to_string(), 90),
            ]),
        };

        let outcome = matcher()
            .match_description(&oracle, "Ambidextrous work item", &snapshot(vec![a, b]))
            .await
            .unwrap();

        match outcome {
            MatchOutcome::Matched { scenario_id, .. } => assert_eq!(scenario_id, lowest),
            other => panic!("Expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retired_scenarios_are_skipped() {
        let mut retired = scenario("Retired");
        retired.retired = true;
        let oracle = ScriptedOracle {
            scores: HashMap::from([("Retired".to_string(), 99)]),
        };

        let outcome = matcher()
            .match_description(&oracle, "Anything at all really", &snapshot(vec![retired]))
            .await
            .unwrap();

        assert!(matches!(outcome, MatchOutcome::NoMatch { best_score: None }));
    }
}
