//! Shared test fixtures: scripted Oracle stubs and scenario builders.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use themis_core::oracle::{OracleClassification, ReasoningOracle};
use themis_core::types::DimensionResult;
use themis_core::{
    Complexity, ExpectedClassification, Result, Scenario, Size, ThemisConfig, ThemisError,
    WorkType,
};

/// Oracle stub with scripted similarity scores (keyed by scenario title)
/// and a fixed classification result.
pub struct StubOracle {
    scores: HashMap<String, u8>,
    classification: Mutex<OracleClassification>,
    fail_transiently: bool,
}

impl StubOracle {
    pub fn new(classification: OracleClassification) -> Self {
        Self {
            scores: HashMap::new(),
            classification: Mutex::new(classification),
            fail_transiently: false,
        }
    }

    /// Stub whose every call fails like an unreachable service
    pub fn unavailable() -> Self {
        Self {
            scores: HashMap::new(),
            classification: Mutex::new(classification(
                Size::M,
                Complexity::Medium,
                WorkType::Feature,
            )),
            fail_transiently: true,
        }
    }

    pub fn with_score(mut self, scenario_title: &str, score: u8) -> Self {
        self.scores.insert(scenario_title.to_string(), score);
        self
    }

    /// Change the classification returned by subsequent calls
    pub fn set_classification(&self, next: OracleClassification) {
        *self.classification.lock().unwrap() = next;
    }
}

#[async_trait]
impl ReasoningOracle for StubOracle {
    async fn score(&self, _description: &str, scenario: &Scenario) -> Result<u8> {
        if self.fail_transiently {
            return Err(ThemisError::OracleUnavailable {
                attempts: 1,
                message: "connection refused".to_string(),
            });
        }
        Ok(self.scores.get(&scenario.title).copied().unwrap_or(0))
    }

    async fn classify(
        &self,
        _description: &str,
        _context: &BTreeMap<String, String>,
    ) -> Result<OracleClassification> {
        if self.fail_transiently {
            return Err(ThemisError::OracleUnavailable {
                attempts: 1,
                message: "connection refused".to_string(),
            });
        }
        Ok(self.classification.lock().unwrap().clone())
    }

    async fn analyze(&self, _payload: serde_json::Value) -> Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

/// Build a full classification with per-dimension reasoning
pub fn classification(size: Size, complexity: Complexity, work_type: WorkType) -> OracleClassification {
    OracleClassification {
        size: DimensionResult {
            value: size,
            confidence: 0.9,
            reasoning: "estimated from scope of integration".to_string(),
        },
        complexity: DimensionResult {
            value: complexity,
            confidence: 0.85,
            reasoning: "based on provider edge cases".to_string(),
        },
        work_type: DimensionResult {
            value: work_type,
            confidence: 0.95,
            reasoning: "delivers a new user-facing capability".to_string(),
        },
    }
}

/// The single-provider OAuth reference scenario from the library seed
pub fn oauth_single_provider() -> Scenario {
    let mut scenario = Scenario::new(
        "OAuth Integration (Single Provider)",
        "authentication",
        ExpectedClassification {
            size: Size::L,
            complexity: Complexity::Medium,
            work_type: WorkType::Feature,
        },
    );
    scenario.examples = vec![
        "Integrate GitHub OAuth authentication with session management".to_string(),
    ];
    scenario
}

pub fn oauth_multi_provider() -> Scenario {
    Scenario::new(
        "Multi-Provider OAuth",
        "authentication",
        ExpectedClassification {
            size: Size::Xl,
            complexity: Complexity::High,
            work_type: WorkType::Feature,
        },
    )
}

/// Engine configuration tuned for fast tests: tiny backoff, short
/// timeout, default thresholds otherwise.
pub fn test_config() -> ThemisConfig {
    let mut config = ThemisConfig::default();
    config.oracle.backoff_base = std::time::Duration::from_millis(1);
    config.oracle.call_timeout = std::time::Duration::from_millis(500);
    config
}

pub const OAUTH_DESCRIPTION: &str =
    "Integrate Google OAuth authentication into our web app with profile sync";

pub const MULTI_OAUTH_DESCRIPTION: &str =
    "Add multi-provider OAuth login supporting Google, GitHub and Microsoft accounts";
